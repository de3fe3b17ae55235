use crate::config::DynDnsConfig;
use crate::error::Error;
use reqwest::Client;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Discovers the address this host is reachable at from the internet.
#[async_trait::async_trait]
pub trait PublicIpResolver {
    async fn resolve(&self) -> Result<IpAddr, Error>;
}

pub type DynResolver = Arc<dyn PublicIpResolver + Send + Sync>;

/// Asks plain-text "what is my IP" services in order until one answers with an address.
#[derive(Debug, Clone)]
pub struct HttpPublicIpResolver {
    client: Client,
    services: Vec<String>,
}

impl HttpPublicIpResolver {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client can't be built or no service is
    /// configured.
    pub fn new(config: &DynDnsConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {e}")))?;
        let services = service_order(config);
        if services.is_empty() {
            return Err(Error::Configuration(
                "no public IP services configured".to_string(),
            ));
        }
        Ok(HttpPublicIpResolver { client, services })
    }

    async fn query(&self, service: &str) -> Result<IpAddr, String> {
        let response = self
            .client
            .get(service)
            .send()
            .await
            .map_err(|e| format!("{service}: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("{service}: status {}", response.status()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| format!("{service}: {e}"))?;
        parse_ip(&body).ok_or_else(|| format!("{service}: not an IP address: {:?}", body.trim()))
    }
}

/// The primary service followed by the fallbacks, without repeats.
fn service_order(config: &DynDnsConfig) -> Vec<String> {
    let mut services: Vec<String> = Vec::new();
    for service in config
        .public_ip_service
        .iter()
        .chain(config.fallback_ip_services.iter())
    {
        let service = service.trim();
        if !service.is_empty() && !services.iter().any(|s| s == service) {
            services.push(service.to_string());
        }
    }
    services
}

fn parse_ip(body: &str) -> Option<IpAddr> {
    body.trim().parse().ok()
}

#[async_trait::async_trait]
impl PublicIpResolver for HttpPublicIpResolver {
    async fn resolve(&self) -> Result<IpAddr, Error> {
        let mut last_error = String::new();
        for service in &self.services {
            match self.query(service).await {
                Ok(ip) => {
                    debug!("public IP {ip} from {service}");
                    return Ok(ip);
                }
                Err(err) => {
                    warn!("public IP lookup failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(Error::external(
            "public IP",
            format!("every service failed, last error: {last_error}"),
        ))
    }
}
