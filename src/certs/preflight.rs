use crate::error::Error;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;

/// Confirms a domain can complete an HTTP-01 challenge before the ACME server is asked.
#[async_trait::async_trait]
pub trait DomainCheck {
    async fn check(&self, domain: &str) -> Result<(), Error>;
}

pub type DynDomainCheck = Arc<dyn DomainCheck + Send + Sync>;

const CHALLENGE_PATH: &str = "/.well-known/acme-challenge/test";

/// Resolves the domain and requests a challenge path over plain HTTP. A 200 or 404 means the
/// webroot is being served; anything else fails the check.
#[derive(Debug, Clone)]
pub struct HttpDomainCheck {
    client: Client,
    port: u16,
}

impl HttpDomainCheck {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client can't be built.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(HttpDomainCheck { client, port: 80 })
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait::async_trait]
impl DomainCheck for HttpDomainCheck {
    async fn check(&self, domain: &str) -> Result<(), Error> {
        let addrs: Vec<_> = lookup_host((domain, self.port))
            .await
            .map_err(|e| Error::Validation(format!("domain {domain} does not resolve: {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Validation(format!(
                "domain {domain} does not resolve to any address"
            )));
        }
        debug!("{domain} resolves to {addrs:?}");

        let url = format!("http://{domain}:{}{CHALLENGE_PATH}", self.port);
        let response = self.client.get(&url).send().await.map_err(|e| {
            Error::Validation(format!("domain {domain} is not reachable over HTTP: {e}"))
        })?;
        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(Error::Validation(format!(
                "domain {domain} answered the challenge path with {status}"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::DomainCheck;
    use crate::error::Error;

    /// Rejects every domain.
    pub(crate) struct Unreachable;

    #[async_trait::async_trait]
    impl DomainCheck for Unreachable {
        async fn check(&self, domain: &str) -> Result<(), Error> {
            Err(Error::Validation(format!(
                "domain {domain} is not reachable over HTTP"
            )))
        }
    }
}
