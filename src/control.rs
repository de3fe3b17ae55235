//! Operator-facing entry points.
//!
//! [`ControlPlane`] is built once at startup from its collaborators and shared with the HTTP
//! API. Every operation that changes desired state also brings the running system along:
//! proxy changes are reconciled into nginx, certificate changes switch SSL on or off for the
//! routes of their domain, and DNS record changes start or stop scheduled jobs.

use crate::certs::pem::{self, CertificateInfo};
use crate::certs::CertificateManager;
use crate::dns::{AllowList, UpdateEngine};
use crate::error::Error;
use crate::model::{
    Certificate, ConfigStatus, DnsConfig, DnsProvider, DnsRecord, ProxyRoute, ProxyStatus,
    UpdateResult,
};
use crate::nginx::{CommandOutcome, Reconciler};
use crate::scheduler::{JobInfo, Scheduler};
use crate::store::DynStore;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct NewProxy {
    #[serde(default)]
    pub name: String,
    pub domain: String,
    pub target_url: String,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default)]
    pub ws_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyChanges {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub target_url: Option<String>,
    pub ssl_enabled: Option<bool>,
    pub ws_enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SslStatus {
    CertificateGenerated,
    CertificateFailed,
}

/// A created or updated route. When SSL was requested the outcome of obtaining a certificate
/// is reported alongside; failing to get one never fails the route operation itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    pub proxy: ProxyRoute,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_status: Option<SslStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpiryStatus {
    pub certificate_id: u64,
    pub domain: String,
    pub expiring_soon: bool,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDnsConfig {
    pub provider: DnsProvider,
    pub domain: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsConfigChanges {
    pub provider: Option<DnsProvider>,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDnsRecord {
    pub config_id: u64,
    pub host: String,
    #[serde(default)]
    pub allowed_ip_ranges: String,
    pub dynamic_refresh_rate: Option<i64>,
    #[serde(default)]
    pub include_backend: bool,
    pub backend_url: Option<String>,
    #[serde(default = "active")]
    pub is_active: bool,
}

/// Absent fields are left as they are. `dynamic_refresh_rate` and `backend_url` can be cleared
/// with an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsRecordChanges {
    pub host: Option<String>,
    pub allowed_ip_ranges: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub dynamic_refresh_rate: Option<Option<i64>>,
    pub include_backend: Option<bool>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub backend_url: Option<Option<String>>,
    pub is_active: Option<bool>,
}

fn active() -> bool {
    true
}

fn require(value: &str, field: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_target(target_url: &str) -> Result<(), Error> {
    require(target_url, "target_url")?;
    if !(target_url.starts_with("http://") || target_url.starts_with("https://")) {
        return Err(Error::Validation(format!(
            "target_url must start with http:// or https://, got '{target_url}'"
        )));
    }
    Ok(())
}

fn validate_record(record: &DnsRecord) -> Result<(), Error> {
    require(&record.host, "host")?;
    AllowList::parse(&record.allowed_ip_ranges)?;
    if matches!(record.dynamic_refresh_rate, Some(rate) if rate <= 0) {
        return Err(Error::Validation(
            "dynamic_refresh_rate must be a positive number of minutes".to_string(),
        ));
    }
    if record.include_backend {
        match record.backend_url.as_deref() {
            Some(url) => validate_target(url)?,
            None => {
                return Err(Error::Validation(
                    "backend_url is required when include_backend is set".to_string(),
                ))
            }
        }
    }
    Ok(())
}

pub struct ControlPlane {
    store: DynStore,
    certs: CertificateManager,
    reconciler: Reconciler,
    engine: Arc<UpdateEngine>,
    scheduler: Arc<Scheduler>,
}

impl ControlPlane {
    #[must_use]
    pub fn new(
        store: DynStore,
        certs: CertificateManager,
        reconciler: Reconciler,
        engine: Arc<UpdateEngine>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        ControlPlane {
            store,
            certs,
            reconciler,
            engine,
            scheduler,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // Proxy routes.

    /// # Errors
    ///
    /// Returns store errors.
    pub async fn list_proxies(&self) -> Result<Vec<ProxyRoute>, Error> {
        self.store.read().await.list_proxies().await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get_proxy(&self, id: u64) -> Result<ProxyRoute, Error> {
        self.store.read().await.get_proxy(id).await
    }

    /// Create a route and bring it live. With `ssl_enabled` an existing certificate for the
    /// domain is used, otherwise one is issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad input and reconciler errors if nginx rejects the
    /// configuration or fails to reload.
    pub async fn create_proxy(&self, new: NewProxy) -> Result<ProxyResponse, Error> {
        require(&new.domain, "domain")?;
        validate_target(&new.target_url)?;

        let domain = new.domain.trim().to_ascii_lowercase();
        let now = OffsetDateTime::now_utc();
        let mut proxy = ProxyRoute {
            id: 0,
            name: if new.name.trim().is_empty() {
                domain.clone()
            } else {
                new.name
            },
            domain,
            target_url: new.target_url,
            ssl_enabled: false,
            ssl_path: None,
            ws_enabled: new.ws_enabled,
            status: ProxyStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let certificate = if new.ssl_enabled {
            Some(self.attach_certificate(&mut proxy).await)
        } else {
            None
        };

        let mut proxy = self.store.write().await.create_proxy(proxy).await?;
        self.reconciler.apply(&mut proxy).await?;
        info!("created proxy {} for {}", proxy.id, proxy.domain);
        Ok(ssl_outcome(proxy, certificate, "Proxy created without SSL"))
    }

    /// # Errors
    ///
    /// As [`Self::create_proxy`], plus [`Error::NotFound`] for an unknown id.
    pub async fn update_proxy(&self, id: u64, changes: ProxyChanges) -> Result<ProxyResponse, Error> {
        let mut proxy = self.get_proxy(id).await?;
        if let Some(name) = changes.name {
            proxy.name = name;
        }
        if let Some(domain) = changes.domain {
            require(&domain, "domain")?;
            proxy.domain = domain.trim().to_ascii_lowercase();
        }
        if let Some(target_url) = changes.target_url {
            validate_target(&target_url)?;
            proxy.target_url = target_url;
        }
        if let Some(ws_enabled) = changes.ws_enabled {
            proxy.ws_enabled = ws_enabled;
        }
        let certificate = match changes.ssl_enabled {
            Some(true) => Some(self.attach_certificate(&mut proxy).await),
            Some(false) => {
                proxy.ssl_enabled = false;
                None
            }
            None => None,
        };

        let mut proxy = self.store.write().await.update_proxy(&proxy).await?;
        self.reconciler.apply(&mut proxy).await?;
        Ok(ssl_outcome(proxy, certificate, "SSL remains disabled"))
    }

    /// Take a route's configuration out of nginx, then forget the route. If nginx rejects the
    /// configuration without it the route stays stored, matching the restored config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and reconciler errors.
    pub async fn delete_proxy(&self, id: u64) -> Result<ProxyRoute, Error> {
        self.get_proxy(id).await?;
        let removed = match self.reconciler.remove(id).await {
            Ok(()) => Ok(()),
            // The reload failed after the files were gone, so the route goes with them.
            Err(err @ Error::ReconciliationConflict(_)) => Err(err),
            Err(err) => {
                warn!("kept proxy {id}, nginx did not accept its removal: {err}");
                return Err(err);
            }
        };
        let proxy = self.store.write().await.delete_proxy(id).await?;
        info!("deleted proxy {id} for {}", proxy.domain);
        removed.map(|()| proxy)
    }

    /// Re-render and reload a route's configuration as currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and reconciler errors.
    pub async fn regenerate_proxy(&self, id: u64) -> Result<ProxyRoute, Error> {
        let mut proxy = self.get_proxy(id).await?;
        self.reconciler.apply(&mut proxy).await?;
        Ok(proxy)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown route or a domain without certificate.
    pub async fn proxy_certificate(&self, id: u64) -> Result<Certificate, Error> {
        let proxy = self.get_proxy(id).await?;
        self.store
            .read()
            .await
            .certificate_by_domain(&proxy.domain)
            .await?
            .ok_or_else(|| Error::not_found("certificate", &proxy.domain))
    }

    /// Point `proxy` at a certificate for its domain, issuing one if none is recorded.
    async fn attach_certificate(&self, proxy: &mut ProxyRoute) -> Result<Certificate, Error> {
        let existing = self
            .store
            .read()
            .await
            .certificate_by_domain(&proxy.domain)
            .await;
        let result = match existing {
            Ok(Some(cert)) => {
                info!("found existing certificate for {}, enabling SSL", proxy.domain);
                Ok(cert)
            }
            Ok(None) => self.certs.issue(&proxy.domain).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(cert) => {
                proxy.ssl_enabled = true;
                proxy.ssl_path = Some(cert.cert_path.clone());
            }
            Err(err) => {
                warn!("no certificate for {}, continuing without SSL: {err}", proxy.domain);
                proxy.ssl_enabled = false;
            }
        }
        result
    }

    // Certificates.

    /// # Errors
    ///
    /// Returns store errors.
    pub async fn list_certificates(&self) -> Result<Vec<Certificate>, Error> {
        self.store.read().await.list_certificates().await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get_certificate(&self, id: u64) -> Result<Certificate, Error> {
        self.store.read().await.get_certificate(id).await
    }

    /// Issue a certificate for `domain` and enable SSL on its routes.
    ///
    /// # Errors
    ///
    /// See [`CertificateManager::issue`].
    pub async fn issue_certificate(&self, domain: &str) -> Result<Certificate, Error> {
        require(domain, "domain")?;
        let cert = self.certs.issue(&domain.trim().to_ascii_lowercase()).await?;
        self.enable_ssl_for_domain(&cert).await;
        Ok(cert)
    }

    /// Register an existing certificate/key pair and enable SSL on its domain's routes.
    ///
    /// # Errors
    ///
    /// See [`CertificateManager::import`].
    pub async fn import_certificate(
        &self,
        domain: &str,
        cert_path: &str,
        key_path: &str,
    ) -> Result<Certificate, Error> {
        require(domain, "domain")?;
        let cert = self
            .certs
            .import(&domain.trim().to_ascii_lowercase(), cert_path, key_path)
            .await?;
        self.enable_ssl_for_domain(&cert).await;
        Ok(cert)
    }

    /// Renew a certificate that is close to expiry. A failure to reload nginx afterwards is
    /// logged, the renewed certificate stays in place.
    ///
    /// # Errors
    ///
    /// See [`CertificateManager::renew`].
    pub async fn renew_certificate(&self, id: u64) -> Result<Certificate, Error> {
        let cert = self.get_certificate(id).await?;
        let renewed = self.certs.renew(&cert).await?;
        if let Err(err) = self.reconciler.regenerate_for_domain(&renewed.domain).await {
            warn!("renewed {} but applying it failed: {err}", renewed.domain);
        }
        Ok(renewed)
    }

    /// Delete a certificate record and turn SSL off on the routes of its domain. Files on disk
    /// are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn delete_certificate(&self, id: u64) -> Result<Certificate, Error> {
        let cert = self.store.write().await.delete_certificate(id).await?;
        {
            let mut store = self.store.write().await;
            for mut proxy in store.proxies_by_domain(&cert.domain).await? {
                proxy.ssl_enabled = false;
                proxy.ssl_path = None;
                store.update_proxy(&proxy).await?;
            }
        }
        if let Err(err) = self.reconciler.regenerate_for_domain(&cert.domain).await {
            warn!("disabled SSL for {} but applying it failed: {err}", cert.domain);
        }
        info!("deleted certificate {id} for {}", cert.domain);
        Ok(cert)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and errors reading the certificate file.
    pub async fn certificate_info(&self, id: u64) -> Result<CertificateInfo, Error> {
        let cert = self.get_certificate(id).await?;
        pem::certificate_info(&cert.cert_path).await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn certificate_expiry(&self, id: u64) -> Result<ExpiryStatus, Error> {
        let cert = self.get_certificate(id).await?;
        let (expiring_soon, days_remaining) = CertificateManager::check_expiry(&cert);
        Ok(ExpiryStatus {
            certificate_id: cert.id,
            domain: cert.domain,
            expiring_soon,
            days_remaining,
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn certificate_proxies(&self, id: u64) -> Result<Vec<ProxyRoute>, Error> {
        let cert = self.get_certificate(id).await?;
        self.store.read().await.proxies_by_domain(&cert.domain).await
    }

    async fn enable_ssl_for_domain(&self, cert: &Certificate) {
        let updated = async {
            let mut store = self.store.write().await;
            for mut proxy in store.proxies_by_domain(&cert.domain).await? {
                proxy.ssl_enabled = true;
                proxy.ssl_path = Some(cert.cert_path.clone());
                store.update_proxy(&proxy).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(err) = updated {
            warn!("failed to enable SSL on routes for {}: {err}", cert.domain);
            return;
        }
        if let Err(err) = self.reconciler.regenerate_for_domain(&cert.domain).await {
            warn!("enabled SSL for {} but applying it failed: {err}", cert.domain);
        }
    }

    // Dynamic DNS.

    /// # Errors
    ///
    /// Returns store errors.
    pub async fn list_dns_configs(&self) -> Result<Vec<DnsConfig>, Error> {
        self.store.read().await.list_dns_configs().await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get_dns_config(&self, id: u64) -> Result<DnsConfig, Error> {
        self.store.read().await.get_dns_config(id).await
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a missing domain.
    pub async fn create_dns_config(&self, new: NewDnsConfig) -> Result<DnsConfig, Error> {
        require(&new.domain, "domain")?;
        let now = OffsetDateTime::now_utc();
        let config = DnsConfig {
            id: 0,
            provider: new.provider,
            domain: new.domain.trim().to_ascii_lowercase(),
            username: new.username,
            password: new.password,
            is_active: new.is_active,
            last_update: None,
            last_ip: None,
            created_at: now,
            updated_at: now,
        };
        let config = self.store.write().await.create_dns_config(config).await?;
        info!("created {} DNS configuration {} for {}", config.provider, config.id, config.domain);
        Ok(config)
    }

    /// Update a configuration. Deactivating it stops the jobs of all its records,
    /// reactivating it starts them again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn update_dns_config(
        &self,
        id: u64,
        changes: DnsConfigChanges,
    ) -> Result<DnsConfig, Error> {
        let mut config = self.get_dns_config(id).await?;
        if let Some(provider) = changes.provider {
            config.provider = provider;
        }
        if let Some(domain) = changes.domain {
            require(&domain, "domain")?;
            config.domain = domain.trim().to_ascii_lowercase();
        }
        if let Some(username) = changes.username {
            config.username = username;
        }
        if let Some(password) = changes.password {
            config.password = password;
        }
        if let Some(is_active) = changes.is_active {
            config.is_active = is_active;
        }
        let (config, records) = {
            let mut store = self.store.write().await;
            let config = store.update_dns_config(&config).await?;
            let records = store.list_dns_records(config.id).await?;
            (config, records)
        };
        for record in &records {
            self.sync_schedule(record, &config).await;
        }
        Ok(config)
    }

    /// Delete a configuration together with its records, stopping their jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn delete_dns_config(&self, id: u64) -> Result<DnsConfig, Error> {
        let (config, records) = self.store.write().await.delete_dns_config(id).await?;
        for record in &records {
            self.scheduler.stop(record.id).await;
        }
        info!(
            "deleted DNS configuration {id} for {} with {} record(s)",
            config.domain,
            records.len()
        );
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown configuration.
    pub async fn list_dns_records(&self, config_id: u64) -> Result<Vec<DnsRecord>, Error> {
        let store = self.store.read().await;
        store.get_dns_config(config_id).await?;
        store.list_dns_records(config_id).await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get_dns_record(&self, id: u64) -> Result<DnsRecord, Error> {
        self.store.read().await.get_dns_record(id).await
    }

    /// Create a record and schedule it if it has a refresh rate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed allow-list, refresh rate or backend and
    /// [`Error::NotFound`] for an unknown configuration. Nothing is stored in either case.
    pub async fn create_dns_record(&self, new: NewDnsRecord) -> Result<DnsRecord, Error> {
        let now = OffsetDateTime::now_utc();
        let record = DnsRecord {
            id: 0,
            config_id: new.config_id,
            host: new.host.trim().to_string(),
            current_ip: None,
            allowed_ip_ranges: new.allowed_ip_ranges.trim().to_string(),
            dynamic_refresh_rate: new.dynamic_refresh_rate,
            include_backend: new.include_backend,
            backend_url: new.backend_url.filter(|url| !url.trim().is_empty()),
            is_active: new.is_active,
            last_update: None,
            created_at: now,
            updated_at: now,
        };
        validate_record(&record)?;
        let (record, config) = {
            let mut store = self.store.write().await;
            let config = store.get_dns_config(record.config_id).await?;
            (store.create_dns_record(record).await?, config)
        };
        self.sync_schedule(&record, &config).await;
        self.regenerate_routes(&record.fqdn(&config.domain)).await;
        Ok(record)
    }

    /// # Errors
    ///
    /// As [`Self::create_dns_record`].
    pub async fn update_dns_record(
        &self,
        id: u64,
        changes: DnsRecordChanges,
    ) -> Result<DnsRecord, Error> {
        let mut record = self.get_dns_record(id).await?;
        if let Some(host) = changes.host {
            record.host = host.trim().to_string();
        }
        if let Some(ranges) = changes.allowed_ip_ranges {
            record.allowed_ip_ranges = ranges.trim().to_string();
        }
        if let Some(rate) = changes.dynamic_refresh_rate {
            record.dynamic_refresh_rate = rate;
        }
        if let Some(include_backend) = changes.include_backend {
            record.include_backend = include_backend;
        }
        if let Some(backend_url) = changes.backend_url {
            record.backend_url = backend_url.filter(|url| !url.trim().is_empty());
        }
        if let Some(is_active) = changes.is_active {
            record.is_active = is_active;
        }
        validate_record(&record)?;

        let (record, config) = {
            let mut store = self.store.write().await;
            let record = store.update_dns_record(&record).await?;
            let config = store.get_dns_config(record.config_id).await?;
            (record, config)
        };
        self.sync_schedule(&record, &config).await;
        self.regenerate_routes(&record.fqdn(&config.domain)).await;
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn delete_dns_record(&self, id: u64) -> Result<DnsRecord, Error> {
        let (record, zone) = {
            let mut store = self.store.write().await;
            let record = store.delete_dns_record(id).await?;
            let zone = store
                .get_dns_config(record.config_id)
                .await
                .map(|config| config.domain)
                .ok();
            (record, zone)
        };
        self.scheduler.stop(record.id).await;
        if let Some(zone) = zone {
            self.regenerate_routes(&record.fqdn(&zone)).await;
        }
        Ok(record)
    }

    /// Update one record right away, outside of its schedule.
    ///
    /// # Errors
    ///
    /// See [`UpdateEngine::update_one`].
    pub async fn update_record_now(&self, id: u64) -> Result<UpdateResult, Error> {
        self.engine.update_one(id).await
    }

    /// # Errors
    ///
    /// See [`UpdateEngine::update_all`].
    pub async fn update_all_records(&self) -> Result<Vec<UpdateResult>, Error> {
        self.engine.update_all().await
    }

    /// # Errors
    ///
    /// Returns store errors.
    pub async fn dns_status(&self) -> Result<Vec<ConfigStatus>, Error> {
        self.engine.status().await
    }

    /// # Errors
    ///
    /// Returns [`Error::ExternalService`] if no public IP service answered.
    pub async fn public_ip(&self) -> Result<IpAddr, Error> {
        self.engine.public_ip().await
    }

    pub async fn scheduled_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.list_active().await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the record has no job.
    pub async fn pause_job(&self, record_id: u64) -> Result<JobInfo, Error> {
        self.scheduler.pause(record_id).await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the record has no job.
    pub async fn resume_job(&self, record_id: u64) -> Result<JobInfo, Error> {
        self.scheduler.resume(record_id).await
    }

    /// A record is scheduled exactly when it and its configuration are active and it has a
    /// positive refresh rate.
    async fn sync_schedule(&self, record: &DnsRecord, config: &DnsConfig) {
        let rate = record
            .dynamic_refresh_rate
            .filter(|_| record.is_active && config.is_active);
        self.scheduler.update(record.id, rate).await;
    }

    /// Allow-lists and backends come from DNS records, so routes for the record's name are
    /// re-rendered when it changes.
    async fn regenerate_routes(&self, domain: &str) {
        if let Err(err) = self.reconciler.regenerate_for_domain(domain).await {
            warn!("failed to apply DNS record change to routes for {domain}: {err}");
        }
    }

    // nginx.

    /// # Errors
    ///
    /// Returns [`Error::InvalidProxyConfig`] with nginx's output.
    pub async fn validate_nginx(&self) -> Result<CommandOutcome, Error> {
        self.reconciler.validate_active().await
    }

    /// # Errors
    ///
    /// Returns [`Error::ReconciliationConflict`] with nginx's output.
    pub async fn reload_nginx(&self) -> Result<CommandOutcome, Error> {
        self.reconciler.reload().await
    }
}

fn ssl_outcome(
    proxy: ProxyRoute,
    certificate: Option<Result<Certificate, Error>>,
    without_ssl: &str,
) -> ProxyResponse {
    let Some(certificate) = certificate else {
        return ProxyResponse {
            proxy,
            ssl_status: None,
            ssl_message: None,
        };
    };
    let (ssl_status, ssl_message) = match certificate {
        Ok(_) if proxy.ssl_enabled => (
            SslStatus::CertificateGenerated,
            "Certificate is in place and SSL is enabled".to_string(),
        ),
        Ok(cert) => (
            SslStatus::CertificateFailed,
            format!(
                "Certificate files at {} are not usable. {without_ssl}.",
                cert.cert_path
            ),
        ),
        Err(err) => (
            SslStatus::CertificateFailed,
            format!("Failed to obtain a certificate: {err}. {without_ssl}."),
        ),
    };
    ProxyResponse {
        proxy,
        ssl_status: Some(ssl_status),
        ssl_message: Some(ssl_message),
    }
}
