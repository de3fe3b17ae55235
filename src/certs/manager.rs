use crate::certs::acme::{DynIssuer, IssuedCertificate};
use crate::certs::pem;
use crate::certs::preflight::DynDomainCheck;
use crate::certs::writer::CertStoreWriter;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::model::Certificate;
use crate::store::DynStore;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

/// Certificates with this many days or fewer remaining are renewed.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

const PLACEHOLDER_ISSUER: &str = "proxycrab development placeholder";
const PLACEHOLDER_VALIDITY_DAYS: i64 = 365;

/// Whole days from `now` until `expires_at`, truncated toward zero.
#[must_use]
pub fn days_remaining(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expires_at - now).whole_days()
}

/// Issues, renews and tracks the certificates of every proxied domain.
pub struct CertificateManager {
    config: SharedConfig,
    issuer: DynIssuer,
    writer: CertStoreWriter,
    store: DynStore,
    domain_check: Option<DynDomainCheck>,
}

impl CertificateManager {
    #[must_use]
    pub fn new(config: SharedConfig, issuer: DynIssuer, store: DynStore) -> Self {
        let writer = CertStoreWriter::new(
            config.acme.staging_dir.clone(),
            config.acme.cert_root.join("certs"),
        );
        CertificateManager {
            config,
            issuer,
            writer,
            store,
            domain_check: None,
        }
    }

    /// Check each domain with `check` before a production issuance.
    #[must_use]
    pub fn with_domain_check(mut self, check: DynDomainCheck) -> Self {
        self.domain_check = Some(check);
        self
    }

    /// Obtain a certificate for `domain` and record it, replacing any existing record for the
    /// same domain. In production the domain check runs first and a failure stops before the
    /// ACME server is contacted. Outside production a failed issuance produces a self-signed
    /// placeholder instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no contact email is configured,
    /// [`Error::Validation`] if the domain check fails, otherwise any issuance, storage or
    /// persistence error.
    pub async fn issue(&self, domain: &str) -> Result<Certificate, Error> {
        let email = self.contact_email()?;
        if let Some(check) = self.domain_check.as_ref().filter(|_| self.config.is_production()) {
            if let Err(err) = check.check(domain).await {
                warn!("not requesting a certificate for {domain}: {err}");
                return Err(err);
            }
        }
        let issued = match self.issuer.issue(domain, email).await {
            Ok(issued) => issued,
            Err(err) if !self.config.is_production() => {
                warn!("issuance for {domain} failed, using a placeholder certificate: {err}");
                placeholder(domain)?
            }
            Err(err) => return Err(err),
        };
        self.store_issued(domain, &issued).await
    }

    /// Renew `cert` when the deployed file is expired or within [`RENEWAL_WINDOW_DAYS`] of
    /// expiring. The file's own `NotAfter` is authoritative; the stored `expires_at` is only
    /// consulted when no candidate file can be parsed, and a certificate with no file at any
    /// candidate path is always renewed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotDueForRenewal`] without contacting the ACME server when the
    /// certificate has more than [`RENEWAL_WINDOW_DAYS`] left, otherwise as [`Self::issue`]
    /// without the placeholder fallback.
    pub async fn renew(&self, cert: &Certificate) -> Result<Certificate, Error> {
        let email = self.contact_email()?;
        let days = self.deployed_days_remaining(cert).await;
        if days > RENEWAL_WINDOW_DAYS {
            return Err(Error::NotDueForRenewal {
                days_remaining: days,
            });
        }
        info!("renewing certificate for {} ({days} days remaining)", cert.domain);
        let issued = self.issuer.issue(&cert.domain, email).await?;
        self.store_issued(&cert.domain, &issued).await
    }

    /// `(expiring_soon, days_remaining)` for the stored expiry of `cert`.
    #[must_use]
    pub fn check_expiry(cert: &Certificate) -> (bool, i64) {
        Self::check_expiry_at(cert, OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn check_expiry_at(cert: &Certificate, now: OffsetDateTime) -> (bool, i64) {
        let days = days_remaining(cert.expires_at, now);
        (days <= RENEWAL_WINDOW_DAYS, days)
    }

    /// Register a certificate/key pair that already exists on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if either file isn't a usable PEM certificate or key.
    pub async fn import(
        &self,
        domain: &str,
        cert_path: &str,
        key_path: &str,
    ) -> Result<Certificate, Error> {
        if !pem::pair_is_valid(cert_path, key_path).await {
            return Err(Error::Validation(format!(
                "{cert_path} and {key_path} are not a valid certificate and private key"
            )));
        }
        let expires_at = pem::read_not_after(cert_path).await?;
        self.record(domain, cert_path.to_string(), key_path.to_string(), expires_at)
            .await
    }

    fn contact_email(&self) -> Result<&str, Error> {
        self.config.acme.contact_email().ok_or_else(|| {
            Error::Configuration("Let's Encrypt email not configured".to_string())
        })
    }

    fn candidate_paths(&self, cert: &Certificate) -> Vec<PathBuf> {
        let file_name = format!("{}.crt", cert.domain);
        let mut paths = vec![PathBuf::from(&cert.cert_path)];
        for dir in [
            self.config.acme.cert_root.join("certs"),
            self.config.nginx.ssl_cert_dir.clone(),
        ] {
            let path = dir.join(&file_name);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    async fn deployed_days_remaining(&self, cert: &Certificate) -> i64 {
        let now = OffsetDateTime::now_utc();
        let candidates = self.candidate_paths(cert);
        for path in &candidates {
            if let Ok(not_after) = pem::read_not_after(path).await {
                return days_remaining(not_after, now);
            }
        }

        let stored = days_remaining(cert.expires_at, now);
        let any_file = candidates.iter().any(|p| Path::new(p).exists());
        if !any_file {
            warn!("no certificate file found for {}, forcing renewal", cert.domain);
            return 0;
        }
        stored
    }

    async fn store_issued(
        &self,
        domain: &str,
        issued: &IssuedCertificate,
    ) -> Result<Certificate, Error> {
        let stored = self
            .writer
            .write_pair(
                domain,
                issued.certificate_pem.as_bytes(),
                issued.private_key_pem.as_bytes(),
            )
            .await?;
        let expires_at = pem::read_not_after(&stored.cert_path).await?;
        self.record(
            domain,
            stored.cert_path.display().to_string(),
            stored.key_path.display().to_string(),
            expires_at,
        )
        .await
    }

    async fn record(
        &self,
        domain: &str,
        cert_path: String,
        key_path: String,
        expires_at: OffsetDateTime,
    ) -> Result<Certificate, Error> {
        let mut store = self.store.write().await;
        match store.certificate_by_domain(domain).await? {
            Some(mut existing) => {
                existing.cert_path = cert_path;
                existing.key_path = key_path;
                existing.expires_at = expires_at;
                existing.is_valid = true;
                store.update_certificate(&existing).await
            }
            None => {
                let now = OffsetDateTime::now_utc();
                store
                    .create_certificate(Certificate {
                        id: 0,
                        domain: domain.to_string(),
                        cert_path,
                        key_path,
                        expires_at,
                        is_valid: true,
                        created_at: now,
                        updated_at: now,
                    })
                    .await
            }
        }
    }
}

fn placeholder(domain: &str) -> Result<IssuedCertificate, Error> {
    let not_after = OffsetDateTime::now_utc() + Duration::days(PLACEHOLDER_VALIDITY_DAYS);
    let (certificate_pem, private_key_pem) = pem::self_signed(domain, PLACEHOLDER_ISSUER, not_after)?;
    Ok(IssuedCertificate {
        certificate_pem,
        private_key_pem,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::certs::acme::{CertificateIssuer, IssuedCertificate};
    use crate::certs::pem;
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use time::{Duration, OffsetDateTime};

    /// Issues self-signed certificates valid for 90 days, or fails on demand, counting calls.
    #[derive(Default)]
    pub(crate) struct FakeIssuer {
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl FakeIssuer {
        pub(crate) fn failing() -> Self {
            let issuer = FakeIssuer::default();
            issuer.fail.store(true, Ordering::SeqCst);
            issuer
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CertificateIssuer for FakeIssuer {
        async fn issue(&self, domain: &str, _email: &str) -> Result<IssuedCertificate, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::external("ACME", "urn:ietf:params:acme:error:unauthorized"));
            }
            let not_after = OffsetDateTime::now_utc() + Duration::days(90);
            let (certificate_pem, private_key_pem) =
                pem::self_signed(domain, "fake authority", not_after)?;
            Ok(IssuedCertificate {
                certificate_pem,
                private_key_pem,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeIssuer;
    use super::*;
    use crate::certs::preflight::testing::Unreachable;
    use crate::config::{Config, Environment};
    use crate::store::{shared, InMemoryStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: SharedConfig,
        issuer: Arc<FakeIssuer>,
        manager: CertificateManager,
    }

    fn fixture(issuer: FakeIssuer, environment: Environment, email: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config: Config = serde_json::from_str("{}").unwrap();
        config.environment = environment;
        config.acme.email = email.map(String::from);
        config.acme.cert_root = dir.path().join("letsencrypt");
        config.acme.staging_dir = dir.path().join("staging");
        config.nginx.ssl_cert_dir = dir.path().join("ssl");
        let config = Arc::new(config);
        let issuer = Arc::new(issuer);
        let manager = CertificateManager::new(
            config.clone(),
            issuer.clone(),
            shared(InMemoryStore::default()),
        );
        Fixture {
            _dir: dir,
            config,
            issuer,
            manager,
        }
    }

    fn write_cert_with_days(config: &Config, domain: &str, days: i64) -> Certificate {
        let dir = config.acme.cert_root.join("certs");
        std::fs::create_dir_all(&dir).unwrap();
        // An extra hour keeps truncation from rounding down to days - 1.
        let not_after = OffsetDateTime::now_utc() + Duration::days(days) + Duration::hours(1);
        let (cert_pem, key_pem) = pem::self_signed(domain, "test", not_after).unwrap();
        let cert_path = dir.join(format!("{domain}.crt"));
        let key_path = dir.join(format!("{domain}.key"));
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();
        let now = OffsetDateTime::now_utc();
        Certificate {
            id: 1,
            domain: domain.to_string(),
            cert_path: cert_path.display().to_string(),
            key_path: key_path.display().to_string(),
            // Stale on purpose: the file wins.
            expires_at: now + Duration::days(400),
            is_valid: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn issue_requires_contact_email() {
        let f = fixture(FakeIssuer::default(), Environment::Production, None);
        assert!(matches!(
            f.manager.issue("app.example.com").await,
            Err(Error::Configuration(_))
        ));
        assert_eq!(f.issuer.calls(), 0);
    }

    #[tokio::test]
    async fn issue_stores_pair_and_record() {
        let f = fixture(
            FakeIssuer::default(),
            Environment::Production,
            Some("ops@example.com"),
        );
        let cert = f.manager.issue("app.example.com").await.unwrap();
        assert!(cert.is_valid);
        assert!(cert.cert_path.ends_with("certs/app.example.com.crt"));
        assert!(pem::pair_is_valid(&cert.cert_path, &cert.key_path).await);
        let (soon, days) = CertificateManager::check_expiry(&cert);
        assert!(!soon);
        assert!((88..=90).contains(&days));
    }

    #[tokio::test]
    async fn production_never_falls_back_to_placeholder() {
        let f = fixture(
            FakeIssuer::failing(),
            Environment::Production,
            Some("ops@example.com"),
        );
        assert!(matches!(
            f.manager.issue("app.example.com").await,
            Err(Error::ExternalService { .. })
        ));
        assert!(!f
            .config
            .acme
            .cert_root
            .join("certs/app.example.com.crt")
            .exists());
    }

    #[tokio::test]
    async fn unreachable_domain_is_not_sent_to_acme() {
        let mut f = fixture(
            FakeIssuer::default(),
            Environment::Production,
            Some("ops@example.com"),
        );
        f.manager = f.manager.with_domain_check(Arc::new(Unreachable));
        assert!(matches!(
            f.manager.issue("app.example.com").await,
            Err(Error::Validation(_))
        ));
        assert_eq!(f.issuer.calls(), 0);
    }

    #[tokio::test]
    async fn domain_check_only_gates_production() {
        let mut f = fixture(
            FakeIssuer::default(),
            Environment::Development,
            Some("ops@example.com"),
        );
        f.manager = f.manager.with_domain_check(Arc::new(Unreachable));
        f.manager.issue("app.example.com").await.unwrap();
        assert_eq!(f.issuer.calls(), 1);
    }

    #[tokio::test]
    async fn development_falls_back_to_labeled_placeholder() {
        let f = fixture(
            FakeIssuer::failing(),
            Environment::Development,
            Some("ops@example.com"),
        );
        let cert = f.manager.issue("app.example.com").await.unwrap();
        let info = pem::certificate_info(&cert.cert_path).await.unwrap();
        assert!(info.issuer.contains(PLACEHOLDER_ISSUER));
    }

    #[tokio::test]
    async fn renewal_is_gated_on_deployed_file() {
        let f = fixture(
            FakeIssuer::default(),
            Environment::Production,
            Some("ops@example.com"),
        );
        let cert = write_cert_with_days(&f.config, "app.example.com", 45);
        match f.manager.renew(&cert).await {
            Err(Error::NotDueForRenewal { days_remaining }) => assert_eq!(days_remaining, 45),
            other => panic!("expected NotDueForRenewal, got {other:?}"),
        }
        assert_eq!(f.issuer.calls(), 0);

        let cert = write_cert_with_days(&f.config, "app.example.com", 25);
        let renewed = f.manager.renew(&cert).await.unwrap();
        assert_eq!(f.issuer.calls(), 1);
        assert!(CertificateManager::check_expiry(&renewed).1 > 80);
    }

    #[tokio::test]
    async fn missing_file_forces_renewal() {
        let f = fixture(
            FakeIssuer::default(),
            Environment::Production,
            Some("ops@example.com"),
        );
        let now = OffsetDateTime::now_utc();
        let cert = Certificate {
            id: 1,
            domain: "gone.example.com".to_string(),
            cert_path: "/nonexistent/gone.example.com.crt".to_string(),
            key_path: "/nonexistent/gone.example.com.key".to_string(),
            expires_at: now + Duration::days(200),
            is_valid: true,
            created_at: now,
            updated_at: now,
        };
        f.manager.renew(&cert).await.unwrap();
        assert_eq!(f.issuer.calls(), 1);
    }

    #[test]
    fn expiry_window_boundary() {
        let now = OffsetDateTime::now_utc();
        let mut cert = Certificate {
            id: 1,
            domain: "a".to_string(),
            cert_path: String::new(),
            key_path: String::new(),
            expires_at: now + Duration::days(30) + Duration::hours(5),
            is_valid: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(CertificateManager::check_expiry_at(&cert, now), (true, 30));
        cert.expires_at = now + Duration::days(31);
        assert_eq!(CertificateManager::check_expiry_at(&cert, now), (false, 31));
        cert.expires_at = now - Duration::days(2);
        assert_eq!(CertificateManager::check_expiry_at(&cert, now), (true, -2));
    }
}
