use crate::certs::pem;
use crate::config::SharedConfig;
use crate::dns::allow_list::AllowList;
use crate::error::Error;
use crate::model::{Certificate, ProxyRoute};
use crate::nginx::command::{CommandOutcome, DynControl};
use crate::nginx::render::{self, Site};
use crate::store::DynStore;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Keeps the proxy server's active configuration in line with stored routes.
///
/// Every mutation follows render, write to staging, copy to active, validate, reload. A
/// configuration the proxy server rejects is taken back out of the active directory and
/// nothing is reloaded.
pub struct Reconciler {
    config: SharedConfig,
    store: DynStore,
    control: DynControl,
}

impl Reconciler {
    #[must_use]
    pub fn new(config: SharedConfig, store: DynStore, control: DynControl) -> Self {
        Reconciler {
            config,
            store,
            control,
        }
    }

    fn staging_path(&self, proxy_id: u64) -> PathBuf {
        self.config.nginx.config_dir.join(render::file_name(proxy_id))
    }

    fn active_path(&self, proxy_id: u64) -> PathBuf {
        self.config
            .nginx
            .sites_enabled_dir
            .join(render::file_name(proxy_id))
    }

    /// Where the route's certificate and key are expected: the certificate record for its
    /// domain, then the route's own `ssl_path`, then the deployed certificate directory.
    fn tls_paths(&self, proxy: &ProxyRoute, cert: Option<&Certificate>) -> (PathBuf, PathBuf) {
        if let Some(cert) = cert {
            return (PathBuf::from(&cert.cert_path), PathBuf::from(&cert.key_path));
        }
        if let Some(ssl_path) = proxy.ssl_path.as_deref().filter(|p| !p.is_empty()) {
            let cert_path = PathBuf::from(ssl_path);
            let key_path = cert_path.with_extension("key");
            return (cert_path, key_path);
        }
        let dir = &self.config.nginx.ssl_cert_dir;
        (
            dir.join(format!("{}.crt", proxy.domain)),
            dir.join(format!("{}.key", proxy.domain)),
        )
    }

    /// Bring `proxy.ssl_enabled` in line with the certificate files on disk, persisting any
    /// change. Returns the paths to serve when TLS ends up enabled.
    async fn reconcile_tls(&self, proxy: &mut ProxyRoute) -> Result<Option<(PathBuf, PathBuf)>, Error> {
        let cert = self
            .store
            .read()
            .await
            .certificate_by_domain(&proxy.domain)
            .await?;
        let (cert_path, key_path) = self.tls_paths(proxy, cert.as_ref());
        let has_valid_record = cert.as_ref().is_some_and(|c| c.is_valid);

        let changed = if !proxy.ssl_enabled && has_valid_record {
            if pem::pair_is_valid(&cert_path, &key_path).await {
                info!("enabling SSL for {} from valid certificate files", proxy.domain);
                proxy.ssl_enabled = true;
                proxy.ssl_path = Some(cert_path.display().to_string());
                true
            } else {
                debug!(
                    "certificate recorded for {} but files are unusable, leaving SSL off",
                    proxy.domain
                );
                false
            }
        } else if proxy.ssl_enabled && !pem::pair_is_valid(&cert_path, &key_path).await {
            warn!(
                "disabling SSL for {}: {} or {} is not a valid certificate/key",
                proxy.domain,
                cert_path.display(),
                key_path.display()
            );
            proxy.ssl_enabled = false;
            true
        } else {
            false
        };

        if changed {
            *proxy = self.store.write().await.update_proxy(proxy).await?;
        }
        Ok(proxy
            .ssl_enabled
            .then_some((cert_path, key_path)))
    }

    /// Render the configuration for `proxy`, first reconciling its SSL state.
    ///
    /// # Errors
    ///
    /// Returns store errors, or [`Error::Validation`] if the domain's DNS record carries a
    /// malformed allow-list.
    pub async fn render(&self, proxy: &mut ProxyRoute) -> Result<String, Error> {
        let tls = self.reconcile_tls(proxy).await?;
        let record = self
            .store
            .read()
            .await
            .dns_record_for_domain(&proxy.domain)
            .await?;

        let (allowed_ranges, backend_url) = match record {
            Some(record) => (
                AllowList::parse(&record.allowed_ip_ranges)?.normalized(),
                record
                    .backend_url
                    .filter(|url| record.include_backend && !url.trim().is_empty()),
            ),
            None => (Vec::new(), None),
        };

        Ok(render::render(&Site {
            proxy,
            tls,
            allowed_ranges,
            backend_url,
            acme_webroot: &self.config.acme.webroot,
        }))
    }

    /// Render `proxy` into the active directory, validate and reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProxyConfig`] if validation fails (the previous file is put back
    /// and nothing is reloaded) and [`Error::ReconciliationConflict`] if the reload fails
    /// after a successful validation.
    pub async fn apply(&self, proxy: &mut ProxyRoute) -> Result<(), Error> {
        let rendered = self.render(proxy).await?;
        let staging = self.staging_path(proxy.id);
        let active = self.active_path(proxy.id);

        write_file(&staging, rendered.as_bytes()).await?;
        let previous = fs::read(&active).await.ok();
        if let Some(dir) = active.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::copy(&staging, &active).await?;

        if let Err(err) = self.validate_active().await {
            warn!("rejected configuration for {}: {err}", proxy.domain);
            put_back(&active, previous.as_deref()).await?;
            return Err(err);
        }
        self.reload().await?;
        info!("applied configuration for {}", proxy.domain);
        Ok(())
    }

    /// Remove a route's configuration, validate and reload.
    ///
    /// # Errors
    ///
    /// As [`Self::apply`]; on validation failure the removed file is restored.
    pub async fn remove(&self, proxy_id: u64) -> Result<(), Error> {
        let active = self.active_path(proxy_id);
        let previous = fs::read(&active).await.ok();
        remove_if_present(&active).await?;
        remove_if_present(&self.staging_path(proxy_id)).await?;

        if let Err(err) = self.validate_active().await {
            put_back(&active, previous.as_deref()).await?;
            return Err(err);
        }
        self.reload().await?;
        Ok(())
    }

    /// Ask the proxy server to check its active configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProxyConfig`] carrying the proxy server's output.
    pub async fn validate_active(&self) -> Result<CommandOutcome, Error> {
        self.control.test_config().await.map_err(|err| match err {
            Error::ExternalService { message, .. } => Error::InvalidProxyConfig(message),
            other => other,
        })
    }

    /// Reload the proxy server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconciliationConflict`] carrying the proxy server's output.
    pub async fn reload(&self) -> Result<CommandOutcome, Error> {
        self.control.reload().await.map_err(|err| match err {
            Error::ExternalService { message, .. } => Error::ReconciliationConflict(message),
            other => other,
        })
    }

    /// Re-apply every route for `domain`, e.g. after its certificate changed. Each route is
    /// attempted even if an earlier one fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// See [`Self::apply`].
    pub async fn regenerate_for_domain(&self, domain: &str) -> Result<Vec<ProxyRoute>, Error> {
        let proxies = self.store.read().await.proxies_by_domain(domain).await?;
        let mut applied = Vec::with_capacity(proxies.len());
        let mut first_error = None;
        for mut proxy in proxies {
            match self.apply(&mut proxy).await {
                Ok(()) => applied.push(proxy),
                Err(err) => {
                    warn!("regenerating {} failed: {err}", proxy.domain);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(path, contents).await?;
    Ok(())
}

async fn put_back(path: &Path, previous: Option<&[u8]>) -> Result<(), Error> {
    match previous {
        Some(bytes) => write_file(path, bytes).await,
        None => remove_if_present(path).await,
    }
}

async fn remove_if_present(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::Error;
    use crate::nginx::command::{CommandOutcome, ProxyServerControl};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records calls and fails on demand.
    #[derive(Default)]
    pub(crate) struct FakeControl {
        pub tests: AtomicUsize,
        pub reloads: AtomicUsize,
        pub reject_config: AtomicBool,
        pub fail_reload: AtomicBool,
    }

    impl FakeControl {
        pub(crate) fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProxyServerControl for FakeControl {
        async fn test_config(&self) -> Result<CommandOutcome, Error> {
            self.tests.fetch_add(1, Ordering::SeqCst);
            if self.reject_config.load(Ordering::SeqCst) {
                return Err(Error::external("nginx", "nginx: [emerg] invalid config"));
            }
            Ok(CommandOutcome::Applied)
        }

        async fn reload(&self) -> Result<CommandOutcome, Error> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reload.load(Ordering::SeqCst) {
                return Err(Error::external("nginx", "nginx: [alert] kill failed"));
            }
            Ok(CommandOutcome::Applied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeControl;
    use super::*;
    use crate::config::Config;
    use crate::model::DnsProvider;
    use crate::store::memory::fixtures::{dns_config, dns_record, proxy};
    use crate::store::{shared, InMemoryStore};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;
    use time::{Duration, OffsetDateTime};

    struct Fixture {
        dir: TempDir,
        store: DynStore,
        control: Arc<FakeControl>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config: Config = serde_json::from_str("{}").unwrap();
        config.nginx.config_dir = dir.path().join("conf.d");
        config.nginx.sites_enabled_dir = dir.path().join("sites-enabled");
        config.nginx.ssl_cert_dir = dir.path().join("ssl");
        config.acme.webroot = dir.path().join("www");
        let store = shared(InMemoryStore::default());
        let control = Arc::new(FakeControl::default());
        let reconciler = Reconciler::new(Arc::new(config), store.clone(), control.clone());
        Fixture {
            dir,
            store,
            control,
            reconciler,
        }
    }

    async fn certificate(f: &Fixture, domain: &str, cert_pem: &str, key_pem: &str) -> Certificate {
        let cert_path = f.dir.path().join(format!("{domain}.crt"));
        let key_path = f.dir.path().join(format!("{domain}.key"));
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();
        let now = OffsetDateTime::now_utc();
        f.store
            .write()
            .await
            .create_certificate(Certificate {
                id: 0,
                domain: domain.to_string(),
                cert_path: cert_path.display().to_string(),
                key_path: key_path.display().to_string(),
                expires_at: now + Duration::days(90),
                is_valid: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    fn pair(domain: &str) -> (String, String) {
        pem::self_signed(domain, "test", OffsetDateTime::now_utc() + Duration::days(90)).unwrap()
    }

    #[tokio::test]
    async fn corrupted_certificate_disables_ssl() {
        let f = fixture();
        let (cert_pem, key_pem) = pair("app.example.com");
        let truncated = &cert_pem[..cert_pem.len() / 2];
        let cert = certificate(&f, "app.example.com", truncated, &key_pem).await;

        let mut route = proxy("app.example.com");
        route.ssl_enabled = true;
        route.ssl_path = Some(cert.cert_path.clone());
        let mut route = f.store.write().await.create_proxy(route).await.unwrap();

        let conf = f.reconciler.render(&mut route).await.unwrap();
        assert!(!route.ssl_enabled);
        assert!(!conf.contains("ssl_certificate"));
        assert!(!conf.contains("listen 443"));
        let stored = f.store.read().await.get_proxy(route.id).await.unwrap();
        assert!(!stored.ssl_enabled);
    }

    #[tokio::test]
    async fn valid_certificate_enables_ssl() {
        let f = fixture();
        let (cert_pem, key_pem) = pair("app.example.com");
        let cert = certificate(&f, "app.example.com", &cert_pem, &key_pem).await;
        let mut route = f
            .store
            .write()
            .await
            .create_proxy(proxy("app.example.com"))
            .await
            .unwrap();

        let conf = f.reconciler.render(&mut route).await.unwrap();
        assert!(route.ssl_enabled);
        assert_eq!(route.ssl_path.as_deref(), Some(cert.cert_path.as_str()));
        assert!(conf.contains(&format!("ssl_certificate {};", cert.cert_path)));
        assert!(f.store.read().await.get_proxy(route.id).await.unwrap().ssl_enabled);
    }

    #[tokio::test]
    async fn dns_record_contributes_allow_list_and_backend() {
        let f = fixture();
        {
            let mut store = f.store.write().await;
            let config = store
                .create_dns_config(dns_config(DnsProvider::Static, "example.com"))
                .await
                .unwrap();
            let mut record = dns_record(config.id, "app");
            record.allowed_ip_ranges = "10.0.0.5/24, 192.168.1.5".to_string();
            record.include_backend = true;
            record.backend_url = Some("http://127.0.0.1:9000".to_string());
            store.create_dns_record(record).await.unwrap();
        }
        let mut route = proxy("app.example.com");
        route.id = 1;
        let conf = f.reconciler.render(&mut route).await.unwrap();
        assert!(conf.contains("allow 10.0.0.0/24;"));
        assert!(conf.contains("allow 192.168.1.5/32;"));
        assert!(conf.contains("proxy_pass http://127.0.0.1:9000;"));
    }

    #[tokio::test]
    async fn apply_writes_validates_and_reloads() {
        let f = fixture();
        let mut route = f
            .store
            .write()
            .await
            .create_proxy(proxy("app.example.com"))
            .await
            .unwrap();
        f.reconciler.apply(&mut route).await.unwrap();

        let active = f.dir.path().join("sites-enabled").join(render::file_name(route.id));
        let staged = f.dir.path().join("conf.d").join(render::file_name(route.id));
        assert_eq!(
            std::fs::read_to_string(&active).unwrap(),
            std::fs::read_to_string(&staged).unwrap()
        );
        assert_eq!(f.control.tests.load(Ordering::SeqCst), 1);
        assert_eq!(f.control.reloads(), 1);
    }

    #[tokio::test]
    async fn rejected_config_is_not_reloaded_and_previous_file_returns() {
        let f = fixture();
        let mut route = f
            .store
            .write()
            .await
            .create_proxy(proxy("app.example.com"))
            .await
            .unwrap();
        f.reconciler.apply(&mut route).await.unwrap();
        let active = f.dir.path().join("sites-enabled").join(render::file_name(route.id));
        let working = std::fs::read_to_string(&active).unwrap();

        f.control.reject_config.store(true, Ordering::SeqCst);
        route.target_url = "http://127.0.0.1:4000".to_string();
        assert!(matches!(
            f.reconciler.apply(&mut route).await,
            Err(Error::InvalidProxyConfig(_))
        ));
        assert_eq!(f.control.reloads(), 1);
        assert_eq!(std::fs::read_to_string(&active).unwrap(), working);
    }

    #[tokio::test]
    async fn reload_failure_is_a_conflict() {
        let f = fixture();
        f.control.fail_reload.store(true, Ordering::SeqCst);
        let mut route = f
            .store
            .write()
            .await
            .create_proxy(proxy("app.example.com"))
            .await
            .unwrap();
        assert!(matches!(
            f.reconciler.apply(&mut route).await,
            Err(Error::ReconciliationConflict(_))
        ));
    }

    #[tokio::test]
    async fn remove_deletes_both_files() {
        let f = fixture();
        let mut route = f
            .store
            .write()
            .await
            .create_proxy(proxy("app.example.com"))
            .await
            .unwrap();
        f.reconciler.apply(&mut route).await.unwrap();
        f.reconciler.remove(route.id).await.unwrap();
        assert!(!f
            .dir
            .path()
            .join("sites-enabled")
            .join(render::file_name(route.id))
            .exists());
        assert!(!f
            .dir
            .path()
            .join("conf.d")
            .join(render::file_name(route.id))
            .exists());
        assert_eq!(f.control.reloads(), 2);
    }
}
