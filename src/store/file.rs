//! A JSON file-backed implementation of the [`Store`][super::Store] trait.
//!
//! Wraps a [`InMemoryStore`][super::memory::InMemoryStore] instance, persisting
//! updates to a JSON file on disk that can be reloaded across restarts.
use crate::error::Error;
use crate::model::{Certificate, DnsConfig, DnsRecord, ProxyRoute};
use crate::secret::SecretCodec;
use crate::store::memory::InMemoryStore;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// On-disk layout. DNS provider passwords never appear in `state`; they are kept encrypted in
/// `dns_secrets`, keyed by configuration id.
#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    state: InMemoryStore,
    #[serde(default)]
    dns_secrets: BTreeMap<u64, String>,
}

/// A file-backed store. After each mutation a JSON file on disk is rewritten with the new data.
/// This file is reloaded on startup to avoid losing state.
///
/// Wraps a [`InMemoryStore`][super::memory::InMemoryStore], operating the same way except
/// for maintaining state beyond in-memory.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct FileStore {
    store: InMemoryStore,
    codec: SecretCodec,
    path: String,
}

impl FileStore {
    /// Save the state of the store as JSON to the store's configured path, or return an Error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the state can't be serialized to JSON.
    ///
    /// Returns [`Error::IO`] if the serialized state can't be written to the backing file path.
    pub async fn save(&self) -> Result<(), Error> {
        let mut dns_secrets = BTreeMap::new();
        for config in self.store.dns_configs() {
            dns_secrets.insert(config.id, self.codec.encrypt(&config.password)?);
        }
        let data = serde_json::to_string_pretty(&PersistedState {
            state: self.store.clone(),
            dns_secrets,
        })?;
        let mut output_file = File::create(&self.path).await?;
        output_file.write_all(data.as_bytes()).await?;
        output_file.flush().await?;
        Ok(())
    }

    /// Load a [`FileStore`] from the JSON state located at the given path, or return an Error.
    /// A missing file is created with empty state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the JSON state file is invalid.
    ///
    /// Returns [`Error::Validation`] if a stored DNS password can't be decrypted with `codec`.
    ///
    /// Returns [`Error::IO`] if the path can't be opened or read.
    pub async fn try_from_file(p: &str, codec: SecretCodec) -> Result<Self, Error> {
        let persisted: PersistedState = match File::open(p).await {
            Ok(mut f) => {
                let mut buf = vec![];
                f.read_to_end(&mut buf).await?;
                serde_json::from_slice(&buf)?
            }
            Err(err) if err.kind() == ErrorKind::NotFound => PersistedState::default(),
            Err(err) => return Err(Error::IO(err)),
        };

        let PersistedState {
            state: mut store,
            dns_secrets,
        } = persisted;
        for config in store.dns_configs_mut() {
            if let Some(sealed) = dns_secrets.get(&config.id) {
                config.password = codec.decrypt(sealed)?;
            }
        }

        let file_store = Self {
            store,
            codec,
            path: p.to_string(),
        };
        file_store.save().await?;
        Ok(file_store)
    }
}

#[async_trait::async_trait]
impl Store for FileStore {
    async fn list_proxies(&self) -> Result<Vec<ProxyRoute>, Error> {
        self.store.list_proxies().await
    }

    async fn get_proxy(&self, id: u64) -> Result<ProxyRoute, Error> {
        self.store.get_proxy(id).await
    }

    async fn proxies_by_domain(&self, domain: &str) -> Result<Vec<ProxyRoute>, Error> {
        self.store.proxies_by_domain(domain).await
    }

    async fn create_proxy(&mut self, proxy: ProxyRoute) -> Result<ProxyRoute, Error> {
        let created = self.store.create_proxy(proxy).await?;
        self.save().await?;
        Ok(created)
    }

    async fn update_proxy(&mut self, proxy: &ProxyRoute) -> Result<ProxyRoute, Error> {
        let updated = self.store.update_proxy(proxy).await?;
        self.save().await?;
        Ok(updated)
    }

    async fn delete_proxy(&mut self, id: u64) -> Result<ProxyRoute, Error> {
        let deleted = self.store.delete_proxy(id).await?;
        self.save().await?;
        Ok(deleted)
    }

    async fn list_certificates(&self) -> Result<Vec<Certificate>, Error> {
        self.store.list_certificates().await
    }

    async fn get_certificate(&self, id: u64) -> Result<Certificate, Error> {
        self.store.get_certificate(id).await
    }

    async fn certificate_by_domain(&self, domain: &str) -> Result<Option<Certificate>, Error> {
        self.store.certificate_by_domain(domain).await
    }

    async fn create_certificate(&mut self, cert: Certificate) -> Result<Certificate, Error> {
        let created = self.store.create_certificate(cert).await?;
        self.save().await?;
        Ok(created)
    }

    async fn update_certificate(&mut self, cert: &Certificate) -> Result<Certificate, Error> {
        let updated = self.store.update_certificate(cert).await?;
        self.save().await?;
        Ok(updated)
    }

    async fn delete_certificate(&mut self, id: u64) -> Result<Certificate, Error> {
        let deleted = self.store.delete_certificate(id).await?;
        self.save().await?;
        Ok(deleted)
    }

    async fn list_dns_configs(&self) -> Result<Vec<DnsConfig>, Error> {
        self.store.list_dns_configs().await
    }

    async fn get_dns_config(&self, id: u64) -> Result<DnsConfig, Error> {
        self.store.get_dns_config(id).await
    }

    async fn create_dns_config(&mut self, config: DnsConfig) -> Result<DnsConfig, Error> {
        let created = self.store.create_dns_config(config).await?;
        self.save().await?;
        Ok(created)
    }

    async fn update_dns_config(&mut self, config: &DnsConfig) -> Result<DnsConfig, Error> {
        let updated = self.store.update_dns_config(config).await?;
        self.save().await?;
        Ok(updated)
    }

    async fn delete_dns_config(&mut self, id: u64) -> Result<(DnsConfig, Vec<DnsRecord>), Error> {
        let deleted = self.store.delete_dns_config(id).await?;
        self.save().await?;
        Ok(deleted)
    }

    async fn list_dns_records(&self, config_id: u64) -> Result<Vec<DnsRecord>, Error> {
        self.store.list_dns_records(config_id).await
    }

    async fn get_dns_record(&self, id: u64) -> Result<DnsRecord, Error> {
        self.store.get_dns_record(id).await
    }

    async fn dns_record_for_domain(&self, domain: &str) -> Result<Option<DnsRecord>, Error> {
        self.store.dns_record_for_domain(domain).await
    }

    async fn create_dns_record(&mut self, record: DnsRecord) -> Result<DnsRecord, Error> {
        let created = self.store.create_dns_record(record).await?;
        self.save().await?;
        Ok(created)
    }

    async fn update_dns_record(&mut self, record: &DnsRecord) -> Result<DnsRecord, Error> {
        let updated = self.store.update_dns_record(record).await?;
        self.save().await?;
        Ok(updated)
    }

    async fn delete_dns_record(&mut self, id: u64) -> Result<DnsRecord, Error> {
        let deleted = self.store.delete_dns_record(id).await?;
        self.save().await?;
        Ok(deleted)
    }
}
