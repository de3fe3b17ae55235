//! Persistence of proxy routes, certificates and dynamic DNS state.
//!
//! Two implementations are provided, [`memory::InMemoryStore`] and [`file::FileStore`]. The
//! former is not durable across restarts. The latter writes its state to disk after each
//! mutation, encrypting DNS provider passwords with a [`SecretCodec`][crate::secret::SecretCodec],
//! and loads this state again on startup.

use crate::error::Error;
use crate::model::{Certificate, DnsConfig, DnsRecord, ProxyRoute};
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod file;
pub mod memory;

#[allow(clippy::module_name_repetitions)]
pub use file::FileStore;
#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryStore;

/// `DynStore` is a type alias for a [`Store`] that can be used by multiple read/write
/// consumers that coordinate through an [`Arc`] and a [`RwLock`] wrapping the [`Store`].
#[allow(clippy::module_name_repetitions)]
pub type DynStore = Arc<RwLock<dyn Store + Send + Sync>>;

/// Wrap a store for sharing between components.
pub fn shared<S: Store + Send + Sync + 'static>(store: S) -> DynStore {
    Arc::new(RwLock::new(store))
}

/// An async trait describing CRUD over every persisted entity.
///
/// `create_*` methods assign the id and timestamps of the value they are given and return the
/// stored value. `update_*` methods replace the stored value with the same id and refresh its
/// `updated_at`. Lookups by id return [`Error::NotFound`] when nothing matches.
#[async_trait::async_trait]
pub trait Store {
    async fn list_proxies(&self) -> Result<Vec<ProxyRoute>, Error>;
    async fn get_proxy(&self, id: u64) -> Result<ProxyRoute, Error>;
    async fn proxies_by_domain(&self, domain: &str) -> Result<Vec<ProxyRoute>, Error>;
    async fn create_proxy(&mut self, proxy: ProxyRoute) -> Result<ProxyRoute, Error>;
    async fn update_proxy(&mut self, proxy: &ProxyRoute) -> Result<ProxyRoute, Error>;
    async fn delete_proxy(&mut self, id: u64) -> Result<ProxyRoute, Error>;

    async fn list_certificates(&self) -> Result<Vec<Certificate>, Error>;
    async fn get_certificate(&self, id: u64) -> Result<Certificate, Error>;
    async fn certificate_by_domain(&self, domain: &str) -> Result<Option<Certificate>, Error>;
    async fn create_certificate(&mut self, cert: Certificate) -> Result<Certificate, Error>;
    async fn update_certificate(&mut self, cert: &Certificate) -> Result<Certificate, Error>;
    async fn delete_certificate(&mut self, id: u64) -> Result<Certificate, Error>;

    async fn list_dns_configs(&self) -> Result<Vec<DnsConfig>, Error>;
    async fn get_dns_config(&self, id: u64) -> Result<DnsConfig, Error>;
    async fn create_dns_config(&mut self, config: DnsConfig) -> Result<DnsConfig, Error>;
    async fn update_dns_config(&mut self, config: &DnsConfig) -> Result<DnsConfig, Error>;
    /// Delete a configuration along with every record it owns.
    async fn delete_dns_config(&mut self, id: u64) -> Result<(DnsConfig, Vec<DnsRecord>), Error>;

    async fn list_dns_records(&self, config_id: u64) -> Result<Vec<DnsRecord>, Error>;
    async fn get_dns_record(&self, id: u64) -> Result<DnsRecord, Error>;
    /// The record whose fully qualified name is `domain`, if any.
    async fn dns_record_for_domain(&self, domain: &str) -> Result<Option<DnsRecord>, Error>;
    async fn create_dns_record(&mut self, record: DnsRecord) -> Result<DnsRecord, Error>;
    async fn update_dns_record(&mut self, record: &DnsRecord) -> Result<DnsRecord, Error>;
    async fn delete_dns_record(&mut self, id: u64) -> Result<DnsRecord, Error>;
}
