use crate::dns::namecheap::NamecheapClient;
use crate::error::Error;
use crate::model::{DnsConfig, DnsProvider, DnsRecord};
use std::net::IpAddr;
use std::sync::Arc;

/// Pushes a new address for a record to wherever its zone is hosted. Returns a message for the
/// operator on success.
#[async_trait::async_trait]
pub trait ProviderClient {
    async fn push(&self, config: &DnsConfig, record: &DnsRecord, ip: IpAddr)
        -> Result<String, Error>;
}

pub type DynProviderClient = Arc<dyn ProviderClient + Send + Sync>;

#[async_trait::async_trait]
impl ProviderClient for NamecheapClient {
    async fn push(
        &self,
        config: &DnsConfig,
        record: &DnsRecord,
        ip: IpAddr,
    ) -> Result<String, Error> {
        self.update(&record.host, &config.domain, &config.password, ip)
            .await?;
        Ok("DNS record updated successfully".to_string())
    }
}

/// Zones managed by hand: nothing is sent anywhere, the observed address is only recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticClient;

#[async_trait::async_trait]
impl ProviderClient for StaticClient {
    async fn push(&self, _: &DnsConfig, _: &DnsRecord, _: IpAddr) -> Result<String, Error> {
        Ok("Static DNS record updated successfully".to_string())
    }
}

/// One client per [`DnsProvider`] variant, so adding a provider is a compile error until it
/// has a client.
#[derive(Clone)]
pub struct Providers {
    pub namecheap: DynProviderClient,
    pub static_zone: DynProviderClient,
}

impl Providers {
    #[must_use]
    pub fn new(namecheap: DynProviderClient) -> Self {
        Providers {
            namecheap,
            static_zone: Arc::new(StaticClient),
        }
    }

    #[must_use]
    pub fn client(&self, provider: DnsProvider) -> &DynProviderClient {
        match provider {
            DnsProvider::Namecheap => &self.namecheap,
            DnsProvider::Static => &self.static_zone,
        }
    }
}
