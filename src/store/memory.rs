use crate::error::Error;
use crate::model::{Certificate, DnsConfig, DnsRecord, ProxyRoute};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryStore {
    next_id: u64,
    proxies: BTreeMap<u64, ProxyRoute>,
    certificates: BTreeMap<u64, Certificate>,
    dns_configs: BTreeMap<u64, DnsConfig>,
    dns_records: BTreeMap<u64, DnsRecord>,
}

impl InMemoryStore {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn dns_configs_mut(&mut self) -> impl Iterator<Item = &mut DnsConfig> {
        self.dns_configs.values_mut()
    }

    pub(super) fn dns_configs(&self) -> impl Iterator<Item = &DnsConfig> {
        self.dns_configs.values()
    }
}

fn replace<T: Clone>(
    map: &mut BTreeMap<u64, T>,
    kind: &'static str,
    id: u64,
    value: T,
) -> Result<T, Error> {
    match map.get_mut(&id) {
        Some(slot) => {
            *slot = value;
            Ok(slot.clone())
        }
        None => Err(Error::not_found(kind, id)),
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn list_proxies(&self) -> Result<Vec<ProxyRoute>, Error> {
        Ok(self.proxies.values().cloned().collect())
    }

    async fn get_proxy(&self, id: u64) -> Result<ProxyRoute, Error> {
        self.proxies
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("proxy", id))
    }

    async fn proxies_by_domain(&self, domain: &str) -> Result<Vec<ProxyRoute>, Error> {
        Ok(self
            .proxies
            .values()
            .filter(|p| p.domain.eq_ignore_ascii_case(domain))
            .cloned()
            .collect())
    }

    async fn create_proxy(&mut self, mut proxy: ProxyRoute) -> Result<ProxyRoute, Error> {
        if !self.proxies_by_domain(&proxy.domain).await?.is_empty() {
            return Err(Error::Validation(format!(
                "a proxy for {} already exists",
                proxy.domain
            )));
        }
        let now = OffsetDateTime::now_utc();
        proxy.id = self.allocate_id();
        proxy.created_at = now;
        proxy.updated_at = now;
        self.proxies.insert(proxy.id, proxy.clone());
        Ok(proxy)
    }

    async fn update_proxy(&mut self, proxy: &ProxyRoute) -> Result<ProxyRoute, Error> {
        let clash = self
            .proxies
            .values()
            .any(|p| p.id != proxy.id && p.domain.eq_ignore_ascii_case(&proxy.domain));
        if clash {
            return Err(Error::Validation(format!(
                "a proxy for {} already exists",
                proxy.domain
            )));
        }
        let mut proxy = proxy.clone();
        proxy.updated_at = OffsetDateTime::now_utc();
        replace(&mut self.proxies, "proxy", proxy.id, proxy)
    }

    async fn delete_proxy(&mut self, id: u64) -> Result<ProxyRoute, Error> {
        self.proxies
            .remove(&id)
            .ok_or_else(|| Error::not_found("proxy", id))
    }

    async fn list_certificates(&self) -> Result<Vec<Certificate>, Error> {
        Ok(self.certificates.values().cloned().collect())
    }

    async fn get_certificate(&self, id: u64) -> Result<Certificate, Error> {
        self.certificates
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("certificate", id))
    }

    async fn certificate_by_domain(&self, domain: &str) -> Result<Option<Certificate>, Error> {
        Ok(self
            .certificates
            .values()
            .find(|c| c.domain.eq_ignore_ascii_case(domain))
            .cloned())
    }

    async fn create_certificate(&mut self, mut cert: Certificate) -> Result<Certificate, Error> {
        if self.certificate_by_domain(&cert.domain).await?.is_some() {
            return Err(Error::Validation(format!(
                "a certificate for {} already exists",
                cert.domain
            )));
        }
        let now = OffsetDateTime::now_utc();
        cert.id = self.allocate_id();
        cert.created_at = now;
        cert.updated_at = now;
        self.certificates.insert(cert.id, cert.clone());
        Ok(cert)
    }

    async fn update_certificate(&mut self, cert: &Certificate) -> Result<Certificate, Error> {
        let mut cert = cert.clone();
        cert.updated_at = OffsetDateTime::now_utc();
        replace(&mut self.certificates, "certificate", cert.id, cert)
    }

    async fn delete_certificate(&mut self, id: u64) -> Result<Certificate, Error> {
        self.certificates
            .remove(&id)
            .ok_or_else(|| Error::not_found("certificate", id))
    }

    async fn list_dns_configs(&self) -> Result<Vec<DnsConfig>, Error> {
        Ok(self.dns_configs.values().cloned().collect())
    }

    async fn get_dns_config(&self, id: u64) -> Result<DnsConfig, Error> {
        self.dns_configs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("DNS configuration", id))
    }

    async fn create_dns_config(&mut self, mut config: DnsConfig) -> Result<DnsConfig, Error> {
        let now = OffsetDateTime::now_utc();
        config.id = self.allocate_id();
        config.created_at = now;
        config.updated_at = now;
        self.dns_configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn update_dns_config(&mut self, config: &DnsConfig) -> Result<DnsConfig, Error> {
        let mut config = config.clone();
        config.updated_at = OffsetDateTime::now_utc();
        replace(&mut self.dns_configs, "DNS configuration", config.id, config)
    }

    async fn delete_dns_config(&mut self, id: u64) -> Result<(DnsConfig, Vec<DnsRecord>), Error> {
        let config = self
            .dns_configs
            .remove(&id)
            .ok_or_else(|| Error::not_found("DNS configuration", id))?;
        let owned: Vec<u64> = self
            .dns_records
            .values()
            .filter(|r| r.config_id == id)
            .map(|r| r.id)
            .collect();
        let records = owned
            .iter()
            .filter_map(|record_id| self.dns_records.remove(record_id))
            .collect();
        Ok((config, records))
    }

    async fn list_dns_records(&self, config_id: u64) -> Result<Vec<DnsRecord>, Error> {
        Ok(self
            .dns_records
            .values()
            .filter(|r| r.config_id == config_id)
            .cloned()
            .collect())
    }

    async fn get_dns_record(&self, id: u64) -> Result<DnsRecord, Error> {
        self.dns_records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("DNS record", id))
    }

    async fn dns_record_for_domain(&self, domain: &str) -> Result<Option<DnsRecord>, Error> {
        Ok(self
            .dns_records
            .values()
            .find(|r| {
                self.dns_configs
                    .get(&r.config_id)
                    .is_some_and(|c| r.fqdn(&c.domain).eq_ignore_ascii_case(domain))
            })
            .cloned())
    }

    async fn create_dns_record(&mut self, mut record: DnsRecord) -> Result<DnsRecord, Error> {
        if !self.dns_configs.contains_key(&record.config_id) {
            return Err(Error::not_found("DNS configuration", record.config_id));
        }
        let now = OffsetDateTime::now_utc();
        record.id = self.allocate_id();
        record.created_at = now;
        record.updated_at = now;
        self.dns_records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_dns_record(&mut self, record: &DnsRecord) -> Result<DnsRecord, Error> {
        let mut record = record.clone();
        record.updated_at = OffsetDateTime::now_utc();
        replace(&mut self.dns_records, "DNS record", record.id, record)
    }

    async fn delete_dns_record(&mut self, id: u64) -> Result<DnsRecord, Error> {
        self.dns_records
            .remove(&id)
            .ok_or_else(|| Error::not_found("DNS record", id))
    }
}
