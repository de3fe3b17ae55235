use crate::dns::allow_list::AllowList;
use crate::dns::provider::Providers;
use crate::dns::public_ip::DynResolver;
use crate::error::Error;
use crate::model::{ConfigStatus, UpdateResult};
use crate::store::DynStore;
use std::net::IpAddr;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Brings DNS records in line with the host's current public address.
pub struct UpdateEngine {
    store: DynStore,
    resolver: DynResolver,
    providers: Providers,
}

impl UpdateEngine {
    #[must_use]
    pub fn new(store: DynStore, resolver: DynResolver, providers: Providers) -> Self {
        UpdateEngine {
            store,
            resolver,
            providers,
        }
    }

    /// The address the public IP services currently report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalService`] if every service failed.
    pub async fn public_ip(&self) -> Result<IpAddr, Error> {
        self.resolver.resolve().await
    }

    /// Update one record. Succeeds without contacting the provider when the observed address
    /// is already the record's current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InactiveConfig`]/[`Error::InactiveRecord`] for deactivated entities,
    /// [`Error::IpNotAllowed`] when the observed address is outside the record's allow-list
    /// and [`Error::ExternalService`] for resolver or provider failures.
    pub async fn update_one(&self, record_id: u64) -> Result<UpdateResult, Error> {
        let (record, config) = {
            let store = self.store.read().await;
            let record = store.get_dns_record(record_id).await?;
            let config = store.get_dns_config(record.config_id).await?;
            (record, config)
        };
        if !config.is_active {
            return Err(Error::InactiveConfig(config.id));
        }
        if !record.is_active {
            return Err(Error::InactiveRecord(record.id));
        }

        let ip = self.resolver.resolve().await?;
        if !AllowList::parse(&record.allowed_ip_ranges)?.allows(ip) {
            return Err(Error::IpNotAllowed {
                ip,
                ranges: record.allowed_ip_ranges,
            });
        }

        let observed = ip.to_string();
        if record.current_ip.as_deref() == Some(observed.as_str()) {
            debug!("{} already points at {observed}", record.fqdn(&config.domain));
            return Ok(UpdateResult {
                record_id,
                success: true,
                message: UpdateResult::UNCHANGED.to_string(),
                new_ip: Some(observed),
                updated_at: None,
            });
        }

        let message = self
            .providers
            .client(config.provider)
            .push(&config, &record, ip)
            .await?;
        info!(
            "{} updated to {observed} via {}",
            record.fqdn(&config.domain),
            config.provider
        );

        let now = OffsetDateTime::now_utc();
        {
            // Re-read so edits made while the provider call was in flight are kept.
            let mut store = self.store.write().await;
            let mut record = store.get_dns_record(record_id).await?;
            record.current_ip = Some(observed.clone());
            record.last_update = Some(now);
            store.update_dns_record(&record).await?;

            match store.get_dns_config(config.id).await {
                Ok(mut config) => {
                    config.last_ip = Some(observed.clone());
                    config.last_update = Some(now);
                    if let Err(err) = store.update_dns_config(&config).await {
                        warn!("failed to record last update on config {}: {err}", config.id);
                    }
                }
                Err(err) => warn!("failed to record last update on config {}: {err}", config.id),
            }
        }

        Ok(UpdateResult {
            record_id,
            success: true,
            message,
            new_ip: Some(observed),
            updated_at: Some(now),
        })
    }

    /// Update every active record of every active configuration. Failures are reported per
    /// record rather than aborting the sweep.
    ///
    /// # Errors
    ///
    /// Returns store errors from listing configurations.
    pub async fn update_all(&self) -> Result<Vec<UpdateResult>, Error> {
        let mut record_ids = Vec::new();
        let mut results = Vec::new();
        {
            let store = self.store.read().await;
            for config in store.list_dns_configs().await? {
                if !config.is_active {
                    continue;
                }
                match store.list_dns_records(config.id).await {
                    Ok(records) => record_ids.extend(
                        records
                            .into_iter()
                            .filter(|r| r.is_active)
                            .map(|r| r.id),
                    ),
                    Err(err) => results.push(UpdateResult::failed(
                        0,
                        format!("Failed to get records for config {}: {err}", config.id),
                    )),
                }
            }
        }

        for record_id in record_ids {
            let result = match self.update_one(record_id).await {
                Ok(result) => result,
                Err(err) => {
                    warn!("update of record {record_id} failed: {err}");
                    UpdateResult::failed(
                        record_id,
                        format!("Failed to update record {record_id}: {err}"),
                    )
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Every configuration with its records.
    ///
    /// # Errors
    ///
    /// Returns store errors from listing configurations.
    pub async fn status(&self) -> Result<Vec<ConfigStatus>, Error> {
        let store = self.store.read().await;
        let mut statuses = Vec::new();
        for config in store.list_dns_configs().await? {
            let records = store.list_dns_records(config.id).await.unwrap_or_else(|err| {
                warn!("failed to list records for config {}: {err}", config.id);
                Vec::new()
            });
            statuses.push(ConfigStatus {
                config_id: config.id,
                domain: config.domain,
                provider: config.provider,
                is_active: config.is_active,
                last_update: config.last_update,
                last_ip: config.last_ip,
                record_count: records.len(),
                records,
            });
        }
        Ok(statuses)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FixedResolver;
    use super::*;
    use crate::dns::provider::testing::RecordingClient;
    use crate::model::{DnsProvider, DnsRecord};
    use crate::store::memory::fixtures::{dns_config, dns_record};
    use crate::store::{shared, InMemoryStore};
    use std::sync::Arc;

    struct Fixture {
        store: DynStore,
        resolver: Arc<FixedResolver>,
        namecheap: Arc<RecordingClient>,
        engine: UpdateEngine,
    }

    fn fixture(ip: &str) -> Fixture {
        let store = shared(InMemoryStore::default());
        let resolver = Arc::new(FixedResolver::new(ip));
        let namecheap = Arc::new(RecordingClient::default());
        let engine = UpdateEngine::new(
            store.clone(),
            resolver.clone(),
            Providers::new(namecheap.clone()),
        );
        Fixture {
            store,
            resolver,
            namecheap,
            engine,
        }
    }

    async fn record(
        f: &Fixture,
        provider: DnsProvider,
        edit: impl FnOnce(&mut DnsRecord),
    ) -> DnsRecord {
        let mut store = f.store.write().await;
        let config = store
            .create_dns_config(dns_config(provider, "example.com"))
            .await
            .unwrap();
        let mut record = dns_record(config.id, "app");
        edit(&mut record);
        store.create_dns_record(record).await.unwrap()
    }

    #[tokio::test]
    async fn second_update_is_a_no_op() {
        let f = fixture("203.0.113.7");
        let rec = record(&f, DnsProvider::Namecheap, |_| {}).await;

        let first = f.engine.update_one(rec.id).await.unwrap();
        assert!(first.success);
        assert!(!first.is_unchanged());
        assert_eq!(first.new_ip.as_deref(), Some("203.0.113.7"));

        let second = f.engine.update_one(rec.id).await.unwrap();
        assert!(second.is_unchanged());
        assert_eq!(f.namecheap.calls(), 1);

        let store = f.store.read().await;
        let stored = store.get_dns_record(rec.id).await.unwrap();
        assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.7"));
        assert!(stored.last_update.is_some());
        let config = store.get_dns_config(rec.config_id).await.unwrap();
        assert_eq!(config.last_ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn address_outside_allow_list_is_never_pushed() {
        let f = fixture("192.168.1.5");
        let rec = record(&f, DnsProvider::Namecheap, |r| {
            r.allowed_ip_ranges = "10.0.0.0/24".to_string();
        })
        .await;
        assert!(matches!(
            f.engine.update_one(rec.id).await,
            Err(Error::IpNotAllowed { .. })
        ));
        assert_eq!(f.namecheap.calls(), 0);

        f.resolver.set("10.0.0.9");
        assert!(f.engine.update_one(rec.id).await.unwrap().success);
        assert_eq!(f.namecheap.calls(), 1);
    }

    #[tokio::test]
    async fn inactive_entities_fail_fast() {
        let f = fixture("203.0.113.7");
        let rec = record(&f, DnsProvider::Namecheap, |r| r.is_active = false).await;
        assert!(matches!(
            f.engine.update_one(rec.id).await,
            Err(Error::InactiveRecord(id)) if id == rec.id
        ));

        let rec = record(&f, DnsProvider::Namecheap, |_| {}).await;
        {
            let mut store = f.store.write().await;
            let mut config = store.get_dns_config(rec.config_id).await.unwrap();
            config.is_active = false;
            store.update_dns_config(&config).await.unwrap();
        }
        assert!(matches!(
            f.engine.update_one(rec.id).await,
            Err(Error::InactiveConfig(_))
        ));
        assert_eq!(f.resolver.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(f.namecheap.calls(), 0);
    }

    #[tokio::test]
    async fn static_zone_records_without_network() {
        let f = fixture("203.0.113.7");
        let rec = record(&f, DnsProvider::Static, |_| {}).await;
        let result = f.engine.update_one(rec.id).await.unwrap();
        assert_eq!(result.message, "Static DNS record updated successfully");
        assert_eq!(f.namecheap.calls(), 0);
        let stored = f.store.read().await.get_dns_record(rec.id).await.unwrap();
        assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn provider_failure_leaves_record_untouched() {
        let f = fixture("203.0.113.7");
        f.namecheap
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let rec = record(&f, DnsProvider::Namecheap, |_| {}).await;
        match f.engine.update_one(rec.id).await {
            Err(Error::ExternalService { message, .. }) => {
                assert!(message.contains("[316153] Passwords do not match"));
            }
            other => panic!("expected provider failure, got {other:?}"),
        }
        let stored = f.store.read().await.get_dns_record(rec.id).await.unwrap();
        assert!(stored.current_ip.is_none());
    }

    #[tokio::test]
    async fn update_all_reports_each_active_record() {
        let f = fixture("192.168.1.5");
        let ok = record(&f, DnsProvider::Static, |_| {}).await;
        let blocked = record(&f, DnsProvider::Namecheap, |r| {
            r.allowed_ip_ranges = "10.0.0.0/24".to_string();
        })
        .await;
        record(&f, DnsProvider::Static, |r| r.is_active = false).await;

        let results = f.engine.update_all().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.record_id == ok.id && r.success));
        assert!(results
            .iter()
            .any(|r| r.record_id == blocked.id && !r.success));

        let status = f.engine.status().await.unwrap();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| s.record_count == 1));
    }
}
