//! Persisted entities and the result types returned to operators.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Active,
    Inactive,
    Error,
}

/// A reverse proxy route served by nginx for a single `domain`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub id: u64,
    pub name: String,
    pub domain: String,
    pub target_url: String,
    pub ssl_enabled: bool,
    /// Public certificate file actually referenced by the rendered configuration.
    #[serde(default)]
    pub ssl_path: Option<String>,
    #[serde(default)]
    pub ws_enabled: bool,
    #[serde(default)]
    pub status: ProxyStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub id: u64,
    pub domain: String,
    pub cert_path: String,
    pub key_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub is_valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    Namecheap,
    Static,
}

impl fmt::Display for DnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsProvider::Namecheap => f.write_str("namecheap"),
            DnsProvider::Static => f.write_str("static"),
        }
    }
}

/// Provider account for a DNS zone. `password` is held decrypted in memory only; stores that
/// persist it run it through the [`SecretCodec`][crate::secret::SecretCodec].
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DnsConfig {
    pub id: u64,
    pub provider: DnsProvider,
    pub domain: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    #[serde(default)]
    pub last_ip: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl fmt::Debug for DnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsConfig")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("last_update", &self.last_update)
            .field("last_ip", &self.last_ip)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub id: u64,
    pub config_id: u64,
    /// Subdomain token, `@` for the zone root.
    pub host: String,
    #[serde(default)]
    pub current_ip: Option<String>,
    /// Comma separated IPs and CIDRs. Empty means any address may be pushed.
    #[serde(default)]
    pub allowed_ip_ranges: String,
    /// Minutes between scheduled updates.
    #[serde(default)]
    pub dynamic_refresh_rate: Option<i64>,
    #[serde(default)]
    pub include_backend: bool,
    #[serde(default)]
    pub backend_url: Option<String>,
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DnsRecord {
    /// The fully qualified name this record updates within `zone`.
    #[must_use]
    pub fn fqdn(&self, zone: &str) -> String {
        match self.host.trim() {
            "" | "@" => zone.to_string(),
            host => format!("{host}.{zone}"),
        }
    }

    /// The refresh interval in minutes, if one is set and positive.
    #[must_use]
    pub fn refresh_minutes(&self) -> Option<u64> {
        self.dynamic_refresh_rate
            .filter(|rate| *rate > 0)
            .and_then(|rate| u64::try_from(rate).ok())
    }
}

/// Outcome of a single dynamic DNS update.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub record_id: u64,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_ip: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl UpdateResult {
    pub const UNCHANGED: &'static str = "unchanged";

    pub(crate) fn failed(record_id: u64, message: impl ToString) -> Self {
        UpdateResult {
            record_id,
            success: false,
            message: message.to_string(),
            new_ip: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.success && self.message == Self::UNCHANGED
    }
}

/// Summary of one DNS configuration and its records.
#[derive(Serialize, Debug, Clone)]
pub struct ConfigStatus {
    pub config_id: u64,
    pub domain: String,
    pub provider: DnsProvider,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    pub last_ip: Option<String>,
    pub record_count: usize,
    pub records: Vec<DnsRecord>,
}
