//! Error types.

use axum::extract::rejection::JsonRejection;
use std::net::IpAddr;

/// Error enumerates the possible proxycrab error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a required setting is missing or unusable, e.g. issuing a certificate
    /// without an [`AcmeConfig::email`][`crate::config::AcmeConfig::email`].
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Returned for malformed operator input, e.g. an unparseable CIDR in an allow-list.
    /// No side effects have been performed when this is returned.
    #[error("validation error: {0}")]
    Validation(String),

    /// Returned when a route, certificate, DNS configuration or DNS record doesn't exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Returned when an ACME directory, public IP service or DNS provider call fails. The
    /// provider's detail is preserved in `message`.
    #[error("{service}: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// Returned when a staged or deployed certificate file doesn't match the length of the
    /// payload that was written. Partial output has been removed.
    #[error("integrity check failed for {path}: wrote {actual} bytes, expected {expected}")]
    Integrity {
        path: String,
        actual: u64,
        expected: u64,
    },

    /// Returned when the proxy server rejects a rendered configuration. The running process
    /// was not reloaded and keeps serving its previous configuration.
    #[error("proxy configuration is invalid: {0}")]
    InvalidProxyConfig(String),

    /// Returned when configuration validated but the reload failed. The files on disk and the
    /// running proxy server may now disagree.
    #[error("proxy configuration validated but reload failed: {0}")]
    ReconciliationConflict(String),

    /// Returned by [`CertificateManager::renew`][`crate::certs::CertificateManager::renew`] when
    /// the deployed certificate is outside the renewal window.
    #[error("certificate is not due for renewal ({days_remaining} days remaining)")]
    NotDueForRenewal { days_remaining: i64 },

    /// Returned when updating a record that belongs to a deactivated DNS configuration.
    #[error("DNS configuration {0} is not active")]
    InactiveConfig(u64),

    /// Returned when updating a deactivated DNS record.
    #[error("DNS record {0} is not active")]
    InactiveRecord(u64),

    /// Returned when the resolved public IP falls outside every range in the record's
    /// allow-list. The provider was not contacted.
    #[error("current IP {ip} is not in the allowed ranges: {ranges}")]
    IpNotAllowed { ip: IpAddr, ranges: String },

    /// Returned when the [`Config::api_bind_addr`][`crate::config::Config::api_bind_addr`] is
    /// not a loopback address, or an address within a private network space. The HTTP API
    /// performs no authentication of its own and must only be reachable on private networks.
    #[error("API bind address ({0}) must be a loopback or private IP")]
    InsecureAPIBind(IpAddr),

    /// Returned when clients `POST` invalid JSON.
    #[error(transparent)]
    JsonExtractorRejection(#[from] JsonRejection),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred: {0}")]
    IO(#[from] std::io::Error),

    /// Returned when processing JSON from disk (e.g.
    /// [loading a `Config`][crate::config::Config::try_from_file], or
    /// [loading a `FileStore`][crate::store::file::FileStore::try_from_file]) fails
    /// due to invalid JSON content.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn external(service: &'static str, message: impl ToString) -> Self {
        Error::ExternalService {
            service,
            message: message.to_string(),
        }
    }
}
