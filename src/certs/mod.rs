//! TLS certificate lifecycle.
//!
//! [`CertificateManager`] issues certificates through a [`CertificateIssuer`] (in production an
//! [`AcmeIssuer`] answering HTTP-01 challenges, preceded in production by a [`DomainCheck`]),
//! stores them with a [`CertStoreWriter`] and
//! renews them once the deployed file is within [`RENEWAL_WINDOW_DAYS`] of expiry.

pub mod acme;
pub mod manager;
pub mod pem;
pub mod preflight;
pub mod writer;

pub use acme::{AcmeIssuer, CertificateIssuer, DynIssuer, Http01Webroot, IssuedCertificate};
pub use manager::{CertificateManager, RENEWAL_WINDOW_DAYS};
pub use preflight::{DomainCheck, DynDomainCheck, HttpDomainCheck};
pub use writer::{CertStoreWriter, StoredPair};
