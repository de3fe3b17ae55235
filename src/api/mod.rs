//! HTTP API for operating the control plane.
//!
//! All responses are JSON. Errors are returned as `{"error": "..."}` with a status code that
//! reflects the [`Error`][crate::error::Error] variant: validation problems are `400`, unknown
//! ids `404`, deactivated DNS state `409`, configurations nginx rejects `422` and failures of an
//! outside service (ACME, public IP lookup, DNS provider) `502`.
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the service is operational.
//!
//! ## `/api/v1/proxies` (GET, POST)
//!
//!   Lists routes, or creates one from a body of the form:
//!
//!   ```json
//!   { "name": "app", "domain": "app.example.com", "target_url": "http://127.0.0.1:3000", "ssl_enabled": true }
//!   ```
//!
//!   When `ssl_enabled` is requested the response carries `ssl_status` (`certificate_generated`
//!   or `certificate_failed`) and an `ssl_message`. A route is created even when no certificate
//!   could be obtained.
//!
//! ## `/api/v1/proxies/:id` (GET, PUT, DELETE)
//!
//!   `PUT` accepts any subset of the creation fields.
//!
//! ## `/api/v1/proxies/:id/certificate` (GET), `/api/v1/proxies/:id/regenerate` (POST)
//!
//! ## `/api/v1/certificates` (GET, POST)
//!
//!   `POST {"domain": "app.example.com"}` issues a certificate over ACME HTTP-01 and enables
//!   SSL on every route for that domain.
//!
//! ## `/api/v1/certificates/import` (POST)
//!
//!   Registers an existing pair: `{"domain": "...", "cert_path": "...", "key_path": "..."}`.
//!
//! ## `/api/v1/certificates/:id` (GET, DELETE)
//!
//! ## `/api/v1/certificates/:id/{renew,info,expiry,proxies}`
//!
//!   `renew` (POST) answers `400` while the certificate has more than 30 days left.
//!
//! ## `/api/v1/dns/configs` (GET, POST), `/api/v1/dns/configs/:id` (GET, PUT, DELETE)
//!
//! ## `/api/v1/dns/configs/:id/records` (GET), `/api/v1/dns/records` (POST)
//!
//! ## `/api/v1/dns/records/:id` (GET, PUT, DELETE), `/api/v1/dns/records/:id/update` (POST)
//!
//! ## `/api/v1/dns/update-all` (POST), `/api/v1/dns/status` (GET), `/api/v1/dns/public-ip` (GET)
//!
//! ## `/api/v1/dns/jobs` (GET), `/api/v1/dns/jobs/:record_id/{pause,resume}` (POST)
//!
//! ## `/api/v1/nginx/validate` (POST), `/api/v1/nginx/reload` (POST)

mod api_error;
mod model;
mod routes;
pub mod server;

pub use server::new;
