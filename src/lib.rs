//! proxycrab
//!
//! A small control plane for a self-hosted nginx reverse proxy.
//!
//! * Certificates are issued and renewed over [ACME] HTTP-01 and written to disk atomically:
//!   staged, verified, copied into place and verified again.
//! * Proxy routes are rendered into nginx server blocks, validated with `nginx -t` and only then
//!   reloaded. Routes whose certificate files are unusable are served over plain HTTP rather
//!   than breaking the whole configuration.
//! * Dynamic DNS records follow the host's public IP address, each on its own schedule, and are
//!   pushed to Namecheap's dynamic DNS endpoint when the address changes and is allowed.
//!
//! [ACME]: https://www.rfc-editor.org/rfc/rfc8555
#![warn(clippy::pedantic)]

pub mod api;
pub mod certs;
pub mod config;
pub mod control;
#[doc(hidden)]
pub mod crab;
pub mod dns;
pub mod error;
pub mod model;
pub mod nginx;
pub mod scheduler;
pub mod secret;
pub mod store;

pub use api::new as new_http;
pub use config::{Config, SharedConfig};
pub use control::ControlPlane;
pub use scheduler::Scheduler;
pub use store::{DynStore, FileStore, InMemoryStore};
