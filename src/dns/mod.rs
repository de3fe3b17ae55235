//! Dynamic DNS.
//!
//! [`UpdateEngine`] resolves the host's public address with a [`PublicIpResolver`], checks it
//! against the record's [`AllowList`] and hands it to the zone's provider client. A record that
//! already points at the observed address is left alone, so updates are safe to repeat from
//! both the per-record [`Scheduler`][crate::scheduler::Scheduler] jobs and the global sweep.

pub mod allow_list;
pub mod engine;
pub mod namecheap;
pub mod provider;
pub mod public_ip;

pub use allow_list::AllowList;
pub use engine::UpdateEngine;
pub use namecheap::NamecheapClient;
pub use provider::{DynProviderClient, ProviderClient, Providers, StaticClient};
pub use public_ip::{DynResolver, HttpPublicIpResolver, PublicIpResolver};
