//! Reverse proxy configuration management for nginx.
//!
//! [`render`] turns a stored route into a virtual host, [`Reconciler`] moves it into the active
//! configuration directory and drives nginx through a [`ProxyServerControl`].

pub mod command;
pub mod reconciler;
pub mod render;

pub use command::{CommandOutcome, DynControl, NginxCommand, ProxyServerControl};
pub use reconciler::Reconciler;
