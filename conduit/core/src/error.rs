//! Proxy Errors
//!
//! Setup-time failures. Failures that happen once a proxy is running are
//! never returned to callers; they reach the owner as
//! `Listener::on_channel_error`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors from building schedulers, proxies, and their configuration
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The transport could not be constructed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A runtime or thread could not be created
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
