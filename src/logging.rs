//! Log output setup
//!
//! The crate itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

use crate::error::{AgentError, Result};

/// Install a formatting subscriber writing to stderr
///
/// `RUST_LOG` takes precedence over `default_filter`. Stdout is left alone
/// because it often carries JSON Lines traffic. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| AgentError::invalid_config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AgentError::invalid_config(format!("Logging already initialized: {}", e)))
}
