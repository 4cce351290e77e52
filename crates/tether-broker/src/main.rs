//! `tether-broker` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP
//! server. Production deployments plug in a real state store; without one
//! the broker runs on in-memory storage and refuses to start outside
//! debug mode.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use tether_broker::config::Config;
use tether_broker::server::Server;
use tether_core::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    if !config.debug {
        anyhow::bail!(
            "no state store backend is wired into this binary yet; \
             run with TETHER_DEBUG=true for the in-memory store"
        );
    }
    tracing::warn!("using in-memory state store (debug only)");

    let server = Server::new(config);
    server.serve().await?;
    Ok(())
}
