//! `tether-agent` binary entrypoint.
//!
//! Wires the broker client, advertiser and instruction poller, then runs
//! until interrupted. The resource snapshot comes from
//! `TETHER_ALLOCATABLE_CPU` / `TETHER_ALLOCATABLE_MEMORY` (and the
//! `TETHER_ALLOCATED_*` pair) until a real metrics collector is plugged
//! into [`tether_agent::ClusterResourceSource`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};

use tether_agent::{
    Advertiser, AgentConfig, BrokerClient, FixedResourceSource, InstructionPoller, LocalRecords,
};
use tether_core::{LogFormat, Quantity, ResourceQuantities, init_logging};

fn quantity_from_env(name: &str, default: &str) -> Result<Quantity> {
    let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
    value.parse().with_context(|| format!("parse {name}"))
}

fn source_from_env() -> Result<FixedResourceSource> {
    let allocatable = ResourceQuantities::new(
        quantity_from_env("TETHER_ALLOCATABLE_CPU", "0")?,
        quantity_from_env("TETHER_ALLOCATABLE_MEMORY", "0")?,
    );
    let allocated = ResourceQuantities::new(
        quantity_from_env("TETHER_ALLOCATED_CPU", "0")?,
        quantity_from_env("TETHER_ALLOCATED_MEMORY", "0")?,
    );
    if allocatable.is_zero() {
        tracing::warn!("allocatable resources are zero; this cluster will never be chosen");
    }
    Ok(FixedResourceSource::new(allocatable, allocated))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env()?;
    init_logging(if config.cert_path.is_some() {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let client = Arc::new(BrokerClient::new(&config)?);
    let records = Arc::new(LocalRecords::new());
    let source = Arc::new(source_from_env()?);

    if let Err(e) = tether_agent::BrokerTransport::ping(client.as_ref()).await {
        tracing::warn!(error = %e, "broker not reachable at startup; loops will retry");
    }

    let (advertiser_stop, advertiser_rx) = tokio::sync::oneshot::channel();
    let advertiser = Advertiser::new(
        Arc::clone(&client) as _,
        source,
        Arc::clone(&records),
        config.cluster_id.clone(),
        config.cluster_name.clone(),
    );
    let advertiser_task = tokio::spawn(advertiser.run(config.advertise_interval, advertiser_rx));

    let (poller_stop, poller_rx) = tokio::sync::oneshot::channel();
    let poller = InstructionPoller::new(Arc::clone(&client) as _, records);
    let poller_task = tokio::spawn(poller.run(config.poll_interval, poller_rx));

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    tracing::info!("shutting down");

    let _ = advertiser_stop.send(());
    let _ = poller_stop.send(());
    let _ = tokio::join!(advertiser_task, poller_task);

    Ok(())
}
