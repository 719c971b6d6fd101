//! Relay service binary.
//!
//! Publishes a batch of demo messages into an in-memory stream, subscribes to it and acks
//! everything it receives until it is asked to shut down.

use std::time::Duration;

use clap::Parser;
use delivery_config::load_config;
use delivery_config::shared::RelayConfig;
use delivery_telemetry::tracing::init_tracing;

use crate::core::{RelayOptions, start_relay};

mod core;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct AppArgs {
    /// Number of demo messages published before subscribing
    #[arg(long, default_value_t = 100)]
    messages: usize,
    /// Number of concurrent consumers draining the subscription
    #[arg(long, default_value_t = 4)]
    consumers: usize,
    /// Shut down after this many milliseconds instead of waiting for a signal
    #[arg(long)]
    exit_after_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = AppArgs::parse();
    let config = load_config::<RelayConfig>()?;

    init_tracing(env!("CARGO_BIN_NAME"))?;

    let options = RelayOptions {
        messages: args.messages,
        consumers: args.consumers.max(1),
        exit_after: args.exit_after_ms.map(Duration::from_millis),
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_relay(config, options))
}
