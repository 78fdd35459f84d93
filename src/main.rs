//! triekv - An In-Memory Key-Value Cache with Prefix Queries
//!
//! This is the main entry point for the triekv server.
//! It loads the configuration, sets up logging and runs the event loop.

use anyhow::Context;
use clap::Parser;
use std::sync::Mutex;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use triekv::config::{Cli, Config};
use triekv::memory::{self, format_bytes};
use triekv::server::{install_panic_hook, spawn_signal_listener, Server};

/// Sets up the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level `{}`", config.log_level))?,
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }

    Ok(())
}

/// Logs the limits the server will actually enforce.
fn log_limits(config: &Config) {
    info!("Max memory          : {}", format_bytes(config.max_memory));
    info!("Max clients         : {}", config.max_clients);
    info!("Max idle time       : {:?}", config.max_idle_time);
    info!("Max request size    : {}", format_bytes(config.max_request_size as u64));
    info!("Max response size   : {}", format_bytes(config.max_response_size as u64));
    info!("Max key size        : {}", format_bytes(config.max_key_size as u64));
    info!("Max value size      : {}", format_bytes(config.max_value_size as u64));
    info!("Max item TTL        : {}s", config.max_item_ttl);
    info!("Compression above   : {}", format_bytes(config.compression_threshold as u64));
    info!("Eviction staleness  : {:?}", config.gc_ratio);
}

fn print_banner(config: &Config) {
    println!(
        r#"
  _        _       _
 | |_ _ __(_) ___ | | ____   __
 | __| '__| |/ _ \| |/ /\ \ / /
 | |_| |  | |  __/|   <  \ V /
  \__|_|  |_|\___||_|\_\  \_/

triekv v{} - In-Memory Key-Value Cache with Prefix Queries
──────────────────────────────────────────────────────────────
Listening on {}
Use Ctrl+C to shutdown gracefully.
"#,
        triekv::VERSION,
        config.bind_address()
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and the optional config file
    let cli = Cli::parse();
    let mut config = Config::from_cli(&cli).context("invalid configuration")?;

    init_logging(&config)?;

    let available = memory::available_memory();
    let max_memory = memory::clamp_max_memory(config.max_memory, available);
    if max_memory != config.max_memory {
        warn!(
            configured = %format_bytes(config.max_memory),
            available = %format_bytes(available),
            "Max memory exceeds available memory, using half of available"
        );
        config.max_memory = max_memory;
    }
    log_limits(&config);

    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = Server::bind(config.clone()).await?;
            install_panic_hook(server.snapshot());
            spawn_signal_listener(server.stop_flag());

            print_banner(&config);
            info!(address = %config.bind_address(), "Server started");

            server.run().await
        })
        .await
}
