//! Provider performance harness entry point.
//!
//! Configuration is built once here - defaults, optional TOML file, CLI
//! overrides - validated, and handed to the provider immutably. Invalid
//! settings print the error and exit non-zero before any thread starts.

mod peer;
mod provider;
mod session;
mod thread;

use clap::Parser;
use config::ProviderConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "provperf", about = "Feedbench provider performance harness")]
struct Options {
    /// TOML config file applied over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Updates to send per second.
    #[arg(long)]
    update_rate: Option<u32>,

    /// Latency updates per second (-1 stamps every update).
    #[arg(long)]
    latency_update_rate: Option<i32>,

    /// Generic messages to send per second.
    #[arg(long)]
    generic_msg_rate: Option<u32>,

    /// Latency generic messages per second (-1 stamps every one).
    #[arg(long)]
    latency_generic_msg_rate: Option<i32>,

    /// Scheduling ticks per second.
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Provider threads (one channel each).
    #[arg(long)]
    threads: Option<u32>,

    /// Run time in seconds.
    #[arg(long)]
    run_time: Option<u64>,

    /// Messages to pack per buffer (1 disables packing).
    #[arg(long)]
    pack_count: Option<u32>,

    /// Packing buffer size in bytes.
    #[arg(long)]
    pack_buffer_length: Option<u32>,

    /// Items the loopback consumer driver requests per channel.
    #[arg(long, default_value_t = 1000)]
    client_items: u32,

    /// Stats file name prefix (thread index and .csv appended).
    #[arg(long)]
    stats_file: Option<String>,

    /// Log individual latency samples to per-thread CSV files.
    #[arg(long)]
    log_latency: bool,

    /// Suppress periodic stats on stdout.
    #[arg(long)]
    no_display_stats: bool,
}

impl Options {
    fn build_config(&self) -> Result<ProviderConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ProviderConfig::from_file(path)?,
            None => ProviderConfig::default(),
        };
        if let Some(v) = self.update_rate {
            config.updates_per_sec = v;
        }
        if let Some(v) = self.latency_update_rate {
            config.latency_update_rate = v;
        }
        if let Some(v) = self.generic_msg_rate {
            config.gen_msgs_per_sec = v;
        }
        if let Some(v) = self.latency_generic_msg_rate {
            config.latency_gen_msg_rate = v;
        }
        if let Some(v) = self.tick_rate {
            config.ticks_per_sec = v;
        }
        if let Some(v) = self.threads {
            config.thread_count = v;
        }
        if let Some(v) = self.run_time {
            config.run_time_secs = v;
        }
        if let Some(v) = self.pack_count {
            config.total_buffers_per_pack = v;
        }
        if let Some(v) = self.pack_buffer_length {
            config.packing_buffer_length = v;
        }
        if let Some(v) = &self.stats_file {
            config.stats_filename = v.clone();
        }
        if self.log_latency {
            config.log_latency_to_file = true;
        }
        if self.no_display_stats {
            config.display_stats = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let options = Options::parse();
    let config = match options.build_config() {
        Ok(config) => Arc::new(config),
        Err(error) => {
            eprintln!("Error initializing application: {error}");
            eprintln!("Run with --help for usage.");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        threads = config.thread_count,
        updates_per_sec = config.updates_per_sec,
        latency_update_rate = config.latency_update_rate,
        ticks_per_sec = config.ticks_per_sec,
        "provperf starting"
    );

    let mut provider = match provider::Provider::new(config, options.client_items) {
        Ok(provider) => provider,
        Err(error) => {
            eprintln!("Error initializing application: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    match provider.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("provperf failed: {error:#}");
            ExitCode::FAILURE
        }
    }
}
