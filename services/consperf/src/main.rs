//! Consumer performance harness entry point and statistics collector.
//!
//! Spawns one consumer thread (plus its loopback provider driver) per
//! configured thread, then collects: drains the latency record queues into
//! interval/overall/startup/steady-state statistics, writes the per-thread
//! CSV rows, and prints the periodic display.

mod consumer;
mod peer;

use clap::Parser;
use config::ConsumerConfig;
use consumer::{ConsumerLatencyQueues, ConsumerThread, ConsumerThreadStats};
use peer::{ProviderDriver, ProviderDriverOptions};
use perf::{ResourceUsageStats, ValueStatistics};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use transport::{loopback_pair, LoopbackOptions};

const SHUTDOWN_WAIT_SECS: u64 = 5;

const STATS_FILE_HEADER: &str = "UTC, Latency updates, Latency avg (usec), Latency std dev (usec), Latency max (usec), Latency min (usec), Images, Update rate, Posts sent, Post Latencies, Post Latency avg (usec), Post Latency std dev (usec), Post Latency max (usec), Post Latency min (usec), GenMsgs sent, GenMsgs received, GenMsg Latencies sent, GenMsg Latencies received, GenMsg Latency avg (usec), GenMsg Latency std dev (usec), GenMsg Latency max (usec), GenMsg Latency min (usec), CPU usage (%), Memory (MB)";

const LATENCY_FILE_HEADER: &str = "Message type, Send time, Receive time, Latency (usec)";

#[derive(Debug, Parser)]
#[command(name = "consperf", about = "Feedbench consumer performance harness")]
struct Options {
    /// TOML config file applied over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Items to request.
    #[arg(long)]
    item_count: Option<u32>,

    /// Item requests to send per second.
    #[arg(long)]
    request_rate: Option<u32>,

    /// Request snapshots instead of streaming subscriptions.
    #[arg(long)]
    snapshot: bool,

    /// Posts to send per second.
    #[arg(long)]
    post_rate: Option<u32>,

    /// Latency posts per second (-1 stamps every post).
    #[arg(long)]
    latency_post_rate: Option<i32>,

    /// Generic messages to send per second.
    #[arg(long)]
    generic_msg_rate: Option<u32>,

    /// Latency generic messages per second (-1 stamps every one).
    #[arg(long)]
    latency_generic_msg_rate: Option<i32>,

    /// Updates per second the loopback provider driver streams back.
    #[arg(long, default_value_t = 10_000)]
    driver_update_rate: u32,

    /// Scheduling ticks per second.
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Consumer threads (one channel each).
    #[arg(long)]
    threads: Option<u32>,

    /// Run time in seconds.
    #[arg(long)]
    run_time: Option<u64>,

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
    fn build_config(&self) -> Result<ConsumerConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConsumerConfig::from_file(path)?,
            None => ConsumerConfig::default(),
        };
        if let Some(v) = self.item_count {
            config.item_request_count = v;
        }
        if let Some(v) = self.request_rate {
            config.requests_per_sec = v;
        }
        if self.snapshot {
            config.request_snapshots = true;
        }
        if let Some(v) = self.post_rate {
            config.posts_per_sec = v;
        }
        if let Some(v) = self.latency_post_rate {
            config.latency_posts_per_sec = v;
        }
        if let Some(v) = self.generic_msg_rate {
            config.gen_msgs_per_sec = v;
        }
        if let Some(v) = self.latency_generic_msg_rate {
            config.latency_gen_msgs_per_sec = v;
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

/// Interval and overall accumulators for one latency stream.
#[derive(Default)]
struct LatencyStatsSet {
    interval: ValueStatistics,
    overall: ValueStatistics,
}

struct ConsumerThreadInfo {
    stats: Arc<ConsumerThreadStats>,
    queues: Arc<ConsumerLatencyQueues>,
    shutdown: Arc<AtomicBool>,
    shutdown_ack: Arc<AtomicBool>,
    update_latency: LatencyStatsSet,
    post_latency: LatencyStatsSet,
    gen_msg_latency: LatencyStatsSet,
    startup_latency: ValueStatistics,
    steady_state_latency: ValueStatistics,
    stats_writer: BufWriter<File>,
    latency_writer: Option<BufWriter<File>>,
    consumer_join: Option<JoinHandle<()>>,
    driver_join: Option<JoinHandle<()>>,
}

struct ConsPerf {
    config: Arc<ConsumerConfig>,
    threads: Vec<ConsumerThreadInfo>,
    resources: ResourceUsageStats,
}

impl ConsPerf {
    fn new(config: Arc<ConsumerConfig>, driver_update_rate: u32) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut threads = Vec::with_capacity(config.thread_count as usize);
        for index in 0..config.thread_count {
            let stats_path = format!("{}{}.csv", config.stats_filename, index + 1);
            let mut stats_writer = BufWriter::new(
                File::create(&stats_path)
                    .with_context(|| format!("failed to open stats file '{stats_path}'"))?,
            );
            writeln!(stats_writer, "{STATS_FILE_HEADER}")?;
            stats_writer.flush()?;

            let latency_writer = if config.log_latency_to_file {
                let path = format!("{}{}.csv", config.latency_filename, index + 1);
                let mut writer = BufWriter::new(
                    File::create(&path)
                        .with_context(|| format!("failed to open latency file '{path}'"))?,
                );
                writeln!(writer, "{LATENCY_FILE_HEADER}")?;
                Some(writer)
            } else {
                None
            };

            let stats = Arc::new(ConsumerThreadStats::default());
            let queues = Arc::new(ConsumerLatencyQueues::new());
            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_ack = Arc::new(AtomicBool::new(false));

            let (consumer_channel, driver_channel) = loopback_pair(LoopbackOptions::default());

            let mut consumer_thread = ConsumerThread::new(
                Arc::clone(&config),
                index,
                Arc::new(consumer_channel),
                Arc::clone(&stats),
                Arc::clone(&queues),
                Arc::clone(&shutdown),
                Arc::clone(&shutdown_ack),
            )
            .context("failed to build latency schedule")?;
            let consumer_join = std::thread::Builder::new()
                .name(format!("consumer-{index}"))
                .spawn(move || consumer_thread.run())?;

            let driver_options = ProviderDriverOptions {
                service_id: 1,
                service_name: config.service_name.clone(),
                updates_per_tick: (driver_update_rate / config.ticks_per_sec).max(1),
                ticks_per_sec: config.ticks_per_sec,
            };
            let driver_shutdown = Arc::clone(&shutdown);
            let driver_join = std::thread::Builder::new()
                .name(format!("provdriver-{index}"))
                .spawn(move || {
                    let mut driver = ProviderDriver::new(
                        Arc::new(driver_channel),
                        driver_options,
                        driver_shutdown,
                    );
                    driver.run();
                })?;

            threads.push(ConsumerThreadInfo {
                stats,
                queues,
                shutdown,
                shutdown_ack,
                update_latency: LatencyStatsSet::default(),
                post_latency: LatencyStatsSet::default(),
                gen_msg_latency: LatencyStatsSet::default(),
                startup_latency: ValueStatistics::new(),
                steady_state_latency: ValueStatistics::new(),
                stats_writer,
                latency_writer,
                consumer_join: Some(consumer_join),
                driver_join: Some(driver_join),
            });
        }

        Ok(Self {
            config,
            threads,
            resources: ResourceUsageStats::new(),
        })
    }

    fn run(&mut self) -> anyhow::Result<()> {
        let interval = Duration::from_secs(self.config.write_stats_interval_secs.max(1));
        let deadline = Instant::now() + Duration::from_secs(self.config.run_time_secs);
        let start = Instant::now();

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(interval.min(remaining));
            self.collect_stats(start.elapsed().as_secs())?;
        }

        self.shutdown();
        self.print_summary();
        Ok(())
    }

    fn collect_stats(&mut self, runtime_sec: u64) -> anyhow::Result<()> {
        let (cpu, mem) = self.resources.sample();
        let interval_secs = self.config.write_stats_interval_secs.max(1);
        let steady_delay_usec = self.config.delay_steady_state_calc_secs * 1_000_000;

        for (index, thread) in self.threads.iter_mut().enumerate() {
            let image_end = thread.stats.image_retrieval_end();

            // Update latencies, split into startup vs steady state by when
            // the sample arrived relative to image retrieval completing.
            {
                let update = &mut thread.update_latency;
                let startup = &mut thread.startup_latency;
                let steady = &mut thread.steady_state_latency;
                let mut writer = thread.latency_writer.as_mut();
                thread.queues.updates.drain(|record| {
                    let latency = record.latency_usec();
                    update.interval.update(latency);
                    update.overall.update(latency);
                    if image_end != 0 && record.end_time > image_end + steady_delay_usec {
                        steady.update(latency);
                    } else {
                        startup.update(latency);
                    }
                    if let Some(writer) = writer.as_mut() {
                        let _ = writeln!(
                            writer,
                            "Upd, {}, {}, {:.1}",
                            record.start_time, record.end_time, latency
                        );
                    }
                });
            }
            {
                let post = &mut thread.post_latency;
                let mut writer = thread.latency_writer.as_mut();
                thread.queues.posts.drain(|record| {
                    let latency = record.latency_usec();
                    post.interval.update(latency);
                    post.overall.update(latency);
                    if let Some(writer) = writer.as_mut() {
                        let _ = writeln!(
                            writer,
                            "Pst, {}, {}, {:.1}",
                            record.start_time, record.end_time, latency
                        );
                    }
                });
            }
            {
                let gen = &mut thread.gen_msg_latency;
                let mut writer = thread.latency_writer.as_mut();
                thread.queues.gen_msgs.drain(|record| {
                    let latency = record.latency_usec();
                    gen.interval.update(latency);
                    gen.overall.update(latency);
                    if let Some(writer) = writer.as_mut() {
                        let _ = writeln!(
                            writer,
                            "Gen, {}, {}, {:.1}",
                            record.start_time, record.end_time, latency
                        );
                    }
                });
            }

            let refreshes = thread.stats.refresh_count.get_change();
            let startup_updates = thread.stats.startup_update_count.get_change();
            let steady_updates = thread.stats.steady_state_update_count.get_change();
            let statuses = thread.stats.status_count.get_change();
            let posts_sent = thread.stats.post_sent_count.get_change();
            let gen_sent = thread.stats.gen_msg_sent_count.get_change();
            let gen_recv = thread.stats.gen_msg_recv_count.get_change();
            let gen_lat_sent = thread.stats.latency_gen_msg_sent_count.get_change();
            let out_of_buffers = thread.stats.out_of_buffers_count.get_change();
            let update_rate = (startup_updates + steady_updates) / interval_secs;

            let upd = &thread.update_latency.interval;
            let post = &thread.post_latency.interval;
            let gen = &thread.gen_msg_latency.interval;
            writeln!(
                thread.stats_writer,
                "{}, {}, {:.1}, {:.1}, {:.1}, {:.1}, {}, {}, {}, {}, {:.1}, {:.1}, {:.1}, {:.1}, {}, {}, {}, {}, {:.1}, {:.1}, {:.1}, {:.1}, {:.2}, {:.2}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                upd.count(),
                upd.average(),
                upd.std_dev(),
                upd.max_value(),
                upd.min_value(),
                refreshes,
                update_rate,
                posts_sent,
                post.count(),
                post.average(),
                post.std_dev(),
                post.max_value(),
                post.min_value(),
                gen_sent,
                gen_recv,
                gen_lat_sent,
                gen.count(),
                gen.average(),
                gen.std_dev(),
                gen.max_value(),
                gen.min_value(),
                cpu,
                mem,
            )?;
            thread.stats_writer.flush()?;
            if let Some(writer) = thread.latency_writer.as_mut() {
                writer.flush()?;
            }

            if self.config.display_stats {
                if self.config.thread_count > 1 {
                    println!("{runtime_sec:03}: Client {}:", index + 1);
                }
                println!(
                    "{runtime_sec:03}: Images: {refreshes:6}, Posts: {posts_sent:6}, UpdRate: {update_rate:8}, CPU: {cpu:6.2}%, Mem: {mem:6.2}MB"
                );
                if upd.count() > 0 {
                    println!("  {}", upd.format_line("Latency(usec)", "Msgs"));
                }
                if post.count() > 0 {
                    println!("  {}", post.format_line("PostLat(usec)", "Msgs"));
                }
                if gen_sent > 0 || gen_recv > 0 {
                    println!(
                        "  GenMsgs: sent {gen_sent}, received {gen_recv}, latencies sent {gen_lat_sent}, latencies received {}",
                        gen.count()
                    );
                }
                if gen.count() > 0 {
                    println!("  {}", gen.format_line("GenMsgLat(usec)", "Msgs"));
                }
                if out_of_buffers > 0 {
                    println!("  - {out_of_buffers} messages not sent due to lack of output buffers.");
                }
                if statuses > 0 {
                    println!("  - Received {statuses} status messages.");
                }
            }

            thread.update_latency.interval.clear();
            thread.post_latency.interval.clear();
            thread.gen_msg_latency.interval.clear();
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        for thread in &self.threads {
            thread.shutdown.store(true, Ordering::Release);
        }
        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_WAIT_SECS);
        for (index, thread) in self.threads.iter_mut().enumerate() {
            while !thread.shutdown_ack.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if thread.shutdown_ack.load(Ordering::Acquire) {
                if let Some(handle) = thread.consumer_join.take() {
                    let _ = handle.join();
                }
            } else {
                tracing::warn!(consumer = index, "thread did not acknowledge shutdown");
            }
            if let Some(handle) = thread.driver_join.take() {
                let _ = handle.join();
            }
        }
    }

    fn print_summary(&mut self) {
        println!("\n--- OVERALL SUMMARY ---");
        for (index, thread) in self.threads.iter().enumerate() {
            let start = thread
                .stats
                .image_retrieval_start_time
                .load(Ordering::Relaxed);
            let end = thread.stats.image_retrieval_end();
            println!(
                "Client {}: requests {}, images {}, updates {}, posts {}, genMsgs sent {}",
                index + 1,
                thread.stats.request_count.total(),
                thread.stats.refresh_count.total(),
                thread.stats.startup_update_count.total()
                    + thread.stats.steady_state_update_count.total(),
                thread.stats.post_sent_count.total(),
                thread.stats.gen_msg_sent_count.total(),
            );
            if start != 0 && end > start {
                let secs = (end - start) as f64 / 1_000_000.0;
                println!(
                    "  Image retrieval time for {} images: {secs:.3}s ({:.0} images/s)",
                    self.config.item_request_count,
                    self.config.item_request_count as f64 / secs
                );
            }
            if thread.update_latency.overall.count() > 0 {
                println!(
                    "  {}",
                    thread.update_latency.overall.format_line("Latency(usec)", "Msgs")
                );
            }
            if thread.startup_latency.count() > 0 {
                println!(
                    "  {}",
                    thread.startup_latency.format_line("StartupLat(usec)", "Msgs")
                );
            }
            if thread.steady_state_latency.count() > 0 {
                println!(
                    "  {}",
                    thread
                        .steady_state_latency
                        .format_line("SteadyStateLat(usec)", "Msgs")
                );
            }
            if thread.post_latency.overall.count() > 0 {
                println!(
                    "  {}",
                    thread.post_latency.overall.format_line("PostLat(usec)", "Msgs")
                );
            }
            if thread.gen_msg_latency.overall.count() > 0 {
                println!(
                    "  {}",
                    thread
                        .gen_msg_latency
                        .overall
                        .format_line("GenMsgLat(usec)", "Msgs")
                );
            }
        }
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
        items = config.item_request_count,
        requests_per_sec = config.requests_per_sec,
        ticks_per_sec = config.ticks_per_sec,
        "consperf starting"
    );

    let mut consperf = match ConsPerf::new(config, options.driver_update_rate) {
        Ok(consperf) => consperf,
        Err(error) => {
            eprintln!("Error initializing application: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    match consperf.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("consperf failed: {error:#}");
            ExitCode::FAILURE
        }
    }
}
