//! Provider orchestration and statistics fan-in.
//!
//! Spawns one provider thread (plus its loopback consumer driver) per
//! configured thread, then runs the collection loop: every reporting
//! interval it drains each thread's latency records into interval/overall
//! statistics, reads counter deltas, writes one CSV row per thread, and -
//! only when more than one thread runs - folds the deltas into
//! process-wide totals.

use crate::peer::{ConsumerDriver, ConsumerDriverOptions};
use crate::session::ProviderSession;
use crate::thread::{ProviderThread, ProviderThreadStats, TIME_RECORD_POOL_SIZE};
use anyhow::Context;
use config::ProviderConfig;
use dashmap::DashMap;
use perf::{CountStat, ResourceUsageStats, TimeRecordQueue, ValueStatistics};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use transport::{loopback_pair, Channel, LoopbackOptions};

/// Seconds to wait for a thread to acknowledge shutdown before treating it
/// as a best-effort leak.
const SHUTDOWN_WAIT_SECS: u64 = 5;

const STATS_FILE_HEADER: &str = "UTC, Requests received, Images sent, Updates sent, Posts reflected, GenMsgs sent, GenMsg Latencies sent, GenMsgs received, GenMsg Latencies received, GenMsg Latency avg (usec), GenMsg Latency std dev (usec), GenMsg Latency max (usec), GenMsg Latency min (usec), CPU usage (%), Memory (MB)";

const LATENCY_FILE_HEADER: &str = "Message type, Send time, Receive time, Latency (usec)";

/// Per-thread state the collector owns.
struct ProviderThreadInfo {
    stats: Arc<ProviderThreadStats>,
    gen_msg_latency_records: Arc<TimeRecordQueue>,
    shutdown: Arc<AtomicBool>,
    shutdown_ack: Arc<AtomicBool>,
    interval_gen_msg_latency_stats: ValueStatistics,
    overall_gen_msg_latency_stats: ValueStatistics,
    stats_writer: BufWriter<File>,
    latency_writer: Option<BufWriter<File>>,
    provider_join: Option<JoinHandle<()>>,
    driver_join: Option<JoinHandle<()>>,
}

/// Process-wide totals, only fed when thread count > 1.
#[derive(Default)]
struct TotalStats {
    item_request_count: CountStat,
    refresh_msg_count: CountStat,
    update_msg_count: CountStat,
    post_msg_count: CountStat,
    gen_msg_sent_count: CountStat,
    gen_msg_recv_count: CountStat,
    latency_gen_msg_sent_count: CountStat,
    out_of_buffers_count: CountStat,
    gen_msg_latency_stats: ValueStatistics,
}

/// The whole provider harness.
pub struct Provider {
    config: Arc<ProviderConfig>,
    threads: Vec<ProviderThreadInfo>,
    /// Channel id → provider thread index; the one genuinely cross-thread
    /// mutable registry (insert on connect, remove on disconnect).
    channels: Arc<DashMap<u64, u32>>,
    total: TotalStats,
    resources: ResourceUsageStats,
}

impl Provider {
    /// Open stats files and spawn all provider threads and their drivers.
    pub fn new(config: Arc<ProviderConfig>, client_item_count: u32) -> anyhow::Result<Self> {
        let channels = Arc::new(DashMap::new());
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

            let stats = Arc::new(ProviderThreadStats::default());
            let gen_msg_latency_records = Arc::new(TimeRecordQueue::with_capacity(
                TIME_RECORD_POOL_SIZE,
            ));
            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_ack = Arc::new(AtomicBool::new(false));

            let (provider_channel, driver_channel) = loopback_pair(LoopbackOptions::default());
            channels.insert(provider_channel.id(), index);

            let mut provider_thread = ProviderThread::new(
                Arc::clone(&config),
                index,
                Arc::clone(&stats),
                Arc::clone(&gen_msg_latency_records),
                Arc::clone(&shutdown),
                Arc::clone(&shutdown_ack),
            )
            .context("failed to build latency schedule")?;

            let provider_join = std::thread::Builder::new()
                .name(format!("provider-{index}"))
                .spawn(move || {
                    let session = ProviderSession::new(Arc::new(provider_channel));
                    provider_thread.run(session);
                })?;

            let driver_options =
                ConsumerDriverOptions::from_provider_config(&config, client_item_count);
            let driver_shutdown = Arc::clone(&shutdown);
            let driver_join = std::thread::Builder::new()
                .name(format!("consdriver-{index}"))
                .spawn(move || {
                    let mut driver = ConsumerDriver::new(
                        Arc::new(driver_channel),
                        driver_options,
                        driver_shutdown,
                    );
                    driver.run();
                })?;

            threads.push(ProviderThreadInfo {
                stats,
                gen_msg_latency_records,
                shutdown,
                shutdown_ack,
                interval_gen_msg_latency_stats: ValueStatistics::new(),
                overall_gen_msg_latency_stats: ValueStatistics::new(),
                stats_writer,
                latency_writer,
                provider_join: Some(provider_join),
                driver_join: Some(driver_join),
            });
        }

        Ok(Self {
            config,
            threads,
            channels,
            total: TotalStats::default(),
            resources: ResourceUsageStats::new(),
        })
    }

    /// Collection loop: runs until the configured runtime elapses.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let interval = Duration::from_secs(self.config.write_stats_interval_secs.max(1));
        let deadline = Instant::now() + Duration::from_secs(self.config.run_time_secs);
        let start = Instant::now();

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(interval.min(remaining));
            let runtime_sec = start.elapsed().as_secs();
            self.collect_stats(true, self.config.display_stats, runtime_sec)?;
        }

        self.shutdown();
        self.print_summary();
        Ok(())
    }

    /// One collection pass over every provider thread.
    fn collect_stats(
        &mut self,
        write_stats: bool,
        display_stats: bool,
        runtime_sec: u64,
    ) -> anyhow::Result<()> {
        let (cpu, mem) = self.resources.sample();
        let interval_secs = self.config.write_stats_interval_secs.max(1);
        let multi_thread = self.config.thread_count > 1;
        let total = &mut self.total;

        for (index, thread) in self.threads.iter_mut().enumerate() {
            // Latency records first, so the interval stats cover the same
            // window as the counter deltas.
            let mut latency_writer = thread.latency_writer.as_mut();
            let interval_stats = &mut thread.interval_gen_msg_latency_stats;
            let overall_stats = &mut thread.overall_gen_msg_latency_stats;
            thread.gen_msg_latency_records.drain(|record| {
                let latency = record.latency_usec();
                interval_stats.update(latency);
                overall_stats.update(latency);
                if let Some(writer) = latency_writer.as_mut() {
                    let _ = writeln!(
                        writer,
                        "Gen, {}, {}, {:.1}",
                        record.start_time, record.end_time, latency
                    );
                }
            });

            let requests = thread.stats.item_request_count.get_change();
            let images = thread.stats.refresh_msg_count.get_change();
            let updates = thread.stats.update_msg_count.get_change();
            let posts = thread.stats.post_msg_count.get_change();
            let gen_sent = thread.stats.gen_msg_sent_count.get_change();
            let gen_lat_sent = thread.stats.latency_gen_msg_sent_count.get_change();
            let gen_recv = thread.stats.gen_msg_recv_count.get_change();
            let gen_lat_recv = thread.interval_gen_msg_latency_stats.count();
            let out_of_buffers = thread.stats.out_of_buffers_count.get_change();

            if multi_thread {
                total.item_request_count.add(requests);
                total.refresh_msg_count.add(images);
                total.update_msg_count.add(updates);
                total.post_msg_count.add(posts);
                total.gen_msg_sent_count.add(gen_sent);
                total.gen_msg_recv_count.add(gen_recv);
                total.latency_gen_msg_sent_count.add(gen_lat_sent);
                total.out_of_buffers_count.add(out_of_buffers);
            }

            if write_stats {
                let stats = &thread.interval_gen_msg_latency_stats;
                writeln!(
                    thread.stats_writer,
                    "{}, {}, {}, {}, {}, {}, {}, {}, {}, {:.1}, {:.1}, {:.1}, {:.1}, {:.2}, {:.2}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    requests,
                    images,
                    updates,
                    posts,
                    gen_sent,
                    gen_lat_sent,
                    gen_recv,
                    gen_lat_recv,
                    stats.average(),
                    stats.std_dev(),
                    stats.max_value(),
                    stats.min_value(),
                    cpu,
                    mem,
                )?;
                thread.stats_writer.flush()?;
                if let Some(writer) = thread.latency_writer.as_mut() {
                    writer.flush()?;
                }
            }

            if display_stats {
                if multi_thread {
                    println!("{runtime_sec:03}: Provider {}:", index + 1);
                }
                println!(
                    "{runtime_sec:03}: Requests: {requests:6}, Images: {images:6}, UpdRate: {:8}, CPU: {cpu:6.2}%, Mem: {mem:6.2}MB",
                    updates / interval_secs
                );
                if gen_sent > 0 || gen_recv > 0 {
                    println!(
                        "  GenMsgs: sent {gen_sent}, received {gen_recv}, latencies sent {gen_lat_sent}, latencies received {gen_lat_recv}"
                    );
                }
                if thread.interval_gen_msg_latency_stats.count() > 0 {
                    println!(
                        "  {}",
                        thread
                            .interval_gen_msg_latency_stats
                            .format_line("GenMsgLat(usec)", "Msgs")
                    );
                }
                if out_of_buffers > 0 {
                    println!("  - {out_of_buffers} messages not sent due to lack of output buffers.");
                }
            }

            if multi_thread {
                total
                    .gen_msg_latency_stats
                    .merge(&thread.interval_gen_msg_latency_stats);
            }
            thread.interval_gen_msg_latency_stats.clear();
        }
        Ok(())
    }

    /// Request shutdown, wait a bounded time for acknowledgment, join what
    /// acknowledged and leak the rest at process exit.
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
                if let Some(handle) = thread.provider_join.take() {
                    let _ = handle.join();
                }
            } else {
                tracing::warn!(provider = index, "thread did not acknowledge shutdown");
            }
            if let Some(handle) = thread.driver_join.take() {
                let _ = handle.join();
            }
            self.channels
                .retain(|_, thread_index| *thread_index != index as u32);
        }
    }

    fn print_summary(&mut self) {
        println!("\n--- OVERALL SUMMARY ---");
        for (index, thread) in self.threads.iter().enumerate() {
            println!(
                "Provider {}: requests {}, images {}, updates {}, posts {}, genMsgs sent {}, genMsgs recv {}",
                index + 1,
                thread.stats.item_request_count.total(),
                thread.stats.refresh_msg_count.total(),
                thread.stats.update_msg_count.total(),
                thread.stats.post_msg_count.total(),
                thread.stats.gen_msg_sent_count.total(),
                thread.stats.gen_msg_recv_count.total(),
            );
            if thread.overall_gen_msg_latency_stats.count() > 0 {
                println!(
                    "  {}",
                    thread
                        .overall_gen_msg_latency_stats
                        .format_line("GenMsgLat(usec)", "Msgs")
                );
            }
        }
        if self.config.thread_count > 1 && self.total.gen_msg_latency_stats.count() > 0 {
            println!(
                "Total: {}",
                self.total
                    .gen_msg_latency_stats
                    .format_line("GenMsgLat(usec)", "Msgs")
            );
        }
    }
}

