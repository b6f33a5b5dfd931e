//! Consumer thread: request bursts and the latency decode path.
//!
//! Startup walks the control streams (login, directory, dictionaries),
//! then the tick loop requests items at the configured rate, decodes
//! everything the provider sends back, and - once the full image set is
//! retrieved - sends post and generic bursts whose stamps come back around
//! through the provider.
//!
//! Decoded latency stamps go through the pooled record queues; the
//! collector thread drains them into statistics.

use codec::rdm::dictionary::{
    DictionaryRefresh, DictionaryRequest, FieldDictionary, ENUM_DICTIONARY_NAME,
    ENUM_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_NAME, FIELD_DICTIONARY_STREAM_ID,
};
use codec::rdm::directory::{DirectoryRefresh, DirectoryRequest};
use codec::rdm::login::{LoginMsg, LoginRefresh, LoginRequest, LoginRtt};
use codec::{CodecError, CodecResult, EncodeCursor, RawMsg};
use config::{ConsumerConfig, ALWAYS_SEND_LATENCY, LATENCY_RANDOM_ARRAY_SET_COUNT};
use perf::item::item_flags;
use perf::{
    CountStat, ItemEncoder, ItemInfo, LatencyKind, LatencyRandomArray, LatencyRandomArrayOptions,
    MarketPriceDecoder, MarketPriceMsgData, TimeRecordQueue,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use transport::{Channel, LoopbackChannel, TransportError, WriteOutcome, WritePriority};
use types::{BufferValue, DataState, DomainType, MsgClass, StreamState};

/// First item stream id; control streams sit below it.
pub const ITEM_STREAM_ID_START: i32 = 6;

/// Latency records each queue can hold before samples drop.
pub const TIME_RECORD_POOL_SIZE: usize = 10_240;

const STARTUP_WAIT: Duration = Duration::from_secs(10);

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("timed out waiting for {what}")]
    StartupTimeout { what: &'static str },

    #[error("service \"{name}\" is not up")]
    ServiceDown { name: String },
}

/// Counters and phase timestamps a consumer thread maintains; read by the
/// collector thread.
#[derive(Debug, Default)]
pub struct ConsumerThreadStats {
    pub request_count: CountStat,
    pub refresh_count: CountStat,
    pub status_count: CountStat,
    pub startup_update_count: CountStat,
    pub steady_state_update_count: CountStat,
    pub post_sent_count: CountStat,
    pub gen_msg_sent_count: CountStat,
    pub gen_msg_recv_count: CountStat,
    pub latency_gen_msg_sent_count: CountStat,
    pub out_of_buffers_count: CountStat,
    /// Microsecond wall timestamps bounding image retrieval; zero = unset.
    pub image_retrieval_start_time: AtomicU64,
    pub image_retrieval_end_time: AtomicU64,
}

impl ConsumerThreadStats {
    pub fn image_retrieval_end(&self) -> u64 {
        self.image_retrieval_end_time.load(Ordering::Relaxed)
    }
}

/// Latency record queues a consumer thread feeds.
pub struct ConsumerLatencyQueues {
    pub updates: TimeRecordQueue,
    pub posts: TimeRecordQueue,
    pub gen_msgs: TimeRecordQueue,
}

impl ConsumerLatencyQueues {
    pub fn new() -> Self {
        Self {
            updates: TimeRecordQueue::with_capacity(TIME_RECORD_POOL_SIZE),
            posts: TimeRecordQueue::with_capacity(TIME_RECORD_POOL_SIZE),
            gen_msgs: TimeRecordQueue::with_capacity(TIME_RECORD_POOL_SIZE),
        }
    }
}

impl Default for ConsumerLatencyQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRequestState {
    NotRequested,
    WaitingForRefresh,
    HasRefresh,
}

struct ItemRequest {
    info: ItemInfo,
    state: ItemRequestState,
}

/// One consumer connection's request/decode engine.
pub struct ConsumerThread {
    config: Arc<ConsumerConfig>,
    index: u32,
    channel: Arc<LoopbackChannel>,
    encoder: ItemEncoder,
    decoder: Option<MarketPriceDecoder>,
    dictionary: FieldDictionary,
    items: Vec<ItemRequest>,
    request_index: usize,
    post_item_index: usize,
    gen_msg_item_index: usize,
    post_latency_array: Option<LatencyRandomArray>,
    gen_msg_latency_array: Option<LatencyRandomArray>,
    current_ticks: u32,
    service_id: u16,
    stats: Arc<ConsumerThreadStats>,
    queues: Arc<ConsumerLatencyQueues>,
    shutdown: Arc<AtomicBool>,
    shutdown_ack: Arc<AtomicBool>,
}

impl ConsumerThread {
    pub fn new(
        config: Arc<ConsumerConfig>,
        index: u32,
        channel: Arc<LoopbackChannel>,
        stats: Arc<ConsumerThreadStats>,
        queues: Arc<ConsumerLatencyQueues>,
        shutdown: Arc<AtomicBool>,
        shutdown_ack: Arc<AtomicBool>,
    ) -> Result<Self, perf::PerfError> {
        let post_latency_array = if config.posts_per_sec != 0 && config.latency_posts_per_sec > 0 {
            Some(LatencyRandomArray::create(&LatencyRandomArrayOptions {
                total_msgs_per_sec: config.posts_per_sec,
                latency_msgs_per_sec: config.latency_posts_per_sec as u32,
                ticks_per_sec: config.ticks_per_sec,
                array_count: LATENCY_RANDOM_ARRAY_SET_COUNT,
            })?)
        } else {
            None
        };
        let gen_msg_latency_array =
            if config.gen_msgs_per_sec != 0 && config.latency_gen_msgs_per_sec > 0 {
                Some(LatencyRandomArray::create(&LatencyRandomArrayOptions {
                    total_msgs_per_sec: config.gen_msgs_per_sec,
                    latency_msgs_per_sec: config.latency_gen_msgs_per_sec as u32,
                    ticks_per_sec: config.ticks_per_sec,
                    array_count: LATENCY_RANDOM_ARRAY_SET_COUNT,
                })?)
            } else {
                None
            };

        let mut items = Vec::with_capacity(config.item_request_count as usize);
        for i in 0..config.item_request_count {
            let mut info = ItemInfo::default();
            info.stream_id = ITEM_STREAM_ID_START + i as i32;
            info.attributes.domain_type = Some(DomainType::MarketPrice);
            info.attributes.msg_key.name =
                BufferValue::from_bytes(format!("ITEM{i:05}").as_bytes());
            let mut flags = 0u8;
            if !config.request_snapshots {
                flags |= item_flags::IS_STREAMING_REQ;
            }
            if config.posts_per_sec > 0 {
                flags |= item_flags::IS_POST;
            }
            if config.gen_msgs_per_sec > 0 {
                flags |= item_flags::IS_GEN_MSG;
            }
            info.item_flags = flags;
            items.push(ItemRequest {
                info,
                state: ItemRequestState::NotRequested,
            });
        }

        Ok(Self {
            config,
            index,
            channel,
            encoder: ItemEncoder::new(MarketPriceMsgData::canned()),
            decoder: None,
            dictionary: FieldDictionary::new(),
            items,
            request_index: 0,
            post_item_index: 0,
            gen_msg_item_index: 0,
            post_latency_array,
            gen_msg_latency_array,
            current_ticks: 0,
            service_id: 0,
            stats,
            queues,
            shutdown,
            shutdown_ack,
        })
    }

    pub fn run(&mut self) {
        if let Err(error) = self.startup() {
            tracing::error!(consumer = self.index, %error, "consumer startup failed");
            self.shutdown_ack.store(true, Ordering::Release);
            return;
        }
        tracing::info!(consumer = self.index, "consumer thread running");

        let micros_per_tick = self.config.microseconds_per_tick();
        let start = Instant::now();
        let mut next_tick_time = start.elapsed().as_micros() as u64 + micros_per_tick;

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(error) = self.process_inbound() {
                tracing::error!(consumer = self.index, %error, "inbound processing failed");
                break;
            }

            let now = start.elapsed().as_micros() as u64;
            if now < next_tick_time {
                std::thread::sleep(Duration::from_micros(next_tick_time - now));
            }
            next_tick_time += micros_per_tick;

            if let Err(error) = self.send_bursts() {
                tracing::error!(consumer = self.index, %error, "burst send failed");
                break;
            }

            self.current_ticks += 1;
            if self.current_ticks == self.config.ticks_per_sec {
                self.current_ticks = 0;
            }
        }

        tracing::info!(consumer = self.index, "consumer thread stopped");
        self.shutdown_ack.store(true, Ordering::Release);
    }

    // -- startup -------------------------------------------------------------

    /// Login → directory → dictionaries, each awaited in turn.
    fn startup(&mut self) -> Result<(), ConsumerError> {
        let mut login = LoginRequest::new();
        login.user_name.set_str(&self.config.username);
        login.attrib.application_name.set_str("consperf");
        login.attrib.support_rtt_monitoring = Some(2);
        self.send(|enc| login.encode(enc))?;
        self.await_msg("login refresh", |raw| {
            if raw.domain_type != DomainType::Login || raw.msg_class != MsgClass::Refresh {
                return Ok(false);
            }
            let mut refresh = LoginRefresh::new();
            refresh.decode(raw)?;
            Ok(refresh.state.stream_state == StreamState::Open
                && refresh.state.data_state == DataState::Ok)
        })?;

        let directory_request = DirectoryRequest::new();
        self.send(|enc| directory_request.encode(enc))?;
        let service_name = self.config.service_name.clone();
        let mut service_id = None;
        self.await_msg("directory refresh", |raw| {
            if raw.domain_type != DomainType::Directory || raw.msg_class != MsgClass::Refresh {
                return Ok(false);
            }
            let mut refresh = DirectoryRefresh::new();
            refresh.decode(raw)?;
            if let Some(service) = refresh.service_by_name(service_name.as_bytes()) {
                if service.state.as_ref().map(|s| s.is_up()).unwrap_or(false) {
                    service_id = Some(service.service_id);
                }
            }
            Ok(service_id.is_some())
        })?;
        self.service_id = service_id.ok_or_else(|| ConsumerError::ServiceDown {
            name: self.config.service_name.clone(),
        })?;

        for (stream_id, name) in [
            (FIELD_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_NAME),
            (ENUM_DICTIONARY_STREAM_ID, ENUM_DICTIONARY_NAME),
        ] {
            let mut request = DictionaryRequest::new();
            request.stream_id = stream_id;
            request.dictionary_name = BufferValue::from_bytes(name);
            request.service_id = Some(self.service_id);
            self.send(|enc| request.encode(enc))?;

            let mut dictionary = std::mem::take(&mut self.dictionary);
            self.await_msg("dictionary refresh", |raw| {
                if raw.domain_type != DomainType::Dictionary || raw.msg_class != MsgClass::Refresh {
                    return Ok(false);
                }
                let mut refresh = DictionaryRefresh::new();
                refresh.decode(raw)?;
                let done = refresh.stream_id == stream_id;
                if done {
                    dictionary.load_from_refresh(&refresh);
                }
                Ok(done)
            })?;
            self.dictionary = dictionary;
        }
        self.decoder = Some(MarketPriceDecoder::new(self.dictionary.clone()));
        tracing::info!(
            consumer = self.index,
            fields = self.dictionary.len(),
            "dictionaries loaded"
        );
        Ok(())
    }

    /// Read until `check` accepts a message or the startup window closes.
    fn await_msg<F>(&mut self, what: &'static str, mut check: F) -> Result<(), ConsumerError>
    where
        F: FnMut(&RawMsg<'_>) -> CodecResult<bool>,
    {
        let deadline = Instant::now() + STARTUP_WAIT;
        while Instant::now() < deadline {
            match self.channel.read()? {
                Some(bytes) => {
                    let raw = RawMsg::decode(&bytes)?;
                    if check(&raw)? {
                        return Ok(());
                    }
                }
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        Err(ConsumerError::StartupTimeout { what })
    }

    // -- inbound -------------------------------------------------------------

    fn process_inbound(&mut self) -> Result<(), ConsumerError> {
        while let Some(bytes) = self.channel.read()? {
            let raw = RawMsg::decode(&bytes)?;
            match raw.domain_type {
                DomainType::MarketPrice => self.process_item_msg(&raw)?,
                DomainType::Login => {
                    if raw.msg_class == MsgClass::Generic {
                        // Provider-driven RTT probe: echo it straight back.
                        if let Ok(LoginMsg::Rtt(rtt)) = LoginMsg::decode(&raw) {
                            let mut echo = LoginRtt::new();
                            echo.ticks = rtt.ticks;
                            echo.tcp_retrans = rtt.tcp_retrans;
                            self.send(|enc| echo.encode(enc))?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn process_item_msg(&mut self, raw: &RawMsg<'_>) -> Result<(), ConsumerError> {
        match raw.msg_class {
            MsgClass::Refresh => {
                self.stats.refresh_count.increment();
                let index = (raw.stream_id - ITEM_STREAM_ID_START) as usize;
                if let Some(item) = self.items.get_mut(index) {
                    item.state = ItemRequestState::HasRefresh;
                }
                if let Some(decoder) = &self.decoder {
                    decoder.decode(raw.payload)?;
                }
                if self.stats.refresh_count.total() >= self.items.len() as u64
                    && self.stats.image_retrieval_end_time.load(Ordering::Relaxed) == 0
                {
                    self.stats
                        .image_retrieval_end_time
                        .store(now_micros(), Ordering::Relaxed);
                    tracing::info!(consumer = self.index, "image retrieval complete");
                }
            }
            MsgClass::Update | MsgClass::Generic => {
                if raw.msg_class == MsgClass::Generic {
                    self.stats.gen_msg_recv_count.increment();
                } else if self.stats.image_retrieval_end_time.load(Ordering::Relaxed) == 0 {
                    self.stats.startup_update_count.increment();
                } else {
                    self.stats.steady_state_update_count.increment();
                }
                let Some(decoder) = &self.decoder else {
                    return Ok(());
                };
                if let Some(latency) = decoder.decode(raw.payload)? {
                    let end = now_micros();
                    let queue = match latency.kind {
                        LatencyKind::Update => &self.queues.updates,
                        LatencyKind::Post => &self.queues.posts,
                        LatencyKind::GenMsg => &self.queues.gen_msgs,
                    };
                    queue.submit(latency.send_time_usec, end, 1);
                }
            }
            MsgClass::Status => {
                self.stats.status_count.increment();
            }
            _ => {}
        }
        Ok(())
    }

    // -- outbound ------------------------------------------------------------

    fn send_bursts(&mut self) -> Result<(), ConsumerError> {
        if self.request_index < self.items.len() {
            let mut burst = self.config.requests_per_tick();
            if self.current_ticks < self.config.requests_per_tick_remainder() {
                burst += 1;
            }
            if self.stats.image_retrieval_start_time.load(Ordering::Relaxed) == 0 {
                self.stats
                    .image_retrieval_start_time
                    .store(now_micros(), Ordering::Relaxed);
            }
            self.send_item_request_burst(burst as usize)?;
        }

        // Posts and generics begin once the full image set arrived.
        if self.stats.image_retrieval_end_time.load(Ordering::Relaxed) > 0 {
            if self.config.posts_per_sec > 0 {
                let mut burst = self.config.posts_per_tick();
                if self.current_ticks < self.config.posts_per_tick_remainder() {
                    burst += 1;
                }
                self.send_item_msg_burst(burst as usize, MsgClass::Post)?;
            }
            if self.config.gen_msgs_per_sec > 0 {
                let mut burst = self.config.gen_msgs_per_tick();
                if self.current_ticks < self.config.gen_msgs_per_tick_remainder() {
                    burst += 1;
                }
                self.send_item_msg_burst(burst as usize, MsgClass::Generic)?;
            }
        }
        Ok(())
    }

    fn send_item_request_burst(&mut self, burst: usize) -> Result<(), ConsumerError> {
        for _ in 0..burst {
            if self.request_index >= self.items.len() {
                return Ok(());
            }
            let item = &self.items[self.request_index];
            let stream_id = item.info.stream_id;
            let streaming = item.info.item_flags & item_flags::IS_STREAMING_REQ != 0;
            let name = item.info.attributes.msg_key.name.as_bytes().to_vec();
            let service_id = self.service_id;

            let result = self.send(move |enc| {
                let mut spec =
                    codec::msg::HeaderSpec::new(MsgClass::Request, DomainType::MarketPrice, stream_id);
                spec.streaming = streaming;
                spec.key_name = Some(&name);
                spec.key_service_id = Some(service_id);
                codec::msg::encode_header(enc, &spec)
            });
            match result {
                Err(ConsumerError::Transport(e)) if e.is_no_buffers() => {
                    self.stats.out_of_buffers_count.increment();
                    return Ok(());
                }
                other => other?,
            }

            self.items[self.request_index].state = ItemRequestState::WaitingForRefresh;
            self.request_index += 1;
            self.stats.request_count.increment();
        }
        Ok(())
    }

    /// Post or generic burst over the flagged items, stamping the message
    /// the latency schedule picked.
    fn send_item_msg_burst(
        &mut self,
        burst: usize,
        msg_class: MsgClass,
    ) -> Result<(), ConsumerError> {
        let (latency_rate, latency_number) = match msg_class {
            MsgClass::Post => (
                self.config.latency_posts_per_sec,
                self.post_latency_array.as_mut().map(|a| a.next()).unwrap_or(-1),
            ),
            MsgClass::Generic => (
                self.config.latency_gen_msgs_per_sec,
                self.gen_msg_latency_array.as_mut().map(|a| a.next()).unwrap_or(-1),
            ),
            _ => return Ok(()),
        };

        for i in 0..burst {
            let flag = if msg_class == MsgClass::Post {
                item_flags::IS_POST
            } else {
                item_flags::IS_GEN_MSG
            };
            let Some(item_index) = self.next_flagged_item(flag, msg_class) else {
                return Ok(());
            };

            let latency_start = if latency_rate == ALWAYS_SEND_LATENCY || latency_number == i as i32
            {
                now_micros()
            } else {
                0
            };

            let item = &mut self.items[item_index].info;
            let estimate = match msg_class {
                MsgClass::Post => self.encoder.estimate_post_length(item),
                _ => self.encoder.estimate_gen_msg_length(item),
            };
            let mut buffer = match self.channel.get_buffer(estimate, false) {
                Ok(buffer) => buffer,
                Err(e) if e.is_no_buffers() => {
                    self.stats.out_of_buffers_count.add((burst - i) as u64);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            match msg_class {
                MsgClass::Post => self.encoder.encode_post(&mut buffer, item, latency_start, 14, 1)?,
                _ => self.encoder.encode_gen_msg(&mut buffer, item, latency_start, 14, 1)?,
            }
            self.write(buffer)?;

            if msg_class == MsgClass::Post {
                self.stats.post_sent_count.increment();
            } else {
                self.stats.gen_msg_sent_count.increment();
                if latency_start != 0 {
                    self.stats.latency_gen_msg_sent_count.increment();
                }
            }
        }
        Ok(())
    }

    /// Cyclic scan for the next item carrying `flag`.
    fn next_flagged_item(&mut self, flag: u8, msg_class: MsgClass) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let cursor = if msg_class == MsgClass::Post {
            &mut self.post_item_index
        } else {
            &mut self.gen_msg_item_index
        };
        for _ in 0..self.items.len() {
            let index = *cursor % self.items.len();
            *cursor = cursor.wrapping_add(1);
            let item = &self.items[index];
            if item.info.item_flags & flag != 0 && item.state == ItemRequestState::HasRefresh {
                return Some(index);
            }
        }
        None
    }

    fn send<F>(&self, encode: F) -> Result<(), ConsumerError>
    where
        F: FnOnce(&mut EncodeCursor<'_>) -> CodecResult<()>,
    {
        const MSG_BUF_SIZE: usize = 1024;
        let mut buffer = self.channel.get_buffer(MSG_BUF_SIZE, false)?;
        let capacity = buffer.capacity();
        {
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, 14, 1);
            encode(&mut enc)?;
        }
        self.write(buffer)?;
        Ok(())
    }

    fn write(&self, mut buffer: transport::TransportBuffer) -> Result<(), ConsumerError> {
        loop {
            match self.channel.write(buffer, WritePriority::High)? {
                WriteOutcome::Written { .. } => return Ok(()),
                WriteOutcome::CallAgain(returned) => {
                    self.channel.flush()?;
                    buffer = returned;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{ProviderDriver, ProviderDriverOptions};
    use transport::loopback_pair;

    fn test_config() -> Arc<ConsumerConfig> {
        let config = ConsumerConfig {
            ticks_per_sec: 100,
            item_request_count: 2,
            requests_per_sec: 1000,
            ..Default::default()
        };
        config.validate().unwrap();
        Arc::new(config)
    }

    #[test]
    fn startup_handshake_then_latency_samples_flow() {
        let config = test_config();
        let (consumer_channel, driver_channel) = loopback_pair(transport::LoopbackOptions::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_ack = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ConsumerThreadStats::default());
        let queues = Arc::new(ConsumerLatencyQueues::new());

        let driver_shutdown = Arc::clone(&shutdown);
        let driver_config = Arc::clone(&config);
        let driver = std::thread::spawn(move || {
            let mut driver = ProviderDriver::new(
                Arc::new(driver_channel),
                ProviderDriverOptions {
                    service_id: 1,
                    service_name: driver_config.service_name.clone(),
                    updates_per_tick: 10,
                    ticks_per_sec: driver_config.ticks_per_sec,
                },
                driver_shutdown,
            );
            driver.run();
        });

        let mut consumer = ConsumerThread::new(
            Arc::clone(&config),
            0,
            Arc::new(consumer_channel),
            Arc::clone(&stats),
            Arc::clone(&queues),
            Arc::clone(&shutdown),
            shutdown_ack,
        )
        .unwrap();

        consumer.startup().unwrap();
        assert!(consumer.decoder.is_some());
        assert_eq!(consumer.service_id, 1);
        assert!(consumer.dictionary.len() > 0);

        // Request both items, then pump until their images and some
        // stamped updates arrive.
        consumer.send_bursts().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut update_samples = 0usize;
        while Instant::now() < deadline {
            consumer.process_inbound().unwrap();
            update_samples += queues.updates.drain(|record| {
                assert!(record.end_time >= record.start_time);
            });
            if stats.refresh_count.total() == 2 && update_samples > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::Release);
        driver.join().unwrap();

        assert_eq!(stats.request_count.total(), 2);
        assert_eq!(stats.refresh_count.total(), 2);
        assert!(update_samples > 0, "no stamped updates arrived");
        assert!(stats.image_retrieval_end() > 0);
    }
}
