//! Provider thread: the tick-scheduled burst engine.
//!
//! Each thread owns one channel's session outright and runs a fixed-rate
//! tick loop: drain inbound messages (requests, closes, posts, generic
//! messages), then send this tick's refresh, update and generic bursts.
//! Shutdown is cooperative - an atomic flag polled once per tick, with an
//! acknowledgment flag set on the way out.

use crate::session::{ProviderSession, SessionError};
use codec::rdm::dictionary::DictionaryRefresh;
use codec::rdm::directory::{DirectoryRefresh, Service, ServiceInfo, ServiceState};
use codec::rdm::login::{LoginRefresh, LoginRequest, LoginRtt, TimeUnit};
use codec::{CodecError, EncodeCursor, RawMsg};
use config::{ProviderConfig, ALWAYS_SEND_LATENCY, LATENCY_RANDOM_ARRAY_SET_COUNT};
use perf::item::item_flags;
use perf::{
    CountStat, ItemAttributes, ItemEncoder, LatencyKind, LatencyRandomArray,
    LatencyRandomArrayOptions, MarketPriceDecoder, MarketPriceMsgData, TimeRecordQueue,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use transport::{TransportError, WriteOutcome, WritePriority};
use types::{DomainType, MsgClass, Qos};

/// Latency records the stats thread drains per provider thread.
pub const TIME_RECORD_POOL_SIZE: usize = 10_240;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ProviderError {
    fn is_out_of_buffers(&self) -> bool {
        matches!(self, ProviderError::Transport(e) if e.is_no_buffers())
    }
}

/// Counters a provider thread maintains; read by the collector thread.
#[derive(Debug, Default)]
pub struct ProviderThreadStats {
    pub item_request_count: CountStat,
    pub refresh_msg_count: CountStat,
    pub update_msg_count: CountStat,
    pub close_msg_count: CountStat,
    pub post_msg_count: CountStat,
    pub gen_msg_sent_count: CountStat,
    pub gen_msg_recv_count: CountStat,
    pub latency_gen_msg_sent_count: CountStat,
    pub out_of_buffers_count: CountStat,
    pub msg_sent_count: CountStat,
    pub buffer_sent_count: CountStat,
}

/// Wall-clock microseconds; both ends of the loopback stamp from it.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// One provider connection's burst engine.
pub struct ProviderThread {
    config: Arc<ProviderConfig>,
    index: u32,
    item_encoder: ItemEncoder,
    decoder: MarketPriceDecoder,
    update_latency_array: Option<LatencyRandomArray>,
    gen_msg_latency_array: Option<LatencyRandomArray>,
    current_ticks: u32,
    stats: Arc<ProviderThreadStats>,
    /// Latency stamps decoded from inbound generic messages.
    gen_msg_latency_records: Arc<TimeRecordQueue>,
    shutdown: Arc<AtomicBool>,
    shutdown_ack: Arc<AtomicBool>,
}

impl ProviderThread {
    pub fn new(
        config: Arc<ProviderConfig>,
        index: u32,
        stats: Arc<ProviderThreadStats>,
        gen_msg_latency_records: Arc<TimeRecordQueue>,
        shutdown: Arc<AtomicBool>,
        shutdown_ack: Arc<AtomicBool>,
    ) -> Result<Self, perf::PerfError> {
        let update_latency_array = if config.updates_per_sec != 0 && config.latency_update_rate > 0
        {
            Some(LatencyRandomArray::create(&LatencyRandomArrayOptions {
                total_msgs_per_sec: config.updates_per_sec,
                latency_msgs_per_sec: config.latency_update_rate as u32,
                ticks_per_sec: config.ticks_per_sec,
                array_count: LATENCY_RANDOM_ARRAY_SET_COUNT,
            })?)
        } else {
            None
        };
        let gen_msg_latency_array = if config.gen_msgs_per_sec != 0
            && config.latency_gen_msg_rate > 0
        {
            Some(LatencyRandomArray::create(&LatencyRandomArrayOptions {
                total_msgs_per_sec: config.gen_msgs_per_sec,
                latency_msgs_per_sec: config.latency_gen_msg_rate as u32,
                ticks_per_sec: config.ticks_per_sec,
                array_count: LATENCY_RANDOM_ARRAY_SET_COUNT,
            })?)
        } else {
            None
        };

        Ok(Self {
            config,
            index,
            item_encoder: ItemEncoder::new(MarketPriceMsgData::canned()),
            decoder: MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary()),
            update_latency_array,
            gen_msg_latency_array,
            current_ticks: 0,
            stats,
            gen_msg_latency_records,
            shutdown,
            shutdown_ack,
        })
    }

    pub fn stats(&self) -> &Arc<ProviderThreadStats> {
        &self.stats
    }

    /// Tick loop until shutdown is requested or the channel dies.
    pub fn run(&mut self, mut session: ProviderSession) {
        let micros_per_tick = self.config.microseconds_per_tick();
        let start = Instant::now();
        let mut next_tick_time = start.elapsed().as_micros() as u64 + micros_per_tick;

        tracing::info!(provider = self.index, "provider thread running");
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(error) = self.process_inbound(&mut session) {
                tracing::error!(provider = self.index, %error, "inbound processing failed");
                break;
            }

            let now = start.elapsed().as_micros() as u64;
            if now < next_tick_time {
                std::thread::sleep(Duration::from_micros(next_tick_time - now));
            }
            next_tick_time += micros_per_tick;

            if let Err(error) = self.send_bursts(&mut session) {
                tracing::error!(provider = self.index, %error, "burst send failed");
                break;
            }

            self.current_ticks += 1;
            if self.current_ticks == self.config.ticks_per_sec {
                self.current_ticks = 0;
                // Once a second, probe round-trip latency on sessions that
                // advertised support.
                if session.rtt_enabled {
                    if let Err(error) = self.send_rtt_probe(&mut session) {
                        tracing::warn!(provider = self.index, %error, "rtt probe failed");
                    }
                }
            }
        }

        // Finish the tick's started write before acknowledging shutdown.
        if session.writing_buffer.is_some() {
            if let Err(error) = self.write_current_buffer(&mut session) {
                tracing::warn!(provider = self.index, %error, "final flush failed");
            }
        }
        tracing::info!(provider = self.index, "provider thread stopped");
        self.shutdown_ack.store(true, Ordering::Release);
    }

    /// Refresh, update and generic bursts for one tick.
    pub fn send_bursts(&mut self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        if session.refresh_items.count() > 0 {
            self.send_refresh_burst(session)?;
        }
        if self.config.updates_per_sec > 0 {
            self.send_update_burst(session)?;
        }
        if self.config.gen_msgs_per_sec > 0 {
            self.send_gen_msg_burst(session)?;
        }
        Ok(())
    }

    // -- buffer management ---------------------------------------------------

    fn get_new_buffer(
        &self,
        session: &mut ProviderSession,
        length: usize,
    ) -> Result<(), ProviderError> {
        let packable = self.config.packing_enabled();
        let buffer = session.channel().get_buffer(length, packable)?;
        session.writing_buffer = Some(buffer);
        Ok(())
    }

    /// Get a buffer for a message of `length` bytes, packing into the
    /// current buffer when configured and it still has room. A message too
    /// large for the pack buffer forces the current buffer out first.
    fn get_item_msg_buffer(
        &self,
        session: &mut ProviderSession,
        length: usize,
    ) -> Result<(), ProviderError> {
        if !self.config.packing_enabled() {
            return self.get_new_buffer(session, length);
        }

        let packing_length = self.config.packing_buffer_length as usize;
        if length > packing_length {
            // Too large for a pack buffer: write out whatever is packed,
            // then fall through to a dedicated buffer.
            if session.writing_buffer.is_some() {
                self.write_current_buffer(session)?;
            }
        } else if session.writing_buffer.is_none() {
            return self.get_new_buffer(session, packing_length);
        } else if length
            > session
                .writing_buffer
                .as_ref()
                .map(|b| b.remaining())
                .unwrap_or(0)
        {
            // Out of room in the current pack buffer.
            self.write_current_buffer(session)?;
            return self.get_new_buffer(session, packing_length);
        } else {
            // Enough room to keep packing.
            return Ok(());
        }

        if session.writing_buffer.is_none() {
            self.get_new_buffer(session, length)?;
        }
        Ok(())
    }

    /// Write the session's current buffer, looping flush/retry while the
    /// transport pushes back.
    fn write_current_buffer(&self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        session.packed_buffer_count = 0;
        let Some(mut buffer) = session.writing_buffer.take() else {
            return Ok(());
        };
        loop {
            match session.channel().write(buffer, WritePriority::High)? {
                WriteOutcome::Written { .. } => {
                    self.stats.buffer_sent_count.increment();
                    return Ok(());
                }
                WriteOutcome::CallAgain(returned) => {
                    session.channel().flush()?;
                    buffer = returned;
                }
            }
        }
    }

    /// Account a completed message; pack it or write the buffer out.
    /// `allow_pack` is false for the last message of a burst so latency
    /// stamps never sit in a pack across a tick.
    fn send_item_msg_buffer(
        &self,
        session: &mut ProviderSession,
        allow_pack: bool,
    ) -> Result<(), ProviderError> {
        self.stats.msg_sent_count.increment();
        if session.packed_buffer_count + 1 >= self.config.total_buffers_per_pack || !allow_pack {
            self.write_current_buffer(session)
        } else {
            session.packed_buffer_count += 1;
            if let Some(buffer) = session.writing_buffer.as_mut() {
                buffer.mark_message_boundary();
            }
            Ok(())
        }
    }

    // -- bursts --------------------------------------------------------------

    /// Drain up to `refresh_burst_size` refresh-pending items; streaming
    /// items are enrolled for updates and generic messages afterwards.
    fn send_refresh_burst(&mut self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        let mut refresh_left = session
            .refresh_items
            .count()
            .min(self.config.refresh_burst_size as usize);

        while refresh_left > 0 {
            let stream_id = match session.refresh_items.front() {
                Some(id) => id,
                None => return Ok(()),
            };

            let estimate = {
                let item = session
                    .item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder.estimate_refresh_length(item)
            };
            match self.get_item_msg_buffer(session, estimate) {
                Err(e) if e.is_out_of_buffers() => {
                    self.stats.out_of_buffers_count.add(refresh_left as u64);
                    return Ok(());
                }
                other => other?,
            }

            let service_id = self.config.service_id;
            let (major, minor) = {
                let channel = session.channel();
                (channel.major_version(), channel.minor_version())
            };
            let streaming = {
                let (buffer, item) = session
                    .writing_buffer_and_item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder
                    .encode_refresh(buffer, item, service_id, major, minor)?;
                item.is_streaming()
            };

            self.send_item_msg_buffer(session, refresh_left > 1)?;
            self.stats.refresh_msg_count.increment();

            session.refresh_items.remove_front();
            // Snapshot requests get their image and nothing further.
            if streaming {
                session.update_items.add(stream_id);
                session.gen_msg_items.add(stream_id);
            }
            refresh_left -= 1;
        }
        Ok(())
    }

    /// This tick's update quota, remainder spread over the first ticks.
    fn send_update_burst(&mut self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        let mut updates_left = self.config.updates_per_tick();
        if self.current_ticks < self.config.updates_per_tick_remainder() {
            updates_left += 1;
        }

        let latency_update_number = match self.update_latency_array.as_mut() {
            Some(array) if self.config.latency_update_rate > 0 => array.next(),
            _ => -1,
        };

        if session.update_items.is_empty() {
            return Ok(());
        }

        while updates_left > 0 {
            let Some(stream_id) = session.update_items.next() else {
                break;
            };

            // Stamp the scheduled message of this burst (or all of them
            // when the rate is the always-send sentinel).
            let latency_start = if self.config.latency_update_rate == ALWAYS_SEND_LATENCY
                || latency_update_number == (updates_left as i32 - 1)
            {
                now_micros()
            } else {
                0
            };

            let estimate = {
                let item = session
                    .item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder.estimate_update_length(item)
            };
            match self.get_item_msg_buffer(session, estimate) {
                Err(e) if e.is_out_of_buffers() => {
                    self.stats.out_of_buffers_count.add(updates_left as u64);
                    return Ok(());
                }
                other => other?,
            }

            let (major, minor) = {
                let channel = session.channel();
                (channel.major_version(), channel.minor_version())
            };
            {
                let (buffer, item) = session
                    .writing_buffer_and_item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder
                    .encode_update(buffer, item, latency_start, major, minor)?;
            }

            self.send_item_msg_buffer(session, updates_left > 1)?;
            self.stats.update_msg_count.increment();
            updates_left -= 1;
        }
        Ok(())
    }

    /// Symmetric to updates, with its own schedule and counters.
    fn send_gen_msg_burst(&mut self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        let mut gen_msgs_left = self.config.gen_msgs_per_tick();
        if self.current_ticks < self.config.gen_msgs_per_tick_remainder() {
            gen_msgs_left += 1;
        }

        let latency_number = match self.gen_msg_latency_array.as_mut() {
            Some(array) if self.config.latency_gen_msg_rate > 0 => array.next(),
            _ => -1,
        };

        if session.gen_msg_items.is_empty() {
            return Ok(());
        }

        while gen_msgs_left > 0 {
            let Some(stream_id) = session.gen_msg_items.next() else {
                break;
            };

            let latency_start = if self.config.latency_gen_msg_rate == ALWAYS_SEND_LATENCY
                || latency_number == (gen_msgs_left as i32 - 1)
            {
                self.stats.latency_gen_msg_sent_count.increment();
                now_micros()
            } else {
                0
            };

            let estimate = {
                let item = session
                    .item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder.estimate_gen_msg_length(item)
            };
            match self.get_item_msg_buffer(session, estimate) {
                Err(e) if e.is_out_of_buffers() => {
                    self.stats.out_of_buffers_count.add(gen_msgs_left as u64);
                    return Ok(());
                }
                other => other?,
            }

            let (major, minor) = {
                let channel = session.channel();
                (channel.major_version(), channel.minor_version())
            };
            {
                let (buffer, item) = session
                    .writing_buffer_and_item(stream_id)
                    .ok_or(SessionError::StreamNotOpen { stream_id })?;
                self.item_encoder
                    .encode_gen_msg(buffer, item, latency_start, major, minor)?;
            }

            self.send_item_msg_buffer(session, gen_msgs_left > 1)?;
            self.stats.gen_msg_sent_count.increment();
            gen_msgs_left -= 1;
        }
        Ok(())
    }

    // -- inbound processing --------------------------------------------------

    /// Drain every pending inbound message.
    pub fn process_inbound(&mut self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        while let Some(bytes) = session.channel().read()? {
            let raw = RawMsg::decode(&bytes)?;
            match raw.domain_type {
                DomainType::Login => self.process_login_msg(session, &raw)?,
                DomainType::Directory => self.process_directory_msg(session, &raw)?,
                DomainType::Dictionary => self.process_dictionary_msg(session, &raw)?,
                DomainType::MarketPrice => self.process_item_msg(session, &raw)?,
            }
        }
        Ok(())
    }

    /// Stamp and send a provider-driven RTT probe on the login stream.
    fn send_rtt_probe(&self, session: &mut ProviderSession) -> Result<(), ProviderError> {
        let mut rtt = LoginRtt::new();
        rtt.provider_driven = true;
        rtt.update_rtt_actual_ticks();
        self.send_control_msg(session, |enc| rtt.encode(enc))
    }

    fn process_login_msg(
        &mut self,
        session: &mut ProviderSession,
        raw: &RawMsg<'_>,
    ) -> Result<(), ProviderError> {
        match raw.msg_class {
            MsgClass::Request => {
                let mut request = LoginRequest::new();
                request.decode(raw)?;
                session.rtt_enabled = request.attrib.support_rtt_monitoring.is_some();
                tracing::info!(provider = self.index, user = %request.user_name, "login request");

                let mut refresh = LoginRefresh::new();
                refresh.stream_id = request.stream_id;
                request.user_name.copy_into(&mut refresh.user_name);
                refresh.user_name_type = request.user_name_type;
                refresh.solicited = true;
                refresh.state.text.set_str("Login accepted");
                refresh.attrib.single_open = Some(request.attrib.single_open_or_default());
                refresh.attrib.support_rtt_monitoring = request.attrib.support_rtt_monitoring;
                refresh.features.support_post = Some(1);
                refresh.features.support_standby = Some(0);
                self.send_control_msg(session, |enc| refresh.encode(enc))?;
            }
            MsgClass::Generic => {
                // RTT echo coming back: close the loop on our own stamp.
                let mut rtt = LoginRtt::new();
                rtt.decode(raw)?;
                let latency = rtt.calculate_rtt_latency(TimeUnit::Microseconds);
                tracing::debug!(provider = self.index, latency, "rtt round trip");
            }
            MsgClass::Close => {
                tracing::info!(provider = self.index, "login close");
            }
            other => {
                tracing::warn!(provider = self.index, ?other, "unexpected login msg class");
            }
        }
        Ok(())
    }

    fn process_directory_msg(
        &mut self,
        session: &mut ProviderSession,
        raw: &RawMsg<'_>,
    ) -> Result<(), ProviderError> {
        if raw.msg_class != MsgClass::Request {
            return Ok(());
        }
        let mut refresh = DirectoryRefresh::new();
        refresh.solicited = true;
        refresh.services.push(Service {
            service_id: self.config.service_id,
            info: Some(ServiceInfo {
                name: self.config.service_name.as_str().into(),
                vendor: "Feedbench".into(),
                is_source: Some(1),
                qos: Some(Qos::realtime()),
            }),
            state: Some(ServiceState {
                service_state: 1,
                accepting_requests: Some(1),
            }),
        });
        self.send_control_msg(session, |enc| refresh.encode(enc))
    }

    fn process_dictionary_msg(
        &mut self,
        session: &mut ProviderSession,
        raw: &RawMsg<'_>,
    ) -> Result<(), ProviderError> {
        if raw.msg_class != MsgClass::Request {
            return Ok(());
        }
        let mut request = codec::rdm::dictionary::DictionaryRequest::new();
        request.decode(raw)?;

        let mut refresh = DictionaryRefresh::new();
        refresh.stream_id = request.stream_id;
        request
            .dictionary_name
            .copy_into(&mut refresh.dictionary_name);
        refresh.solicited = true;
        // Serve the canned dictionary; a second download (enum tables)
        // returns the same entry set.
        let dictionary = MarketPriceMsgData::field_dictionary();
        refresh.entries.extend(dictionary.entries().cloned());
        refresh.entries.sort_by_key(|entry| entry.fid);
        self.send_control_msg(session, |enc| refresh.encode(enc))
    }

    fn process_item_msg(
        &mut self,
        session: &mut ProviderSession,
        raw: &RawMsg<'_>,
    ) -> Result<(), ProviderError> {
        match raw.msg_class {
            MsgClass::Request => {
                self.stats.item_request_count.increment();
                let mut attributes = ItemAttributes::default();
                attributes.domain_type = Some(raw.domain_type);
                if let Some(key) = &raw.key {
                    attributes.msg_key = key.to_msg_key();
                }
                let mut flags = item_flags::IS_SOLICITED;
                if raw.streaming() {
                    flags |= item_flags::IS_STREAMING_REQ;
                }
                if raw.private_stream() {
                    flags |= item_flags::IS_PRIVATE;
                }
                session.create_item(raw.stream_id, attributes, flags)?;
            }
            MsgClass::Close => {
                self.stats.close_msg_count.increment();
                session.close_item(raw.stream_id)?;
            }
            MsgClass::Post => {
                self.stats.post_msg_count.increment();
                self.reflect_post(session, raw)?;
            }
            MsgClass::Generic => {
                self.stats.gen_msg_recv_count.increment();
                if let Some(latency) = self.decoder.decode(raw.payload)? {
                    if latency.kind == LatencyKind::GenMsg {
                        self.gen_msg_latency_records.submit(
                            latency.send_time_usec,
                            now_micros(),
                            1,
                        );
                    }
                }
            }
            other => {
                tracing::warn!(provider = self.index, ?other, "unexpected item msg class");
            }
        }
        Ok(())
    }

    /// Reflect a received post back out as an update on the same stream.
    fn reflect_post(
        &mut self,
        session: &mut ProviderSession,
        raw: &RawMsg<'_>,
    ) -> Result<(), ProviderError> {
        if session.item(raw.stream_id).is_none() {
            return Err(SessionError::StreamNotOpen {
                stream_id: raw.stream_id,
            }
            .into());
        }
        let stream_id = raw.stream_id;
        let payload = raw.payload.to_vec();
        self.send_control_msg(session, move |enc| {
            let mut spec =
                codec::msg::HeaderSpec::new(MsgClass::Update, DomainType::MarketPrice, stream_id);
            spec.container_type = Some(types::DataType::FieldList);
            codec::msg::encode_header(enc, &spec)?;
            enc.write_bytes(&payload)
        })
    }

    #[cfg(test)]
    fn current_ticks_mut(&mut self) -> &mut u32 {
        &mut self.current_ticks
    }

    /// Encode-and-send for control-plane messages outside the burst path.
    fn send_control_msg<F>(
        &self,
        session: &mut ProviderSession,
        encode: F,
    ) -> Result<(), ProviderError>
    where
        F: FnOnce(&mut EncodeCursor<'_>) -> codec::CodecResult<()>,
    {
        const CONTROL_MSG_BUF_SIZE: usize = 2048;
        // Control messages never pack; write out any packed data first so
        // ordering stays sane.
        if session.writing_buffer.is_some() {
            self.write_current_buffer(session)?;
        }
        let mut buffer = session.channel().get_buffer(CONTROL_MSG_BUF_SIZE, false)?;
        let (major, minor) = {
            let channel = session.channel();
            (channel.major_version(), channel.minor_version())
        };
        let capacity = buffer.capacity();
        {
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, major, minor);
            encode(&mut enc)?;
        }
        loop {
            match session.channel().write(buffer, WritePriority::High)? {
                WriteOutcome::Written { .. } => {
                    self.stats.buffer_sent_count.increment();
                    return Ok(());
                }
                WriteOutcome::CallAgain(returned) => {
                    session.channel().flush()?;
                    buffer = returned;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{loopback_pair, Channel, LoopbackChannel, LoopbackOptions};
    use types::BufferValue;

    fn test_config(overrides: impl FnOnce(&mut ProviderConfig)) -> Arc<ProviderConfig> {
        let mut config = ProviderConfig {
            ticks_per_sec: 10,
            updates_per_sec: 100,
            latency_update_rate: 10,
            refresh_burst_size: 10,
            ..Default::default()
        };
        overrides(&mut config);
        config.validate().unwrap();
        Arc::new(config)
    }

    fn build_thread(config: Arc<ProviderConfig>) -> (ProviderThread, ProviderSession, LoopbackChannel) {
        let stats = Arc::new(ProviderThreadStats::default());
        let records = Arc::new(TimeRecordQueue::with_capacity(64));
        let shutdown = Arc::new(AtomicBool::new(false));
        let ack = Arc::new(AtomicBool::new(false));
        let thread = ProviderThread::new(config, 0, stats, records, shutdown, ack).unwrap();
        let (provider_channel, peer) = loopback_pair(LoopbackOptions::default());
        let session = ProviderSession::new(Arc::new(provider_channel));
        (thread, session, peer)
    }

    fn open_item(session: &mut ProviderSession, stream_id: i32, name: &[u8], flags: u8) {
        let mut attributes = ItemAttributes::default();
        attributes.domain_type = Some(DomainType::MarketPrice);
        attributes.msg_key.name = BufferValue::from_bytes(name);
        session.create_item(stream_id, attributes, flags).unwrap();
    }

    #[test]
    fn refresh_burst_enrolls_only_streaming_items() {
        let config = test_config(|_| {});
        let (mut thread, mut session, _peer) = build_thread(config);
        open_item(
            &mut session,
            6,
            b"STREAMING",
            item_flags::IS_STREAMING_REQ | item_flags::IS_SOLICITED,
        );
        open_item(&mut session, 7, b"SNAPSHOT", item_flags::IS_SOLICITED);

        thread.send_refresh_burst(&mut session).unwrap();

        assert!(session.refresh_items.is_empty());
        assert!(session.update_items.contains(6));
        assert!(session.gen_msg_items.contains(6));
        assert!(!session.update_items.contains(7));
        assert!(!session.gen_msg_items.contains(7));
        assert_eq!(thread.stats.refresh_msg_count.total(), 2);
    }

    #[test]
    fn oversized_message_forces_pack_flush() {
        let config = test_config(|c| {
            c.total_buffers_per_pack = 10;
            c.packing_buffer_length = 128;
        });
        let (thread, mut session, _peer) = build_thread(config);

        // Start packing a small message.
        thread.get_item_msg_buffer(&mut session, 64).unwrap();
        assert_eq!(session.writing_buffer.as_ref().unwrap().capacity(), 128);
        session.writing_buffer.as_mut().unwrap().data_mut().extend_from_slice(&[0u8; 64]);
        thread.send_item_msg_buffer(&mut session, true).unwrap();
        assert_eq!(session.packed_buffer_count, 1);
        let sent_before = thread.stats.buffer_sent_count.total();

        // A message too large for the pack buffer writes the current one
        // out and gets a dedicated buffer.
        thread.get_item_msg_buffer(&mut session, 512).unwrap();
        assert_eq!(thread.stats.buffer_sent_count.total(), sent_before + 1);
        assert_eq!(session.packed_buffer_count, 0);
        assert_eq!(session.writing_buffer.as_ref().unwrap().capacity(), 512);
    }

    #[test]
    fn full_pack_buffer_is_written_and_replaced() {
        let config = test_config(|c| {
            c.total_buffers_per_pack = 10;
            c.packing_buffer_length = 100;
        });
        let (thread, mut session, _peer) = build_thread(config);

        thread.get_item_msg_buffer(&mut session, 80).unwrap();
        session.writing_buffer.as_mut().unwrap().data_mut().extend_from_slice(&[1u8; 80]);
        thread.send_item_msg_buffer(&mut session, true).unwrap();

        // 80 of 100 bytes used: the next 60-byte message does not fit, so
        // the packed buffer goes out and a fresh one is obtained.
        let sent_before = thread.stats.buffer_sent_count.total();
        thread.get_item_msg_buffer(&mut session, 60).unwrap();
        assert_eq!(thread.stats.buffer_sent_count.total(), sent_before + 1);
        assert_eq!(session.packed_buffer_count, 0);
        assert_eq!(session.writing_buffer.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn update_burst_sends_tick_quota_with_remainder() {
        // 105 updates over 10 ticks: 11 on the first 5 ticks, 10 after.
        let config = test_config(|c| {
            c.updates_per_sec = 105;
            c.latency_update_rate = 0;
        });
        let (mut thread, mut session, peer) = build_thread(config);
        open_item(&mut session, 6, b"RDT0", item_flags::IS_STREAMING_REQ);
        thread.send_refresh_burst(&mut session).unwrap();
        while peer.read().unwrap().is_some() {}

        thread.send_update_burst(&mut session).unwrap();
        assert_eq!(thread.stats.update_msg_count.total(), 11);

        *thread.current_ticks_mut() = 7; // past the remainder window
        thread.send_update_burst(&mut session).unwrap();
        assert_eq!(thread.stats.update_msg_count.total(), 21);

        let mut delivered = 0;
        while peer.read().unwrap().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 21);
    }

    #[test]
    fn out_of_buffers_aborts_burst_and_counts() {
        let config = test_config(|c| {
            c.updates_per_sec = 50;
            c.latency_update_rate = 0;
        });
        let stats = Arc::new(ProviderThreadStats::default());
        let records = Arc::new(TimeRecordQueue::with_capacity(16));
        let shutdown = Arc::new(AtomicBool::new(false));
        let ack = Arc::new(AtomicBool::new(false));
        let mut thread =
            ProviderThread::new(Arc::clone(&config), 0, Arc::clone(&stats), records, shutdown, ack)
                .unwrap();
        // A channel that can never grant a buffer.
        let (channel, _peer) = loopback_pair(LoopbackOptions {
            max_outstanding_buffers: 0,
            ..Default::default()
        });
        let mut session = ProviderSession::new(Arc::new(channel));
        open_item(&mut session, 6, b"RDT0", item_flags::IS_STREAMING_REQ);
        session.refresh_items.remove_front();
        session.update_items.add(6);

        // Not fatal: the burst aborts and the shortfall is counted.
        thread.send_update_burst(&mut session).unwrap();
        assert_eq!(stats.update_msg_count.total(), 0);
        assert_eq!(stats.out_of_buffers_count.total(), 5);
    }

    #[test]
    fn item_request_close_lifecycle() {
        let config = test_config(|_| {});
        let (mut thread, mut session, peer) = build_thread(config);

        // Peer sends a streaming market price request.
        let mut buffer = peer.get_buffer(128, false).unwrap();
        {
            let capacity = buffer.capacity();
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, 14, 1);
            let mut spec = codec::msg::HeaderSpec::new(MsgClass::Request, DomainType::MarketPrice, 6);
            spec.streaming = true;
            spec.key_name = Some(b"RDT0");
            codec::msg::encode_header(&mut enc, &spec).unwrap();
        }
        peer.write(buffer, WritePriority::High).unwrap();

        thread.process_inbound(&mut session).unwrap();
        assert_eq!(thread.stats.item_request_count.total(), 1);
        assert_eq!(session.open_items_count(), 1);
        assert!(session.item(6).unwrap().is_streaming());
        assert_eq!(session.refresh_items.front(), Some(6));

        // Close takes it out of everything.
        let mut buffer = peer.get_buffer(64, false).unwrap();
        {
            let capacity = buffer.capacity();
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, 14, 1);
            let spec = codec::msg::HeaderSpec::new(MsgClass::Close, DomainType::MarketPrice, 6);
            codec::msg::encode_header(&mut enc, &spec).unwrap();
        }
        peer.write(buffer, WritePriority::High).unwrap();

        thread.process_inbound(&mut session).unwrap();
        assert_eq!(thread.stats.close_msg_count.total(), 1);
        assert_eq!(session.open_items_count(), 0);
    }

    #[test]
    fn inbound_gen_msg_latency_is_recorded() {
        let config = test_config(|_| {});
        let (mut thread, mut session, peer) = build_thread(config);
        open_item(&mut session, 6, b"RDT0", item_flags::IS_STREAMING_REQ);

        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let mut item = session.item_mut(6).unwrap().clone();
        let mut buffer = peer.get_buffer(encoder.estimate_gen_msg_length(&item), false).unwrap();
        encoder
            .encode_gen_msg(&mut buffer, &mut item, now_micros(), 14, 1)
            .unwrap();
        peer.write(buffer, WritePriority::High).unwrap();

        thread.process_inbound(&mut session).unwrap();
        assert_eq!(thread.stats.gen_msg_recv_count.total(), 1);
        let mut samples = 0;
        thread.gen_msg_latency_records.drain(|record| {
            assert!(record.end_time >= record.start_time);
            samples += 1;
        });
        assert_eq!(samples, 1);
    }
}
