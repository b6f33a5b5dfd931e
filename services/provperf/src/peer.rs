//! Loopback consumer driver.
//!
//! Sits on the peer end of each provider thread's channel and plays the
//! consumer role: logs in, pulls the directory, requests a block of
//! streaming items, consumes the resulting traffic, echoes RTT probes and
//! sends latency-stamped generic messages so the provider's receive-side
//! statistics fill in.

use codec::rdm::directory::DirectoryRequest;
use codec::rdm::login::{LoginMsg, LoginRequest, LoginRtt};
use codec::{CodecResult, EncodeCursor, RawMsg};
use config::ProviderConfig;
use perf::item::item_flags;
use perf::{ItemEncoder, ItemInfo, MarketPriceMsgData};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use transport::{Channel, LoopbackChannel, TransportError, WriteOutcome, WritePriority};
use types::{BufferValue, DomainType, MsgClass};

/// First item stream id; control streams sit below it.
pub const ITEM_STREAM_ID_START: i32 = 6;

/// Settings for one consumer driver.
pub struct ConsumerDriverOptions {
    pub item_count: u32,
    pub gen_msgs_per_tick: u32,
    pub ticks_per_sec: u32,
}

impl ConsumerDriverOptions {
    pub fn from_provider_config(config: &ProviderConfig, item_count: u32) -> Self {
        Self {
            item_count,
            // Mirror the provider's generic rate back at it so receive-side
            // stats and latency records have traffic to measure.
            gen_msgs_per_tick: (config.gen_msgs_per_sec / config.ticks_per_sec).max(
                if config.gen_msgs_per_sec > 0 { 1 } else { 0 },
            ),
            ticks_per_sec: config.ticks_per_sec,
        }
    }
}

/// Drives the consumer side of a loopback pair until shutdown.
pub struct ConsumerDriver {
    channel: Arc<LoopbackChannel>,
    options: ConsumerDriverOptions,
    encoder: ItemEncoder,
    items: Vec<ItemInfo>,
    next_gen_msg_item: usize,
    shutdown: Arc<AtomicBool>,
}

impl ConsumerDriver {
    pub fn new(
        channel: Arc<LoopbackChannel>,
        options: ConsumerDriverOptions,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            options,
            encoder: ItemEncoder::new(MarketPriceMsgData::canned()),
            items: Vec::new(),
            next_gen_msg_item: 0,
            shutdown,
        }
    }

    pub fn run(&mut self) {
        if let Err(error) = self.startup() {
            tracing::error!(%error, "consumer driver startup failed");
            return;
        }

        let tick = Duration::from_micros(1_000_000 / self.options.ticks_per_sec as u64);
        let mut next_tick = Instant::now() + tick;
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(error) = self.drain_inbound() {
                if !matches!(error, TransportError::ChannelClosed { .. }) {
                    tracing::error!(%error, "consumer driver read failed");
                }
                break;
            }
            if let Err(error) = self.send_gen_msg_burst() {
                tracing::error!(%error, "consumer driver generic burst failed");
                break;
            }
            let now = Instant::now();
            if now < next_tick {
                std::thread::sleep(next_tick - now);
            }
            next_tick += tick;
        }
    }

    fn startup(&mut self) -> Result<(), TransportError> {
        let mut request = LoginRequest::new();
        request.user_name.set_str("perfuser");
        request.attrib.application_name.set_str("consdriver");
        request.attrib.support_rtt_monitoring = Some(2);
        self.send(|enc| request.encode(enc))?;

        let directory_request = DirectoryRequest::new();
        self.send(|enc| directory_request.encode(enc))?;

        for i in 0..self.options.item_count {
            let stream_id = ITEM_STREAM_ID_START + i as i32;
            let name = format!("ITEM{i:05}");

            let mut item = ItemInfo::default();
            item.stream_id = stream_id;
            item.attributes.domain_type = Some(DomainType::MarketPrice);
            item.attributes.msg_key.name = BufferValue::from_bytes(name.as_bytes());
            item.item_flags = item_flags::IS_STREAMING_REQ | item_flags::IS_GEN_MSG;
            self.items.push(item);

            self.send(move |enc| {
                let mut spec =
                    codec::msg::HeaderSpec::new(MsgClass::Request, DomainType::MarketPrice, stream_id);
                spec.streaming = true;
                spec.key_name = Some(name.as_bytes());
                spec.key_service_id = Some(1);
                codec::msg::encode_header(enc, &spec)
            })?;
        }
        tracing::info!(items = self.options.item_count, "consumer driver requests sent");
        Ok(())
    }

    fn drain_inbound(&mut self) -> Result<(), TransportError> {
        while let Some(bytes) = self.channel.read()? {
            let Ok(raw) = RawMsg::decode(&bytes) else {
                continue;
            };
            if raw.domain_type == DomainType::Login && raw.msg_class == MsgClass::Generic {
                // RTT probe: echo the provider's ticks straight back.
                if let Ok(LoginMsg::Rtt(rtt)) = LoginMsg::decode(&raw) {
                    let mut echo = LoginRtt::new();
                    echo.ticks = rtt.ticks;
                    echo.tcp_retrans = rtt.tcp_retrans;
                    let _ = self.send(|enc| echo.encode(enc));
                }
            }
            // Refreshes and updates are consumed and dropped; the driver
            // only keeps the provider's pipeline moving.
        }
        Ok(())
    }

    fn send_gen_msg_burst(&mut self) -> Result<(), TransportError> {
        if self.items.is_empty() {
            return Ok(());
        }
        for _ in 0..self.options.gen_msgs_per_tick {
            let index = self.next_gen_msg_item % self.items.len();
            self.next_gen_msg_item = self.next_gen_msg_item.wrapping_add(1);

            let item = &mut self.items[index];
            let estimate = self.encoder.estimate_gen_msg_length(item);
            let mut buffer = match self.channel.get_buffer(estimate, false) {
                Ok(buffer) => buffer,
                Err(e) if e.is_no_buffers() => return Ok(()),
                Err(e) => return Err(e),
            };
            let latency = crate::thread::now_micros();
            if self
                .encoder
                .encode_gen_msg(&mut buffer, item, latency, 14, 1)
                .is_err()
            {
                self.channel.release_buffer(buffer);
                return Ok(());
            }
            loop {
                match self.channel.write(buffer, WritePriority::Medium)? {
                    WriteOutcome::Written { .. } => break,
                    WriteOutcome::CallAgain(returned) => {
                        self.channel.flush()?;
                        buffer = returned;
                    }
                }
            }
        }
        Ok(())
    }

    fn send<F>(&self, encode: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut EncodeCursor<'_>) -> CodecResult<()>,
    {
        const DRIVER_MSG_BUF_SIZE: usize = 1024;
        let mut buffer = self.channel.get_buffer(DRIVER_MSG_BUF_SIZE, false)?;
        let capacity = buffer.capacity();
        {
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, 14, 1);
            if encode(&mut enc).is_err() {
                self.channel.release_buffer(buffer);
                return Ok(());
            }
        }
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
