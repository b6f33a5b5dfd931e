//! Loopback provider driver.
//!
//! The provider side of each consumer thread's channel: answers login,
//! directory, dictionary and item requests, then streams latency-stamped
//! updates to every open streaming item. Received posts and generic
//! messages are turned around so their embedded stamps come back to the
//! consumer's decode path.

use codec::rdm::dictionary::{DictionaryRefresh, DictionaryRequest};
use codec::rdm::directory::{DirectoryRefresh, Service, ServiceInfo, ServiceState};
use codec::rdm::login::{LoginRefresh, LoginRequest};
use codec::{CodecResult, EncodeCursor, RawMsg};
use perf::item::item_flags;
use perf::{ItemEncoder, ItemInfo, ItemWatchlist, MarketPriceMsgData};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use transport::{Channel, LoopbackChannel, TransportError, WriteOutcome, WritePriority};
use types::{DomainType, MsgClass, Qos};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Settings for one provider driver.
pub struct ProviderDriverOptions {
    pub service_id: u16,
    pub service_name: String,
    pub updates_per_tick: u32,
    pub ticks_per_sec: u32,
}

/// Drives the provider side of a loopback pair until shutdown.
pub struct ProviderDriver {
    channel: Arc<LoopbackChannel>,
    options: ProviderDriverOptions,
    encoder: ItemEncoder,
    items: HashMap<i32, ItemInfo>,
    refresh_items: ItemWatchlist,
    update_items: ItemWatchlist,
    shutdown: Arc<AtomicBool>,
}

impl ProviderDriver {
    pub fn new(
        channel: Arc<LoopbackChannel>,
        options: ProviderDriverOptions,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            options,
            encoder: ItemEncoder::new(MarketPriceMsgData::canned()),
            items: HashMap::new(),
            refresh_items: ItemWatchlist::new(),
            update_items: ItemWatchlist::new(),
            shutdown,
        }
    }

    pub fn run(&mut self) {
        let tick = Duration::from_micros(1_000_000 / self.options.ticks_per_sec as u64);
        let mut next_tick = Instant::now() + tick;
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(error) = self.drain_inbound() {
                if !matches!(error, TransportError::ChannelClosed { .. }) {
                    tracing::error!(%error, "provider driver read failed");
                }
                break;
            }
            if let Err(error) = self.send_bursts() {
                tracing::error!(%error, "provider driver burst failed");
                break;
            }
            let now = Instant::now();
            if now < next_tick {
                std::thread::sleep(next_tick - now);
            }
            next_tick += tick;
        }
    }

    fn drain_inbound(&mut self) -> Result<(), TransportError> {
        while let Some(bytes) = self.channel.read()? {
            let Ok(raw) = RawMsg::decode(&bytes) else {
                continue;
            };
            match (raw.domain_type, raw.msg_class) {
                (DomainType::Login, MsgClass::Request) => {
                    let mut request = LoginRequest::new();
                    if request.decode(&raw).is_err() {
                        continue;
                    }
                    let mut refresh = LoginRefresh::new();
                    refresh.stream_id = request.stream_id;
                    request.user_name.copy_into(&mut refresh.user_name);
                    refresh.solicited = true;
                    refresh.state.text.set_str("Login accepted");
                    refresh.features.support_post = Some(1);
                    self.send(|enc| refresh.encode(enc))?;
                }
                (DomainType::Directory, MsgClass::Request) => {
                    let mut refresh = DirectoryRefresh::new();
                    refresh.solicited = true;
                    refresh.services.push(Service {
                        service_id: self.options.service_id,
                        info: Some(ServiceInfo {
                            name: self.options.service_name.as_str().into(),
                            vendor: "Feedbench".into(),
                            is_source: Some(1),
                            qos: Some(Qos::realtime()),
                        }),
                        state: Some(ServiceState {
                            service_state: 1,
                            accepting_requests: Some(1),
                        }),
                    });
                    self.send(|enc| refresh.encode(enc))?;
                }
                (DomainType::Dictionary, MsgClass::Request) => {
                    let mut request = DictionaryRequest::new();
                    if request.decode(&raw).is_err() {
                        continue;
                    }
                    let mut refresh = DictionaryRefresh::new();
                    refresh.stream_id = request.stream_id;
                    request
                        .dictionary_name
                        .copy_into(&mut refresh.dictionary_name);
                    refresh.solicited = true;
                    let dictionary = MarketPriceMsgData::field_dictionary();
                    refresh.entries.extend(dictionary.entries().cloned());
                    refresh.entries.sort_by_key(|entry| entry.fid);
                    self.send(|enc| refresh.encode(enc))?;
                }
                (DomainType::MarketPrice, MsgClass::Request) => {
                    let mut item = ItemInfo::default();
                    item.stream_id = raw.stream_id;
                    item.attributes.domain_type = Some(raw.domain_type);
                    if let Some(key) = &raw.key {
                        item.attributes.msg_key = key.to_msg_key();
                    }
                    item.item_flags = item_flags::IS_SOLICITED
                        | if raw.streaming() {
                            item_flags::IS_STREAMING_REQ
                        } else {
                            0
                        };
                    self.items.insert(raw.stream_id, item);
                    self.refresh_items.add(raw.stream_id);
                }
                (DomainType::MarketPrice, MsgClass::Close) => {
                    self.items.remove(&raw.stream_id);
                    self.refresh_items.remove(raw.stream_id);
                    self.update_items.remove(raw.stream_id);
                }
                (DomainType::MarketPrice, MsgClass::Post) => {
                    // Reflect the post as an update so its stamp returns.
                    self.turn_around(raw.stream_id, MsgClass::Update, raw.payload)?;
                }
                (DomainType::MarketPrice, MsgClass::Generic) => {
                    self.turn_around(raw.stream_id, MsgClass::Generic, raw.payload)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn send_bursts(&mut self) -> Result<(), TransportError> {
        // Refreshes for everything pending.
        while let Some(stream_id) = self.refresh_items.remove_front() {
            let (buffer, streaming) = {
                let Some(item) = self.items.get(&stream_id) else {
                    continue;
                };
                let estimate = self.encoder.estimate_refresh_length(item);
                let mut buffer = match self.channel.get_buffer(estimate, false) {
                    Ok(buffer) => buffer,
                    Err(e) if e.is_no_buffers() => {
                        self.refresh_items.add(stream_id);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                if self
                    .encoder
                    .encode_refresh(&mut buffer, item, self.options.service_id, 14, 1)
                    .is_err()
                {
                    self.channel.release_buffer(buffer);
                    continue;
                }
                (buffer, item.is_streaming())
            };
            self.write(buffer)?;
            if streaming {
                self.update_items.add(stream_id);
            }
        }

        // Update burst, every message stamped so the consumer always has
        // latency samples to aggregate.
        for _ in 0..self.options.updates_per_tick {
            let Some(stream_id) = self.update_items.next() else {
                break;
            };
            let buffer = {
                let Some(item) = self.items.get_mut(&stream_id) else {
                    continue;
                };
                let estimate = self.encoder.estimate_update_length(item);
                let mut buffer = match self.channel.get_buffer(estimate, false) {
                    Ok(buffer) => buffer,
                    Err(e) if e.is_no_buffers() => return Ok(()),
                    Err(e) => return Err(e),
                };
                if self
                    .encoder
                    .encode_update(&mut buffer, item, now_micros(), 14, 1)
                    .is_err()
                {
                    self.channel.release_buffer(buffer);
                    continue;
                }
                buffer
            };
            self.write(buffer)?;
        }
        Ok(())
    }

    /// Re-send a received payload on the same stream as `msg_class`.
    fn turn_around(
        &self,
        stream_id: i32,
        msg_class: MsgClass,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let payload = payload.to_vec();
        self.send(move |enc| {
            let mut spec = codec::msg::HeaderSpec::new(msg_class, DomainType::MarketPrice, stream_id);
            spec.container_type = Some(types::DataType::FieldList);
            codec::msg::encode_header(enc, &spec)?;
            enc.write_bytes(&payload)
        })
    }

    fn send<F>(&self, encode: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut EncodeCursor<'_>) -> CodecResult<()>,
    {
        const DRIVER_MSG_BUF_SIZE: usize = 2048;
        let mut buffer = self.channel.get_buffer(DRIVER_MSG_BUF_SIZE, false)?;
        let capacity = buffer.capacity();
        {
            let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, 14, 1);
            if encode(&mut enc).is_err() {
                self.channel.release_buffer(buffer);
                return Ok(());
            }
        }
        self.write(buffer)
    }

    fn write(&self, mut buffer: transport::TransportBuffer) -> Result<(), TransportError> {
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
