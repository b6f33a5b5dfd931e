//! Provider session: per-channel item and buffer state.
//!
//! One session exists per client channel and is owned exclusively by the
//! provider thread driving that channel - no locking, no sharing. Items are
//! indexed twice (by stream id and by attributes) for O(1) lookup either
//! way, and move through three watchlists: refresh-pending on creation,
//! update/genmsg-eligible once their refresh was sent (streaming requests
//! only), removed from everything on close.

use perf::{ItemAttributes, ItemInfo, ItemWatchlist};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use transport::{Channel, TransportBuffer};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("stream {stream_id} is already open")]
    StreamAlreadyOpen { stream_id: i32 },

    #[error("item attributes already open on stream {stream_id}")]
    AttributesAlreadyOpen { stream_id: i32 },

    #[error("stream {stream_id} is not open")]
    StreamNotOpen { stream_id: i32 },
}

/// Per-channel provider state.
pub struct ProviderSession {
    channel: Arc<dyn Channel>,
    items_by_stream: HashMap<i32, ItemInfo>,
    streams_by_attributes: HashMap<ItemAttributes, i32>,
    pub refresh_items: ItemWatchlist,
    pub update_items: ItemWatchlist,
    pub gen_msg_items: ItemWatchlist,
    /// Buffer currently being packed/written, if any.
    pub writing_buffer: Option<TransportBuffer>,
    /// Messages packed into `writing_buffer` so far.
    pub packed_buffer_count: u32,
    /// Client advertised round-trip latency monitoring on login.
    pub rtt_enabled: bool,
}

impl ProviderSession {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            items_by_stream: HashMap::new(),
            streams_by_attributes: HashMap::new(),
            refresh_items: ItemWatchlist::new(),
            update_items: ItemWatchlist::new(),
            gen_msg_items: ItemWatchlist::new(),
            writing_buffer: None,
            packed_buffer_count: 0,
            rtt_enabled: false,
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn open_items_count(&self) -> usize {
        self.items_by_stream.len()
    }

    /// Open a new item and enroll it in the refresh-pending list.
    pub fn create_item(
        &mut self,
        stream_id: i32,
        attributes: ItemAttributes,
        item_flags: u8,
    ) -> Result<&mut ItemInfo, SessionError> {
        if self.items_by_stream.contains_key(&stream_id) {
            return Err(SessionError::StreamAlreadyOpen { stream_id });
        }
        if let Some(&existing) = self.streams_by_attributes.get(&attributes) {
            return Err(SessionError::AttributesAlreadyOpen {
                stream_id: existing,
            });
        }

        let mut item = ItemInfo::default();
        item.stream_id = stream_id;
        item.attributes = attributes.clone();
        item.item_flags = item_flags;

        self.streams_by_attributes.insert(attributes, stream_id);
        self.refresh_items.add(stream_id);
        Ok(self
            .items_by_stream
            .entry(stream_id)
            .or_insert(item))
    }

    /// Close an item: drop it from both indexes and every watchlist.
    pub fn close_item(&mut self, stream_id: i32) -> Result<ItemInfo, SessionError> {
        let item = self
            .items_by_stream
            .remove(&stream_id)
            .ok_or(SessionError::StreamNotOpen { stream_id })?;
        self.streams_by_attributes.remove(&item.attributes);
        self.refresh_items.remove(stream_id);
        self.update_items.remove(stream_id);
        self.gen_msg_items.remove(stream_id);
        Ok(item)
    }

    pub fn item_mut(&mut self, stream_id: i32) -> Option<&mut ItemInfo> {
        self.items_by_stream.get_mut(&stream_id)
    }

    pub fn item(&self, stream_id: i32) -> Option<&ItemInfo> {
        self.items_by_stream.get(&stream_id)
    }

    pub fn stream_by_attributes(&self, attributes: &ItemAttributes) -> Option<i32> {
        self.streams_by_attributes.get(attributes).copied()
    }

    /// Split borrow for the encode path: the buffer being written and the
    /// item being encoded are disjoint session fields.
    pub fn writing_buffer_and_item(
        &mut self,
        stream_id: i32,
    ) -> Option<(&mut TransportBuffer, &mut ItemInfo)> {
        let buffer = self.writing_buffer.as_mut()?;
        let item = self.items_by_stream.get_mut(&stream_id)?;
        Some((buffer, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{loopback_pair, LoopbackOptions};
    use types::{BufferValue, DomainType};

    fn attributes(name: &[u8]) -> ItemAttributes {
        let mut attrs = ItemAttributes::default();
        attrs.domain_type = Some(DomainType::MarketPrice);
        attrs.msg_key.name = BufferValue::from_bytes(name);
        attrs
    }

    fn session() -> ProviderSession {
        let (channel, _peer) = loopback_pair(LoopbackOptions::default());
        ProviderSession::new(Arc::new(channel))
    }

    #[test]
    fn created_item_is_refresh_pending_and_indexed_both_ways() {
        let mut session = session();
        session.create_item(6, attributes(b"RDT0"), 0).unwrap();
        assert_eq!(session.open_items_count(), 1);
        assert_eq!(session.refresh_items.front(), Some(6));
        assert!(session.update_items.is_empty());
        assert_eq!(session.stream_by_attributes(&attributes(b"RDT0")), Some(6));
        assert!(session.item(6).is_some());
    }

    #[test]
    fn duplicate_stream_or_attributes_is_rejected() {
        let mut session = session();
        session.create_item(6, attributes(b"RDT0"), 0).unwrap();
        assert!(matches!(
            session.create_item(6, attributes(b"RDT1"), 0),
            Err(SessionError::StreamAlreadyOpen { stream_id: 6 })
        ));
        assert!(matches!(
            session.create_item(7, attributes(b"RDT0"), 0),
            Err(SessionError::AttributesAlreadyOpen { stream_id: 6 })
        ));
    }

    #[test]
    fn close_removes_from_all_watchlists_and_indexes() {
        let mut session = session();
        session.create_item(6, attributes(b"RDT0"), 0).unwrap();
        session.update_items.add(6);
        session.gen_msg_items.add(6);

        session.close_item(6).unwrap();
        assert_eq!(session.open_items_count(), 0);
        assert!(session.refresh_items.is_empty());
        assert!(session.update_items.is_empty());
        assert!(session.gen_msg_items.is_empty());
        assert_eq!(session.stream_by_attributes(&attributes(b"RDT0")), None);

        assert!(matches!(
            session.close_item(6),
            Err(SessionError::StreamNotOpen { stream_id: 6 })
        ));
    }
}
