//! Item bookkeeping for a provider session.
//!
//! An `ItemInfo` is one open subscription: identity attributes, flag bits
//! describing how it was requested, and rotating per-domain payload state.
//! Watchlists are cyclically-iterated id collections: refresh-pending items
//! drain from the front, update/genmsg-eligible items rotate forever.

use std::collections::VecDeque;
use types::{DomainType, MsgKey};

/// Item flag bits.
pub mod item_flags {
    /// Item was requested streaming (not snapshot).
    pub const IS_STREAMING_REQ: u8 = 0x04;
    /// Item was requested, not pushed unsolicited.
    pub const IS_SOLICITED: u8 = 0x10;
    /// Item is open for posting.
    pub const IS_POST: u8 = 0x20;
    /// Item is open for generic messages.
    pub const IS_GEN_MSG: u8 = 0x40;
    /// Item was requested on a private stream.
    pub const IS_PRIVATE: u8 = 0x80;
}

/// Composite identity of an item: domain plus message key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ItemAttributes {
    pub domain_type: Option<DomainType>,
    pub msg_key: MsgKey,
}

impl ItemAttributes {
    pub fn clear(&mut self) {
        self.domain_type = None;
        self.msg_key.clear();
    }
}

/// Rotating index into the canned market-price message set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketPriceItem {
    pub i_msg: usize,
}

impl MarketPriceItem {
    /// Advance to the next canned message, wrapping at `msg_count`.
    pub fn next_msg(&mut self, msg_count: usize) -> usize {
        let current = self.i_msg;
        self.i_msg = (self.i_msg + 1) % msg_count.max(1);
        current
    }
}

/// Domain-specific payload state of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemData {
    MarketPrice(MarketPriceItem),
}

impl Default for ItemData {
    fn default() -> Self {
        ItemData::MarketPrice(MarketPriceItem::default())
    }
}

/// One open subscription on a provider session. Owned exclusively by the
/// session; indexed both by stream id and by attributes.
#[derive(Debug, Clone, Default)]
pub struct ItemInfo {
    pub stream_id: i32,
    pub attributes: ItemAttributes,
    pub item_flags: u8,
    pub item_data: ItemData,
}

impl ItemInfo {
    pub fn clear(&mut self) {
        self.stream_id = 0;
        self.attributes.clear();
        self.item_flags = 0;
        self.item_data = ItemData::default();
    }

    pub fn is_streaming(&self) -> bool {
        self.item_flags & item_flags::IS_STREAMING_REQ != 0
    }

    pub fn market_price_mut(&mut self) -> &mut MarketPriceItem {
        match &mut self.item_data {
            ItemData::MarketPrice(item) => item,
        }
    }
}

/// Ordered, cyclically-iterated collection of item stream ids.
#[derive(Debug, Default)]
pub struct ItemWatchlist {
    queue: VecDeque<i32>,
}

impl ItemWatchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn add(&mut self, stream_id: i32) {
        self.queue.push_back(stream_id);
    }

    /// Head of the list without removing it (refresh-pending drain).
    pub fn front(&self) -> Option<i32> {
        self.queue.front().copied()
    }

    pub fn remove_front(&mut self) -> Option<i32> {
        self.queue.pop_front()
    }

    /// Cyclic cursor: returns the head and rotates it to the back.
    pub fn next(&mut self) -> Option<i32> {
        let id = self.queue.pop_front()?;
        self.queue.push_back(id);
        Some(id)
    }

    /// Remove an item wherever it sits (stream close).
    pub fn remove(&mut self, stream_id: i32) {
        self.queue.retain(|&id| id != stream_id);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn contains(&self, stream_id: i32) -> bool {
        self.queue.contains(&stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchlist_rotates_cyclically() {
        let mut list = ItemWatchlist::new();
        list.add(1);
        list.add(2);
        list.add(3);
        let order: Vec<i32> = (0..6).filter_map(|_| list.next()).collect();
        assert_eq!(order, vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(list.count(), 3);
    }

    #[test]
    fn remove_takes_item_out_of_rotation() {
        let mut list = ItemWatchlist::new();
        list.add(1);
        list.add(2);
        list.add(3);
        list.remove(2);
        assert_eq!(list.count(), 2);
        let order: Vec<i32> = (0..4).filter_map(|_| list.next()).collect();
        assert_eq!(order, vec![1, 3, 1, 3]);
    }

    #[test]
    fn front_drain_preserves_order() {
        let mut list = ItemWatchlist::new();
        list.add(10);
        list.add(20);
        assert_eq!(list.front(), Some(10));
        assert_eq!(list.remove_front(), Some(10));
        assert_eq!(list.front(), Some(20));
    }

    #[test]
    fn market_price_item_wraps_message_index() {
        let mut item = MarketPriceItem::default();
        assert_eq!(item.next_msg(3), 0);
        assert_eq!(item.next_msg(3), 1);
        assert_eq!(item.next_msg(3), 2);
        assert_eq!(item.next_msg(3), 0);
    }
}
