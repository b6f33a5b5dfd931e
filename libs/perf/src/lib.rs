//! # Feedbench Performance-Harness Core
//!
//! ## Purpose
//!
//! The machinery both harnesses share: online statistics accumulators, the
//! pooled latency-record queues that ship timestamps off the hot path, the
//! precomputed latency sampling schedule, item bookkeeping (watchlists and
//! per-item state), and the market-price payload encoder/decoder that
//! embeds and extracts latency timestamps.

pub mod item;
pub mod item_encoder;
pub mod latency_array;
pub mod market_price;
pub mod resource;
pub mod stats;
pub mod time_record;

pub use item::{ItemAttributes, ItemData, ItemInfo, ItemWatchlist, MarketPriceItem};
pub use item_encoder::ItemEncoder;
pub use latency_array::{LatencyRandomArray, LatencyRandomArrayOptions};
pub use market_price::{DecodedLatency, LatencyKind, MarketPriceDecoder, MarketPriceMsgData};
pub use resource::ResourceUsageStats;
pub use stats::{CountStat, ValueStatistics};
pub use time_record::{TimeRecord, TimeRecordQueue};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PerfError {
    /// Latency schedule options that cannot produce a valid schedule.
    #[error("invalid latency random array options: {reason} ({name} = {value})")]
    InvalidLatencyArrayOptions {
        name: &'static str,
        value: i64,
        reason: &'static str,
    },
}
