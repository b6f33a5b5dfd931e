//! Item-level message encoding.
//!
//! Turns an `ItemInfo` plus the canned message set into complete wire
//! messages written straight into a transport buffer: refresh images,
//! rotating updates, generic messages and posts, with the latency stamp
//! dropped into the class's reserved field when requested.

use crate::item::{item_flags, ItemInfo};
use crate::market_price::{
    encode_payload, MarketPriceMsgData, TIM_TRK_1_FID, TIM_TRK_2_FID, TIM_TRK_3_FID,
};
use codec::msg::{encode_header, HeaderSpec};
use codec::{CodecResult, EncodeCursor};
use transport::TransportBuffer;
use types::{DataState, DataType, DomainType, MsgClass, State, StreamState};

/// Header bytes reserved on top of the payload estimate.
const REFRESH_HEADER_ESTIMATE: usize = 96;
const MSG_HEADER_ESTIMATE: usize = 32;

/// Encoder for item streams, shared by provider and consumer threads.
pub struct ItemEncoder {
    msg_data: MarketPriceMsgData,
    refresh_state_text: &'static str,
}

impl ItemEncoder {
    pub fn new(msg_data: MarketPriceMsgData) -> Self {
        Self {
            msg_data,
            refresh_state_text: "Item Refresh Completed",
        }
    }

    pub fn msg_data(&self) -> &MarketPriceMsgData {
        &self.msg_data
    }

    pub fn estimate_refresh_length(&self, _item: &ItemInfo) -> usize {
        self.msg_data.refresh.estimated_length() + REFRESH_HEADER_ESTIMATE
    }

    pub fn estimate_update_length(&self, item: &ItemInfo) -> usize {
        let index = self.peek_index(item, self.msg_data.updates.len());
        self.msg_data.updates[index].estimated_length() + MSG_HEADER_ESTIMATE
    }

    pub fn estimate_gen_msg_length(&self, item: &ItemInfo) -> usize {
        let index = self.peek_index(item, self.msg_data.gen_msgs.len());
        self.msg_data.gen_msgs[index].estimated_length() + MSG_HEADER_ESTIMATE
    }

    pub fn estimate_post_length(&self, item: &ItemInfo) -> usize {
        let index = self.peek_index(item, self.msg_data.posts.len());
        self.msg_data.posts[index].estimated_length() + MSG_HEADER_ESTIMATE
    }

    fn peek_index(&self, item: &ItemInfo, count: usize) -> usize {
        let crate::item::ItemData::MarketPrice(mp) = &item.item_data;
        mp.i_msg % count.max(1)
    }

    /// Encode a refresh image for `item` into `buffer`.
    pub fn encode_refresh(
        &self,
        buffer: &mut TransportBuffer,
        item: &ItemInfo,
        service_id: u16,
        major: u8,
        minor: u8,
    ) -> CodecResult<()> {
        let capacity = buffer.capacity();
        let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, major, minor);

        let mut state = State {
            stream_state: if item.is_streaming() {
                StreamState::Open
            } else {
                StreamState::NonStreaming
            },
            data_state: DataState::Ok,
            ..Default::default()
        };
        state.text.set_str(self.refresh_state_text);

        let mut spec = HeaderSpec::new(
            MsgClass::Refresh,
            DomainType::MarketPrice,
            item.stream_id,
        );
        spec.state = Some(&state);
        spec.solicited = item.item_flags & item_flags::IS_SOLICITED != 0;
        spec.refresh_complete = true;
        spec.clear_cache = true;
        spec.private_stream = item.item_flags & item_flags::IS_PRIVATE != 0;
        spec.key_name = Some(item.attributes.msg_key.name.as_bytes());
        spec.key_service_id = Some(service_id);
        spec.container_type = Some(DataType::FieldList);
        encode_header(&mut enc, &spec)?;

        encode_payload(&mut enc, &self.msg_data.refresh, TIM_TRK_1_FID, 0)
    }

    /// Encode the item's next update, stamping `latency_usec` when non-zero.
    pub fn encode_update(
        &self,
        buffer: &mut TransportBuffer,
        item: &mut ItemInfo,
        latency_usec: u64,
        major: u8,
        minor: u8,
    ) -> CodecResult<()> {
        let index = item.market_price_mut().next_msg(self.msg_data.updates.len());
        let capacity = buffer.capacity();
        let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, major, minor);

        let mut spec = HeaderSpec::new(MsgClass::Update, DomainType::MarketPrice, item.stream_id);
        spec.container_type = Some(DataType::FieldList);
        encode_header(&mut enc, &spec)?;

        encode_payload(
            &mut enc,
            &self.msg_data.updates[index],
            TIM_TRK_1_FID,
            latency_usec,
        )
    }

    /// Encode the item's next generic message.
    pub fn encode_gen_msg(
        &self,
        buffer: &mut TransportBuffer,
        item: &mut ItemInfo,
        latency_usec: u64,
        major: u8,
        minor: u8,
    ) -> CodecResult<()> {
        let index = item
            .market_price_mut()
            .next_msg(self.msg_data.gen_msgs.len());
        let capacity = buffer.capacity();
        let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, major, minor);

        let mut spec = HeaderSpec::new(MsgClass::Generic, DomainType::MarketPrice, item.stream_id);
        spec.container_type = Some(DataType::FieldList);
        encode_header(&mut enc, &spec)?;

        encode_payload(
            &mut enc,
            &self.msg_data.gen_msgs[index],
            TIM_TRK_3_FID,
            latency_usec,
        )
    }

    /// Encode the item's next post.
    pub fn encode_post(
        &self,
        buffer: &mut TransportBuffer,
        item: &mut ItemInfo,
        latency_usec: u64,
        major: u8,
        minor: u8,
    ) -> CodecResult<()> {
        let index = item.market_price_mut().next_msg(self.msg_data.posts.len());
        let capacity = buffer.capacity();
        let mut enc = EncodeCursor::new(buffer.data_mut(), capacity, major, minor);

        let mut spec = HeaderSpec::new(MsgClass::Post, DomainType::MarketPrice, item.stream_id);
        spec.container_type = Some(DataType::FieldList);
        encode_header(&mut enc, &spec)?;

        encode_payload(
            &mut enc,
            &self.msg_data.posts[index],
            TIM_TRK_2_FID,
            latency_usec,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_price::{DecodedLatency, LatencyKind, MarketPriceDecoder};
    use codec::RawMsg;
    use types::BufferValue;

    fn test_item() -> ItemInfo {
        let mut item = ItemInfo::default();
        item.stream_id = 6;
        item.attributes.domain_type = Some(DomainType::MarketPrice);
        item.attributes.msg_key.name = BufferValue::from_bytes(b"RDT0");
        item.item_flags = item_flags::IS_STREAMING_REQ | item_flags::IS_SOLICITED;
        item
    }

    fn buffer_for(len: usize) -> TransportBuffer {
        use transport::{loopback_pair, Channel, LoopbackOptions};
        let (channel, _peer) = loopback_pair(LoopbackOptions::default());
        channel.get_buffer(len, false).unwrap()
    }

    #[test]
    fn refresh_encodes_within_estimate() {
        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let item = test_item();
        let estimate = encoder.estimate_refresh_length(&item);
        let mut buffer = buffer_for(estimate);
        encoder.encode_refresh(&mut buffer, &item, 1, 14, 1).unwrap();

        let raw = RawMsg::decode(buffer.data()).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Refresh);
        assert_eq!(raw.domain_type, DomainType::MarketPrice);
        assert_eq!(raw.stream_id, 6);
        assert!(raw.solicited());
        assert_eq!(raw.key.unwrap().name, Some(&b"RDT0"[..]));
        assert_eq!(raw.state.unwrap().stream_state, StreamState::Open);
    }

    #[test]
    fn snapshot_refresh_is_non_streaming() {
        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let mut item = test_item();
        item.item_flags = item_flags::IS_SOLICITED; // no streaming bit
        let mut buffer = buffer_for(encoder.estimate_refresh_length(&item));
        encoder.encode_refresh(&mut buffer, &item, 1, 14, 1).unwrap();

        let raw = RawMsg::decode(buffer.data()).unwrap();
        assert_eq!(raw.state.unwrap().stream_state, StreamState::NonStreaming);
    }

    #[test]
    fn update_carries_latency_stamp_through_decode() {
        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let mut item = test_item();

        let mut buffer = buffer_for(encoder.estimate_update_length(&item));
        encoder
            .encode_update(&mut buffer, &mut item, 555_000, 14, 1)
            .unwrap();

        let raw = RawMsg::decode(buffer.data()).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Update);
        assert_eq!(
            decoder.decode(raw.payload).unwrap(),
            Some(DecodedLatency {
                kind: LatencyKind::Update,
                send_time_usec: 555_000
            })
        );
    }

    #[test]
    fn updates_rotate_through_the_canned_set() {
        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let mut item = test_item();
        let count = encoder.msg_data().updates.len();

        let mut payloads = Vec::new();
        for _ in 0..count {
            let mut buffer = buffer_for(encoder.estimate_update_length(&item));
            encoder
                .encode_update(&mut buffer, &mut item, 0, 14, 1)
                .unwrap();
            payloads.push(buffer.data().to_vec());
        }
        // Next cycle repeats the first payload.
        let mut buffer = buffer_for(encoder.estimate_update_length(&item));
        encoder
            .encode_update(&mut buffer, &mut item, 0, 14, 1)
            .unwrap();
        assert_eq!(buffer.data(), payloads[0].as_slice());
        assert_ne!(payloads[0], payloads[1]);
    }

    #[test]
    fn gen_msg_and_post_use_their_latency_fields() {
        let encoder = ItemEncoder::new(MarketPriceMsgData::canned());
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let mut item = test_item();

        let mut buffer = buffer_for(encoder.estimate_gen_msg_length(&item));
        encoder
            .encode_gen_msg(&mut buffer, &mut item, 42, 14, 1)
            .unwrap();
        let raw = RawMsg::decode(buffer.data()).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Generic);
        assert_eq!(
            decoder.decode(raw.payload).unwrap().unwrap().kind,
            LatencyKind::GenMsg
        );

        let mut buffer = buffer_for(encoder.estimate_post_length(&item));
        encoder
            .encode_post(&mut buffer, &mut item, 42, 14, 1)
            .unwrap();
        let raw = RawMsg::decode(buffer.data()).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Post);
        assert_eq!(
            decoder.decode(raw.payload).unwrap().unwrap().kind,
            LatencyKind::Post
        );
    }
}
