//! Market-price payload data, encoder support and decoder.
//!
//! Payloads are field lists built from a canned message set (the wire peers
//! rotate through the same set, so content is deterministic). Three
//! reserved timestamp fields carry latency stamps: `TIM_TRK_1` on updates,
//! `TIM_TRK_2` on posts, `TIM_TRK_3` on generic messages. The decoder
//! resolves every fid through the field dictionary and surfaces whichever
//! stamp it finds.

use codec::rdm::dictionary::{DictionaryEntry, FieldDictionary};
use codec::{
    CodecError, CodecResult, EncodeCursor, FieldListDecoder, FieldListEncoder, FieldValue,
};
use types::{BufferValue, DataType};

/// Update latency timestamp field.
pub const TIM_TRK_1_FID: i16 = 3902;
/// Post latency timestamp field.
pub const TIM_TRK_2_FID: i16 = 3903;
/// Generic-message latency timestamp field.
pub const TIM_TRK_3_FID: i16 = 3904;

/// One canned payload: the fields of a single market-price message.
#[derive(Debug, Clone)]
pub struct MarketPriceMsg {
    pub fields: Vec<(i16, FieldValue)>,
}

impl MarketPriceMsg {
    /// Worst-case encoded size: per-entry overhead plus value bytes, plus
    /// room for one latency timestamp field.
    pub fn estimated_length(&self) -> usize {
        let fields: usize = self
            .fields
            .iter()
            .map(|(_, value)| {
                5 + match value {
                    FieldValue::UInt(_) | FieldValue::Int(_) => 8,
                    FieldValue::Real { .. } => 9,
                    FieldValue::Ascii(bytes) => bytes.len(),
                }
            })
            .sum();
        fields + 5 + 8 // latency field slot
    }
}

/// The canned message set both harnesses share.
#[derive(Debug, Clone)]
pub struct MarketPriceMsgData {
    pub refresh: MarketPriceMsg,
    pub updates: Vec<MarketPriceMsg>,
    pub posts: Vec<MarketPriceMsg>,
    pub gen_msgs: Vec<MarketPriceMsg>,
}

fn real(mantissa: i64, exponent: i8) -> FieldValue {
    FieldValue::Real { mantissa, exponent }
}

impl MarketPriceMsgData {
    /// Built-in data set standing in for an external message-data file.
    pub fn canned() -> Self {
        let refresh = MarketPriceMsg {
            fields: vec![
                (2, FieldValue::UInt(100)),             // RDNDISPLAY
                (4, FieldValue::UInt(155)),             // RDN_EXCHID
                (6, real(400_000, -4)),                 // TRDPRC_1
                (22, real(399_900, -4)),                // BID
                (25, real(400_100, -4)),                // ASK
                (32, real(1_000, 0)),                   // ACVOL_1
                (11, real(250, -4)),                    // NETCHNG_1
                (3, FieldValue::Ascii(b"TRI.N".to_vec())), // DSPLY_NAME
            ],
        };
        let updates = vec![
            MarketPriceMsg {
                fields: vec![
                    (6, real(400_250, -4)),
                    (22, real(400_150, -4)),
                    (25, real(400_350, -4)),
                    (32, real(1_100, 0)),
                ],
            },
            MarketPriceMsg {
                fields: vec![
                    (6, real(399_750, -4)),
                    (22, real(399_650, -4)),
                    (25, real(399_850, -4)),
                    (32, real(1_200, 0)),
                ],
            },
        ];
        let posts = vec![
            MarketPriceMsg {
                fields: vec![
                    (6, real(400_500, -4)),
                    (22, real(400_400, -4)),
                    (25, real(400_600, -4)),
                ],
            },
            MarketPriceMsg {
                fields: vec![
                    (6, real(399_500, -4)),
                    (22, real(399_400, -4)),
                    (25, real(399_600, -4)),
                ],
            },
        ];
        let gen_msgs = vec![
            MarketPriceMsg {
                fields: vec![
                    (6, real(400_050, -4)),
                    (32, real(1_300, 0)),
                ],
            },
            MarketPriceMsg {
                fields: vec![
                    (6, real(399_950, -4)),
                    (32, real(1_400, 0)),
                ],
            },
        ];
        Self {
            refresh,
            updates,
            posts,
            gen_msgs,
        }
    }

    /// Field dictionary covering every fid the canned set uses.
    pub fn field_dictionary() -> FieldDictionary {
        let mut dictionary = FieldDictionary::new();
        let entries: &[(i16, &[u8], DataType)] = &[
            (2, b"RDNDISPLAY", DataType::UInt),
            (3, b"DSPLY_NAME", DataType::AsciiString),
            (4, b"RDN_EXCHID", DataType::UInt),
            (6, b"TRDPRC_1", DataType::Real),
            (11, b"NETCHNG_1", DataType::Real),
            (22, b"BID", DataType::Real),
            (25, b"ASK", DataType::Real),
            (32, b"ACVOL_1", DataType::Real),
            (TIM_TRK_1_FID, b"TIM_TRK_1", DataType::UInt),
            (TIM_TRK_2_FID, b"TIM_TRK_2", DataType::UInt),
            (TIM_TRK_3_FID, b"TIM_TRK_3", DataType::UInt),
        ];
        for &(fid, name, data_type) in entries {
            dictionary.insert(DictionaryEntry {
                fid,
                name: BufferValue::from_bytes(name),
                data_type,
            });
        }
        dictionary
    }
}

/// Encode one canned payload as a field list, appending the latency
/// timestamp field when `latency_usec` is non-zero.
pub fn encode_payload(
    enc: &mut EncodeCursor<'_>,
    msg: &MarketPriceMsg,
    latency_fid: i16,
    latency_usec: u64,
) -> CodecResult<()> {
    let mut list = FieldListEncoder::init(enc)?;
    for (fid, value) in &msg.fields {
        list.add(enc, *fid, value)?;
    }
    if latency_usec != 0 {
        list.add(enc, latency_fid, &FieldValue::UInt(latency_usec))?;
    }
    list.complete(enc)
}

/// Which latency stamp a decoded payload carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyKind {
    Update,
    Post,
    GenMsg,
}

/// A latency stamp extracted from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedLatency {
    pub kind: LatencyKind,
    pub send_time_usec: u64,
}

/// Consumer-side payload decoder.
///
/// Every fid is resolved through the dictionary and its declared type
/// checked against the dictionary's; a mismatch or unknown fid rejects the
/// message.
pub struct MarketPriceDecoder {
    dictionary: FieldDictionary,
}

impl MarketPriceDecoder {
    pub fn new(dictionary: FieldDictionary) -> Self {
        Self { dictionary }
    }

    /// Decode one payload, returning the latency stamp if one was present.
    pub fn decode(&self, payload: &[u8]) -> CodecResult<Option<DecodedLatency>> {
        let mut cur = codec::DecodeCursor::new(payload);
        let mut list = FieldListDecoder::init(&mut cur)?;
        let mut latency = None;

        while let Some(entry) = list.decode_next()? {
            let dict_entry = self.dictionary.lookup(entry.fid)?;
            if entry.declared_type() != Some(dict_entry.data_type) {
                return Err(CodecError::decode(
                    0,
                    format!(
                        "field {} declared {:?}, dictionary says {:?}",
                        entry.fid,
                        entry.declared_type(),
                        dict_entry.data_type
                    ),
                ));
            }
            let kind = match entry.fid {
                TIM_TRK_1_FID => Some(LatencyKind::Update),
                TIM_TRK_2_FID => Some(LatencyKind::Post),
                TIM_TRK_3_FID => Some(LatencyKind::GenMsg),
                _ => None,
            };
            match kind {
                Some(kind) => {
                    let send_time_usec = entry.expect_uint()?;
                    if send_time_usec > 0 {
                        latency = Some(DecodedLatency {
                            kind,
                            send_time_usec,
                        });
                    }
                }
                None => {
                    // Values are fully decoded to validate the payload even
                    // though the harness discards them.
                    entry.value()?;
                }
            }
        }
        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_update(latency_usec: u64) -> Vec<u8> {
        let data = MarketPriceMsgData::canned();
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 1024, 14, 1);
        encode_payload(&mut enc, &data.updates[0], TIM_TRK_1_FID, latency_usec).unwrap();
        buf
    }

    #[test]
    fn update_without_latency_decodes_to_none() {
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let payload = encode_update(0);
        assert_eq!(decoder.decode(&payload).unwrap(), None);
    }

    #[test]
    fn latency_stamp_round_trips() {
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let payload = encode_update(123_456_789);
        assert_eq!(
            decoder.decode(&payload).unwrap(),
            Some(DecodedLatency {
                kind: LatencyKind::Update,
                send_time_usec: 123_456_789
            })
        );
    }

    #[test]
    fn post_and_gen_msg_stamps_use_their_own_fields() {
        let data = MarketPriceMsgData::canned();
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 1024, 14, 1);
        encode_payload(&mut enc, &data.posts[0], TIM_TRK_2_FID, 77).unwrap();
        assert_eq!(
            decoder.decode(&buf).unwrap().unwrap().kind,
            LatencyKind::Post
        );

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 1024, 14, 1);
        encode_payload(&mut enc, &data.gen_msgs[0], TIM_TRK_3_FID, 77).unwrap();
        assert_eq!(
            decoder.decode(&buf).unwrap().unwrap().kind,
            LatencyKind::GenMsg
        );
    }

    #[test]
    fn unknown_fid_rejects_the_message() {
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut list = FieldListEncoder::init(&mut enc).unwrap();
        list.add(&mut enc, 9999, &FieldValue::UInt(1)).unwrap();
        list.complete(&mut enc).unwrap();
        assert!(matches!(
            decoder.decode(&buf).unwrap_err(),
            CodecError::UnknownFieldId { fid: 9999 }
        ));
    }

    #[test]
    fn dictionary_type_mismatch_rejects_the_message() {
        let decoder = MarketPriceDecoder::new(MarketPriceMsgData::field_dictionary());
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut list = FieldListEncoder::init(&mut enc).unwrap();
        // BID is Real in the dictionary; a uint here is malformed.
        list.add(&mut enc, 22, &FieldValue::UInt(42)).unwrap();
        list.complete(&mut enc).unwrap();
        assert!(decoder.decode(&buf).is_err());
    }

    #[test]
    fn estimated_length_covers_encoded_size() {
        let data = MarketPriceMsgData::canned();
        for msg in data
            .updates
            .iter()
            .chain(data.posts.iter())
            .chain(data.gen_msgs.iter())
            .chain(std::iter::once(&data.refresh))
        {
            let mut buf = Vec::new();
            let mut enc = EncodeCursor::new(&mut buf, 4096, 14, 1);
            encode_payload(&mut enc, msg, TIM_TRK_1_FID, u64::MAX).unwrap();
            assert!(
                buf.len() <= msg.estimated_length() + 2,
                "estimate {} below encoded {}",
                msg.estimated_length(),
                buf.len()
            );
        }
    }
}
