//! Stateless translation of raw frames into typed feed messages.
//!
//! The venue multiplexes two encodings over one connection: structured
//! JSON text for control acknowledgements, and protobuf for market data.
//! [`decode_frame`] tries JSON first (acks are rare and cheap to probe),
//! then protobuf. Decoding is tolerant by design: unknown fields are
//! skipped, a partially-populated variant yields whatever it carries, and
//! a tick with no last price is dropped rather than surfaced.

pub mod wire;

use crate::error::FeedError;
use chrono::{DateTime, TimeZone, Utc};
use fnv::FnvHashMap;
use prost::Message;
use serde::{Deserialize, Serialize};
use strike_core::{Greeks, InstrumentKey, Tick};
use wire::{Feed, FeedFrame, FeedUnion, FrameType, SegmentStatus};

/// One decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    ControlAck(ControlAck),
    MarketStatus(MarketStatus),
    TickBatch(Vec<Tick>),
}

/// Acknowledgement of an out-of-band control frame (subscribe or
/// unsubscribe), correlated back to the request by its guid.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ControlAck {
    #[serde(rename = "guid")]
    pub correlation_id: String,
    pub method: String,
    #[serde(
        rename = "status",
        serialize_with = "ser_status",
        deserialize_with = "de_status"
    )]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn de_status<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let status = String::deserialize(deserializer)?;
    Ok(status.eq_ignore_ascii_case("success"))
}

fn ser_status<S>(success: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(if *success { "success" } else { "error" })
}

/// Per-segment open/closed map pushed by the venue on connect and on
/// status transitions.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketStatus {
    pub segments: FnvHashMap<String, SegmentStatus>,
    pub time: DateTime<Utc>,
}

impl MarketStatus {
    pub fn is_open(&self, segment: &str) -> bool {
        matches!(self.segments.get(segment), Some(SegmentStatus::NormalOpen))
    }
}

/// Decode one raw frame into a typed [`FeedMessage`].
///
/// Errors mean the single frame is undecodable and should be dropped by
/// the caller; they never indicate connection state.
pub fn decode_frame(payload: &[u8]) -> Result<FeedMessage, FeedError> {
    if let Ok(text) = std::str::from_utf8(payload) {
        if let Ok(ack) = serde_json::from_str::<ControlAck>(text) {
            return Ok(FeedMessage::ControlAck(ack));
        }
    }

    let frame = FeedFrame::decode(payload)?;
    let frame_time = ms_to_datetime(frame.current_ts);

    match FrameType::try_from(frame.r#type) {
        Ok(FrameType::MarketInfo) => {
            let segments = frame
                .market_info
                .map(|info| {
                    info.segment_status
                        .into_iter()
                        .filter_map(|(segment, status)| {
                            SegmentStatus::try_from(status)
                                .ok()
                                .map(|status| (segment, status))
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(FeedMessage::MarketStatus(MarketStatus {
                segments,
                time: frame_time,
            }))
        }
        Ok(FrameType::LiveFeed) | Ok(FrameType::InitialFeed) => {
            let ticks = frame
                .feeds
                .into_iter()
                .filter_map(|(key, feed)| tick_from_feed(InstrumentKey::new(key), feed, frame_time))
                .collect();
            Ok(FeedMessage::TickBatch(ticks))
        }
        Err(_) => Err(FeedError::Decode(format!(
            "unknown frame type {}",
            frame.r#type
        ))),
    }
}

/// Build a [`Tick`] from one instrument entry, or drop it when no last
/// price is present.
fn tick_from_feed(key: InstrumentKey, feed: Feed, frame_time: DateTime<Utc>) -> Option<Tick> {
    match feed.union? {
        FeedUnion::Ltpc(ltpc) => {
            let mut tick = base_tick(key, &ltpc, frame_time)?;
            tick.day_close = ltpc.cp;
            Some(tick)
        }
        FeedUnion::Full(quote) => {
            let ltpc = quote.ltpc?;
            let mut tick = base_tick(key, &ltpc, frame_time)?;
            tick.day_close = ltpc.cp;
            tick.volume = quote.vtt;
            tick.open_interest = quote.oi;

            if let Some(best) = quote.depth.first() {
                tick.bid = best.bid_p;
                tick.bid_qty = best.bid_q;
                tick.ask = best.ask_p;
                tick.ask_qty = best.ask_q;
            }

            if let Some(day) = quote.ohlc.iter().find(|ohlc| ohlc.interval == "1d") {
                tick.day_open = day.open;
                tick.day_high = day.high;
                tick.day_low = day.low;
                tick.day_close = day.close;
            }

            tick.greeks = quote.greeks.map(|greeks| Greeks {
                delta: greeks.delta,
                gamma: greeks.gamma,
                theta: greeks.theta,
                vega: greeks.vega,
                iv: quote.iv,
            });
            Some(tick)
        }
        FeedUnion::FirstLevelWithGreeks(quote) => {
            let ltpc = quote.ltpc?;
            let mut tick = base_tick(key, &ltpc, frame_time)?;
            tick.day_close = ltpc.cp;
            tick.volume = quote.vtt;
            tick.open_interest = quote.oi;

            if let Some(level) = quote.first_depth {
                tick.bid = level.bid_p;
                tick.bid_qty = level.bid_q;
                tick.ask = level.ask_p;
                tick.ask_qty = level.ask_q;
            }

            tick.greeks = quote.greeks.map(|greeks| Greeks {
                delta: greeks.delta,
                gamma: greeks.gamma,
                theta: greeks.theta,
                vega: greeks.vega,
                iv: quote.iv,
            });
            Some(tick)
        }
    }
}

fn base_tick(key: InstrumentKey, ltpc: &wire::Ltpc, frame_time: DateTime<Utc>) -> Option<Tick> {
    if ltpc.ltp <= 0.0 {
        return None;
    }
    let time = if ltpc.ltt > 0 {
        ms_to_datetime(ltpc.ltt)
    } else {
        frame_time
    };
    Some(Tick::with_last_price(key, ltpc.ltp, time))
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    if ms > 0 {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    }
}
