//! Protobuf layout of the venue's binary feed frames.
//!
//! Hand-derived `prost` messages matching the venue schema: a tagged
//! [`FeedFrame`] carrying either a market-status map or a keyed batch of
//! per-instrument feeds, where each feed is a `oneof` over three payload
//! richness levels. Unknown fields are skipped by `prost`, so schema
//! additions on the venue side never break decoding.

use std::collections::HashMap;

/// Top-level frame pushed by the venue.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeedFrame {
    #[prost(enumeration = "FrameType", tag = "1")]
    pub r#type: i32,
    /// Instrument key -> feed payload. Populated for tick frames.
    #[prost(map = "string, message", tag = "2")]
    pub feeds: HashMap<String, Feed>,
    /// Venue clock at send time, epoch milliseconds.
    #[prost(int64, tag = "3")]
    pub current_ts: i64,
    /// Populated for market-status frames.
    #[prost(message, optional, tag = "4")]
    pub market_info: Option<MarketInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameType {
    /// Snapshot pushed immediately after subscribing.
    InitialFeed = 0,
    LiveFeed = 1,
    MarketInfo = 2,
}

/// Per-instrument payload; exactly one variant is ever present.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feed {
    #[prost(oneof = "FeedUnion", tags = "1, 2, 3")]
    pub union: Option<FeedUnion>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum FeedUnion {
    /// Last-traded-price only.
    #[prost(message, tag = "1")]
    Ltpc(Ltpc),
    /// Full market depth plus greeks and day OHLC.
    #[prost(message, tag = "2")]
    Full(FullQuote),
    /// First depth level plus greeks.
    #[prost(message, tag = "3")]
    FirstLevelWithGreeks(QuoteWithGreeks),
}

/// Last trade summary shared by every variant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ltpc {
    #[prost(double, tag = "1")]
    pub ltp: f64,
    /// Last trade time, epoch milliseconds.
    #[prost(int64, tag = "2")]
    pub ltt: i64,
    #[prost(int64, tag = "3")]
    pub ltq: i64,
    /// Previous session close.
    #[prost(double, tag = "4")]
    pub cp: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DepthLevel {
    #[prost(double, tag = "1")]
    pub bid_p: f64,
    #[prost(uint64, tag = "2")]
    pub bid_q: u64,
    #[prost(double, tag = "3")]
    pub ask_p: f64,
    #[prost(uint64, tag = "4")]
    pub ask_q: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OptionGreeks {
    #[prost(double, tag = "1")]
    pub delta: f64,
    #[prost(double, tag = "2")]
    pub gamma: f64,
    #[prost(double, tag = "3")]
    pub theta: f64,
    #[prost(double, tag = "4")]
    pub vega: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ohlc {
    /// Aggregation interval tag, eg. `"1d"`.
    #[prost(string, tag = "1")]
    pub interval: String,
    #[prost(double, tag = "2")]
    pub open: f64,
    #[prost(double, tag = "3")]
    pub high: f64,
    #[prost(double, tag = "4")]
    pub low: f64,
    #[prost(double, tag = "5")]
    pub close: f64,
    #[prost(uint64, tag = "6")]
    pub volume: u64,
    #[prost(int64, tag = "7")]
    pub ts: i64,
}

/// Full-depth variant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FullQuote {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, repeated, tag = "2")]
    pub depth: Vec<DepthLevel>,
    /// Average traded price.
    #[prost(double, tag = "3")]
    pub atp: f64,
    /// Cumulative session volume.
    #[prost(uint64, tag = "4")]
    pub vtt: u64,
    #[prost(uint64, tag = "5")]
    pub oi: u64,
    #[prost(double, tag = "6")]
    pub iv: f64,
    #[prost(message, optional, tag = "7")]
    pub greeks: Option<OptionGreeks>,
    #[prost(message, repeated, tag = "8")]
    pub ohlc: Vec<Ohlc>,
}

/// First-level variant carrying greeks.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuoteWithGreeks {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub first_depth: Option<DepthLevel>,
    #[prost(message, optional, tag = "3")]
    pub greeks: Option<OptionGreeks>,
    #[prost(uint64, tag = "4")]
    pub vtt: u64,
    #[prost(uint64, tag = "5")]
    pub oi: u64,
    #[prost(double, tag = "6")]
    pub iv: f64,
}

/// Per-segment market status map.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketInfo {
    #[prost(map = "string, enumeration(SegmentStatus)", tag = "1")]
    pub segment_status: HashMap<String, i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SegmentStatus {
    PreOpenStart = 0,
    PreOpenEnd = 1,
    NormalOpen = 2,
    NormalClose = 3,
    ClosingStart = 4,
    ClosingEnd = 5,
}
