//! Venue market-data feed integration for the Strike pipeline.
//!
//! Owns everything between the wire and the typed event stream:
//!
//! - [`protocol`]: stateless decoding of the venue's mixed JSON/protobuf
//!   frames into [`protocol::FeedMessage`]s.
//! - [`client`]: the persistent duplex connection: REST handshake,
//!   receive loop, discrete control frames, and the reconnect policy
//!   (exponential backoff with jitter, DNS health probes, hard attempt
//!   cap).
//! - [`subscription`]: desired-vs-confirmed instrument tracking with
//!   batched subscribe sync and failed-batch retry.
//! - [`cache`]: the last-price cache with explicit staleness verdicts,
//!   the risk engine's fallback price source when the feed is down.

pub mod backoff;
pub mod cache;
pub mod client;
pub mod error;
pub mod net;
pub mod protocol;
pub mod subscription;

pub use backoff::Backoff;
pub use cache::{PriceCache, PriceVerdict};
pub use client::{ConnectionStatus, FeedClient, FeedConfig, FeedEvent};
pub use error::FeedError;
pub use net::{ProbeVerdict, probe_dns};
pub use protocol::{ControlAck, FeedMessage, MarketStatus, decode_frame};
pub use subscription::{
    ControlTransport, SubscriptionManager, SubscriptionMode, SubscriptionStatus,
};
