//! Typed anomaly signals raised by the detector.

use crate::InstrumentKey;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Kind of anomaly a [`Signal`] reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    #[display("SPIKE")]
    Spike,
    #[display("VOLUME_SURGE")]
    VolumeSurge,
    #[display("MOMENTUM")]
    Momentum,
}

/// Detection evidence, one shape per [`SignalKind`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalMetadata {
    Spike {
        z_score: f64,
        mean: f64,
        std_dev: f64,
        price: f64,
    },
    VolumeSurge {
        ratio: f64,
        average_volume: f64,
        tick_volume: f64,
    },
    Momentum {
        roc_pct: f64,
        window_start_price: f64,
    },
}

/// An anomaly detected on a single instrument, consumed exactly once by
/// the execution engine. The detector's cooldown prevents re-emission of
/// the same (instrument, kind) within its window.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    pub key: InstrumentKey,
    pub kind: SignalKind,
    /// Normalised confidence in `[0, 1]`.
    pub strength: f64,
    pub metadata: SignalMetadata,
    /// Last traded price when the signal fired.
    pub price: f64,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_signal_metadata_serialises_tagged() {
        let signal = Signal {
            key: InstrumentKey::new("NSE_FO|1"),
            kind: SignalKind::Spike,
            strength: 0.4,
            metadata: SignalMetadata::Spike {
                z_score: 4.0,
                mean: 100.0,
                std_dev: 2.0,
                price: 108.0,
            },
            price: 108.0,
            time: Utc::now(),
        };

        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["kind"], "SPIKE");
        assert_eq!(json["metadata"]["kind"], "spike");
        assert_eq!(json["metadata"]["z_score"], 4.0);
    }
}
