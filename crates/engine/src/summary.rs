//! Context shown next to an estimate: where the target sits relative to history

use serde::{Deserialize, Serialize};

use crate::types::PriceBar;

/// Whether the target would set a new all-time high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRegime {
    /// Target above the highest price ever traded
    NewHigh,
    /// Target at or below a price already reached
    Recovery,
}

impl TargetRegime {
    /// Stable identifier, same as the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRegime::NewHigh => "new_high",
            TargetRegime::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for TargetRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRegime::NewHigh => write!(f, "new all-time high attempt"),
            TargetRegime::Recovery => write!(f, "recovery move"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub bars: usize,
    pub first_date: chrono::NaiveDate,
    pub last_date: chrono::NaiveDate,
    pub current_price: f64,
    pub all_time_high: f64,
    pub target_price: f64,
    pub regime: TargetRegime,
    /// Current close relative to the all-time high, minus one
    pub distance_from_high: f64,
}

/// Summarize a series against a target. `None` for an empty series.
pub fn summarize_history(bars: &[PriceBar], target_price: f64) -> Option<HistorySummary> {
    let first = bars.first()?;
    let last = bars.last()?;
    let all_time_high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

    let regime = if target_price > all_time_high {
        TargetRegime::NewHigh
    } else {
        TargetRegime::Recovery
    };

    let distance_from_high = if all_time_high > 0.0 {
        last.close / all_time_high - 1.0
    } else {
        0.0
    };

    Some(HistorySummary {
        bars: bars.len(),
        first_date: first.date,
        last_date: last.date,
        current_price: last.close,
        all_time_high,
        target_price,
        regime,
        distance_from_high,
    })
}
