//! Types shared by the estimator and its price-history collaborators

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single candlestick (OHLCV) as delivered by an exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// One daily bar of price history, the estimator's input unit.
///
/// Series are ordered ascending by `date` with unique dates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Convert an exchange kline, dating it by its open time (UTC)
    pub fn from_kline(kline: &Kline) -> Option<Self> {
        let date = DateTime::<Utc>::from_timestamp_millis(kline.open_time)?.date_naive();
        Some(Self {
            date,
            open: kline.open.to_f64()?,
            high: kline.high.to_f64()?,
            low: kline.low.to_f64()?,
            close: kline.close.to_f64()?,
            volume: kline.volume.to_f64()?,
        })
    }
}

/// The five engineered features, in model column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureName {
    Return,
    Volatility,
    Drawdown,
    TrendStrength,
    TargetProximity,
}

impl FeatureName {
    pub const ALL: [FeatureName; 5] = [
        FeatureName::Return,
        FeatureName::Volatility,
        FeatureName::Drawdown,
        FeatureName::TrendStrength,
        FeatureName::TargetProximity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::Return => "return",
            FeatureName::Volatility => "volatility",
            FeatureName::Drawdown => "drawdown",
            FeatureName::TrendStrength => "trend_strength",
            FeatureName::TargetProximity => "target_proximity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Column index inside a feature vector
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature importances ranked from most to least influential.
///
/// Serializes as a JSON object whose key order is the ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureImportances(Vec<(FeatureName, f64)>);

impl FeatureImportances {
    /// Build from raw per-column scores, sorting descending.
    /// Negative or non-finite scores are clamped to zero.
    pub fn ranked(scores: [f64; 5]) -> Self {
        let mut entries: Vec<(FeatureName, f64)> = FeatureName::ALL
            .into_iter()
            .map(|name| {
                let v = scores[name.index()];
                (name, if v.is_finite() && v > 0.0 { v } else { 0.0 })
            })
            .collect();
        // Stable sort keeps column order among ties
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self(entries)
    }

    pub fn entries(&self) -> &[(FeatureName, f64)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for FeatureImportances {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureImportances {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ImportanceVisitor;

        impl<'de> Visitor<'de> for ImportanceVisitor {
            type Value = FeatureImportances;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of feature name to importance")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, f64>()? {
                    let name = FeatureName::parse(&key).ok_or_else(|| {
                        serde::de::Error::custom(format!("unknown feature '{}'", key))
                    })?;
                    entries.push((name, value));
                }
                entries.sort_by(|a, b| b.1.total_cmp(&a.1));
                Ok(FeatureImportances(entries))
            }
        }

        deserializer.deserialize_map(ImportanceVisitor)
    }
}

/// Query parameters for one estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateParams {
    pub target_price: f64,
    /// Horizon in trading bars
    pub days: u32,
    /// Seed for a trainer that subsamples rows. The default booster uses every
    /// row in every tree, so its result does not depend on the seed.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl EstimateParams {
    pub fn new(target_price: f64, days: u32) -> Self {
        Self {
            target_price,
            days,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A symbol-level request as received by the outer surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub symbol: String,
    pub target_price: f64,
    pub days: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl EstimateRequest {
    pub fn params(&self) -> EstimateParams {
        EstimateParams {
            target_price: self.target_price,
            days: self.days,
            seed: self.seed,
        }
    }

    /// SHA-256 over the normalized query, used to group runs of the same question.
    /// The seed is left out since the default booster ignores it.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}|{}|{}",
            self.symbol.trim().to_uppercase(),
            self.target_price,
            self.days
        );
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Outcome of one estimate. Every field is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub success: bool,
    pub message: String,
    pub current_price: f64,
    pub target_price: f64,
    pub days: u32,
    pub probability: f64,
    pub accuracy: f64,
    pub feature_importances: FeatureImportances,
    pub required_increase: f64,
}
