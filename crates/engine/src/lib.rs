//! FutureWallet engine: target-price probability estimation
//!
//! Provides:
//! - Trailing feature engine (return, volatility, drawdown, trend, target proximity)
//! - Forward labeler and chronological dataset builder
//! - Gradient-boosted tree classifier
//! - `estimate`, the single entry point producing a `PredictionResult`
//! - Price history sources (Binance public API, local CSV)

pub mod api;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod features;
pub mod gbdt;
pub mod labeler;
pub mod summary;
pub mod types;

// Re-exports for convenience
pub use api::{BinanceClient, CsvPriceSource, PriceHistorySource};
pub use error::{EstimateError, EstimateResult};
pub use estimator::{estimate, estimate_with};
pub use gbdt::{BoosterConfig, Classifier, GradientBoostedClassifier, GradientBoostingTrainer, Trainer};
pub use summary::{summarize_history, HistorySummary, TargetRegime};
pub use types::*;
