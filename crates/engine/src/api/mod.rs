//! Price history sources

pub mod binance;
pub mod csv_file;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::PriceBar;

pub use self::binance::BinanceClient;
pub use self::csv_file::CsvPriceSource;

/// Anything that can supply a full daily OHLCV history, oldest first
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn fetch_daily_history(&self, symbol: &str) -> Result<Vec<PriceBar>>;

    /// Short label for logs and CLI output
    fn name(&self) -> &'static str;
}

/// Sort by date and keep the last bar seen for any repeated date
pub(crate) fn normalize_bars(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(prev) if prev.date == bar.date => *prev = bar,
            _ => out.push(bar),
        }
    }
    out
}
