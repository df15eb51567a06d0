//! Daily history from a local CSV export
//!
//! Expects a header row with `date,open,high,low,close,volume` (any case,
//! `Date`-style exports work too). Extra columns are ignored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

use super::{normalize_bars, PriceHistorySource};
use crate::types::PriceBar;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: String,
    #[serde(alias = "Open", alias = "OPEN")]
    open: f64,
    #[serde(alias = "High", alias = "HIGH")]
    high: f64,
    #[serde(alias = "Low", alias = "LOW")]
    low: f64,
    #[serde(alias = "Close", alias = "CLOSE")]
    close: f64,
    #[serde(default, alias = "Volume", alias = "VOLUME")]
    volume: Option<f64>,
}

/// Accepts `2024-01-31` and timestamps that start with one
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").with_context(|| format!("Invalid date '{}'", raw))
}

/// Parse CSV bars, sorted by date with duplicate dates collapsed
pub fn read_price_csv<R: Read>(reader: R) -> Result<Vec<PriceBar>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        // +2: header line and 1-based numbering
        let line = i + 2;
        let row = result.with_context(|| format!("Malformed CSV row at line {}", line))?;
        bars.push(PriceBar {
            date: parse_date(&row.date).with_context(|| format!("Line {}", line))?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0),
        });
    }

    Ok(normalize_bars(bars))
}

/// File-backed history source; the symbol only labels the log line
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    path: PathBuf,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PriceHistorySource for CsvPriceSource {
    async fn fetch_daily_history(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let bars = read_price_csv(bytes.as_slice())
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        info!(symbol, path = %self.path.display(), bars = bars.len(), "Loaded history from CSV");
        Ok(bars)
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_lowercase_headers() {
        let data = "date,open,high,low,close,volume\n\
                    2024-01-02,10,12,9,11,100\n\
                    2024-01-01,9,10,8,10,50\n";
        let bars = read_price_csv(data.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(bars[1].close, 11.0);
        assert_eq!(bars[1].volume, 100.0);
    }

    #[test]
    fn test_reads_exported_headers_without_volume() {
        let data = "Date,Open,High,Low,Close,Adj Close\n\
                    2024-01-01 00:00:00+00:00,1,2,0.5,1.5,1.5\n";
        let bars = read_price_csv(data.as_bytes()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, 2.0);
        assert_eq!(bars[0].volume, 0.0);
    }

    #[test]
    fn test_bad_row_reports_line() {
        let data = "date,open,high,low,close,volume\n\
                    2024-01-01,1,2,0.5,1.5,1\n\
                    2024-01-02,1,abc,0.5,1.5,1\n";
        let err = read_price_csv(data.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"), "{:#}", err);
    }

    #[test]
    fn test_bad_date_is_rejected() {
        let data = "date,open,high,low,close,volume\n01/02/2024,1,2,0.5,1.5,1\n";
        assert!(read_price_csv(data.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let source = CsvPriceSource::new("/nonexistent/prices.csv");
        assert!(source.fetch_daily_history("BTC").await.is_err());
    }
}
