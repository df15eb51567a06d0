//! Binance public API client for daily price history (no authentication required)

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{normalize_bars, PriceHistorySource};
use crate::types::{Kline, PriceBar};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;
const DAILY_INTERVAL: &str = "1d";

/// Quote assets recognised at the end of a bare symbol like `ETHBTC`
const KNOWN_QUOTES: [&str; 6] = ["USDT", "USDC", "FDUSD", "BUSD", "BTC", "ETH"];

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    fn into_kline(self) -> Option<Kline> {
        Some(Kline {
            open_time: self.0,
            open: Decimal::from_str(&self.1).ok()?,
            high: Decimal::from_str(&self.2).ok()?,
            low: Decimal::from_str(&self.3).ok()?,
            close: Decimal::from_str(&self.4).ok()?,
            volume: Decimal::from_str(&self.5).ok()?,
            close_time: self.6,
        })
    }
}

/// One response page. Pagination follows the raw rows, not the parsed ones,
/// so an unparseable kline cannot end the walk early.
#[derive(Debug)]
struct KlinePage {
    klines: Vec<Kline>,
    received: usize,
    last_close_time: Option<i64>,
}

impl KlinePage {
    fn parse(raw_klines: Vec<RawKline>) -> Self {
        let received = raw_klines.len();
        let last_close_time = raw_klines.last().map(|k| k.6);
        let klines = raw_klines
            .into_iter()
            .filter_map(RawKline::into_kline)
            .collect();
        Self {
            klines,
            received,
            last_close_time,
        }
    }

    fn skipped(&self) -> usize {
        self.received - self.klines.len()
    }

    fn is_full(&self) -> bool {
        self.received >= MAX_KLINES_PER_REQUEST as usize
    }
}

/// Map user-facing tickers (`btc`, `BTC-USD`, `eth/usdt`) to Binance pairs.
///
/// A bare base asset is quoted in USDT, and a `USD` quote becomes `USDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if let Some((base, quote)) = upper.split_once(|c: char| matches!(c, '-' | '/' | '_')) {
        let quote = if quote == "USD" { "USDT" } else { quote };
        return format!("{}{}", base, quote);
    }
    if KNOWN_QUOTES
        .iter()
        .any(|q| upper.len() > q.len() && upper.ends_with(q))
    {
        upper
    } else {
        format!("{}USDT", upper)
    }
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one page of klines (candlestick data) for a symbol
    async fn fetch_page(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<KlinePage> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );

        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = limit.unwrap_or(500).min(MAX_KLINES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        debug!(symbol, interval, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;
        let page = KlinePage::parse(raw_klines);

        if page.skipped() > 0 {
            warn!(
                symbol,
                skipped = page.skipped(),
                "Dropped klines with unparseable prices"
            );
        }
        debug!(count = page.klines.len(), "Fetched klines");
        Ok(page)
    }

    /// Fetch klines with automatic pagination for ranges > 1000 bars
    pub async fn get_klines_paginated(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Kline>> {
        let mut all_klines = Vec::new();
        let mut current_start = start_time;

        info!(symbol, interval, "Fetching paginated klines from Binance");

        while current_start < end_time {
            let page = self
                .fetch_page(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await?;

            let full_page = page.is_full();
            let Some(last_close_time) = page.last_close_time else {
                break;
            };
            all_klines.extend(page.klines);

            if !full_page {
                break;
            }
            current_start = last_close_time + 1;

            // Small delay to respect rate limits
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        info!(total = all_klines.len(), "Paginated kline fetch complete");
        Ok(all_klines)
    }

    /// Every daily bar since the pair was listed, oldest first
    pub async fn get_daily_history(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let pair = normalize_symbol(symbol);
        let now = chrono::Utc::now().timestamp_millis();
        let klines = self
            .get_klines_paginated(&pair, DAILY_INTERVAL, 0, now)
            .await
            .with_context(|| format!("Failed to fetch daily history for {}", pair))?;

        let bars = normalize_bars(klines.iter().filter_map(PriceBar::from_kline).collect());
        info!(symbol = %pair, bars = bars.len(), "Loaded daily history");
        Ok(bars)
    }
}

#[async_trait]
impl PriceHistorySource for BinanceClient {
    async fn fetch_daily_history(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        self.get_daily_history(symbol).await
    }

    fn name(&self) -> &'static str {
        "binance"
    }
}
