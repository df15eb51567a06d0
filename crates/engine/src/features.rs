//! Feature engine: trailing-only per-day signals
//!
//! Every value at index `t` is computed from bars `0..=t`. Rows inside a
//! warm-up window carry `None` for the affected signal and are dropped by the
//! dataset builder.

use ta::indicators::SimpleMovingAverage;
use ta::{Next, Reset};
use tracing::debug;

use crate::error::{EstimateError, EstimateResult};
use crate::types::PriceBar;

pub const VOLATILITY_WINDOW: usize = 7;
pub const SHORT_MA_PERIOD: usize = 20;
pub const LONG_MA_PERIOD: usize = 50;

/// Engineered signals for one day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub date: chrono::NaiveDate,
    pub close: f64,
    pub daily_return: Option<f64>,
    pub volatility: Option<f64>,
    pub drawdown: Option<f64>,
    pub trend_strength: Option<f64>,
    pub target_proximity: Option<f64>,
}

impl FeatureRow {
    /// All five signals in `FeatureName::ALL` order, or `None` if any is undefined
    pub fn vector(&self) -> Option<[f64; 5]> {
        Some([
            self.daily_return?,
            self.volatility?,
            self.drawdown?,
            self.trend_strength?,
            self.target_proximity?,
        ])
    }

    pub fn is_complete(&self) -> bool {
        self.vector().is_some()
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Sample standard deviation (n - 1 denominator)
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    finite(var.sqrt())
}

/// Compute one `FeatureRow` per bar.
///
/// `target_proximity` uses each row's own close, not the current price.
/// A non-finite close leaves `trend_strength` undefined until a full long
/// window of finite closes has followed it.
pub fn compute_features(bars: &[PriceBar], target_price: f64) -> EstimateResult<Vec<FeatureRow>> {
    let mut sma_short = SimpleMovingAverage::new(SHORT_MA_PERIOD)
        .map_err(|e| EstimateError::Computation(format!("SMA{}: {:?}", SHORT_MA_PERIOD, e)))?;
    let mut sma_long = SimpleMovingAverage::new(LONG_MA_PERIOD)
        .map_err(|e| EstimateError::Computation(format!("SMA{}: {:?}", LONG_MA_PERIOD, e)))?;

    let mut rows = Vec::with_capacity(bars.len());
    let mut returns: Vec<Option<f64>> = Vec::with_capacity(bars.len());
    let mut running_high = f64::NEG_INFINITY;
    // Consecutive finite closes fed to the moving averages
    let mut clean_run = 0usize;

    for (i, bar) in bars.iter().enumerate() {
        let daily_return = if i == 0 {
            None
        } else {
            finite(bar.close / bars[i - 1].close - 1.0)
        };
        returns.push(daily_return);

        let volatility = if i + 1 > VOLATILITY_WINDOW {
            let window: Option<Vec<f64>> = returns[i + 1 - VOLATILITY_WINDOW..=i]
                .iter()
                .copied()
                .collect();
            window.and_then(|w| sample_std(&w))
        } else {
            None
        };

        running_high = running_high.max(bar.high);
        let drawdown = finite(bar.close / running_high - 1.0);

        // The indicators must see every finite bar, including warm-up ones.
        // Their running sums would carry a NaN forever, so restart instead.
        let trend_strength = if bar.close.is_finite() {
            let short = sma_short.next(bar.close);
            let long = sma_long.next(bar.close);
            clean_run += 1;
            if clean_run >= LONG_MA_PERIOD {
                finite((short - long) / long)
            } else {
                None
            }
        } else {
            sma_short.reset();
            sma_long.reset();
            clean_run = 0;
            None
        };

        let target_proximity = finite((target_price - bar.close) / bar.close);

        rows.push(FeatureRow {
            date: bar.date,
            close: bar.close,
            daily_return,
            volatility,
            drawdown,
            trend_strength,
            target_proximity,
        });
    }

    debug!(
        bars = bars.len(),
        complete = rows.iter().filter(|r| r.is_complete()).count(),
        "Computed feature rows"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn make_bars(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                date: start + Duration::days(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1000.0,
            })
            .collect()
    }

    fn wavy(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 10.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn test_output_is_same_length() {
        let bars = make_bars(&wavy(80));
        let rows = compute_features(&bars, 150.0).unwrap();
        assert_eq!(rows.len(), bars.len());
        for (row, bar) in rows.iter().zip(&bars) {
            assert_eq!(row.date, bar.date);
        }
    }

    #[test]
    fn test_first_complete_row_is_at_long_window() {
        let bars = make_bars(&wavy(80));
        let rows = compute_features(&bars, 150.0).unwrap();
        let first = rows.iter().position(|r| r.is_complete()).unwrap();
        assert_eq!(first, LONG_MA_PERIOD - 1);
        assert!(rows[first..].iter().all(|r| r.is_complete()));
    }

    #[test]
    fn test_warmup_windows() {
        let bars = make_bars(&wavy(20));
        let rows = compute_features(&bars, 150.0).unwrap();
        assert!(rows[0].daily_return.is_none());
        assert!(rows[1].daily_return.is_some());
        // Seven returns exist from index 7 on
        assert!(rows[6].volatility.is_none());
        assert!(rows[7].volatility.is_some());
        assert!(rows.iter().all(|r| r.trend_strength.is_none()));
        assert!(rows.iter().all(|r| r.drawdown.is_some()));
    }

    #[test]
    fn test_return_and_proximity_values() {
        let bars = make_bars(&[100.0, 110.0, 99.0]);
        let rows = compute_features(&bars, 121.0).unwrap();
        assert!((rows[1].daily_return.unwrap() - 0.10).abs() < 1e-12);
        assert!((rows[2].daily_return.unwrap() + 0.10).abs() < 1e-12);
        // Own close per row, not the latest close
        assert!((rows[0].target_proximity.unwrap() - 0.21).abs() < 1e-12);
        assert!((rows[1].target_proximity.unwrap() - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_drawdown_uses_running_high() {
        let mut bars = make_bars(&[100.0, 120.0, 90.0, 95.0]);
        bars[1].high = 130.0;
        let rows = compute_features(&bars, 200.0).unwrap();
        assert!((rows[0].drawdown.unwrap() - (100.0 / 101.0 - 1.0)).abs() < 1e-12);
        assert!((rows[2].drawdown.unwrap() - (90.0 / 130.0 - 1.0)).abs() < 1e-12);
        assert!((rows[3].drawdown.unwrap() - (95.0 / 130.0 - 1.0)).abs() < 1e-12);
        assert!(rows.iter().all(|r| r.drawdown.unwrap() <= 0.0));
    }

    #[test]
    fn test_volatility_is_sample_std() {
        let closes = [100.0, 101.0, 99.0, 102.0, 100.0, 103.0, 101.0, 104.0];
        let bars = make_bars(&closes);
        let rows = compute_features(&bars, 200.0).unwrap();
        let rets: Vec<f64> = closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let mean = rets.iter().sum::<f64>() / 7.0;
        let expected = (rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 6.0).sqrt();
        assert!((rows[7].volatility.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_trend_strength_on_linear_series() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let rows = compute_features(&make_bars(&closes), 500.0).unwrap();
        // SMA20 of 130..=149 is 139.5, SMA50 of 100..=149 is 124.5
        let expected = (139.5 - 124.5) / 124.5;
        assert!((rows[49].trend_strength.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_features_never_look_ahead() {
        let closes = wavy(120);
        let bars = make_bars(&closes);
        let base = compute_features(&bars, 150.0).unwrap();

        let mut altered = bars.clone();
        for bar in altered.iter_mut().skip(90) {
            bar.close *= 3.0;
            bar.high *= 5.0;
        }
        let changed = compute_features(&altered, 150.0).unwrap();
        assert_eq!(&base[..90], &changed[..90]);
        assert_ne!(base[90], changed[90]);
    }

    #[test]
    fn test_non_finite_close_only_blanks_its_windows() {
        let mut bars = make_bars(&wavy(600));
        bars[100].close = f64::NAN;
        let rows = compute_features(&bars, 300.0).unwrap();

        assert!(rows[99].is_complete());
        assert!(rows[100..150].iter().all(|r| r.trend_strength.is_none()));
        assert!(rows[150..].iter().all(|r| r.is_complete()));

        // Past the gap the averages match a series that starts after it
        let fresh = compute_features(&bars[101..], 300.0).unwrap();
        for i in 150..600 {
            assert_eq!(rows[i].trend_strength, fresh[i - 101].trend_strength);
        }
    }

    #[test]
    fn test_zero_close_yields_undefined_values() {
        let bars = make_bars(&[100.0, 0.0, 100.0]);
        let rows = compute_features(&bars, 150.0).unwrap();
        assert!(rows[1].target_proximity.is_none());
        assert!(rows[2].daily_return.is_none());
    }
}
