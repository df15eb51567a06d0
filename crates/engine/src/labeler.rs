//! Forward labeler: did the required move happen within the next D bars?
//!
//! This is the only stage that reads bars after `t`, and it only ever feeds
//! the label, never a feature.

use std::collections::VecDeque;

use crate::types::PriceBar;

/// Proportional move from the current close to the target, zero when the
/// target is already met.
pub fn required_increase_ratio(current_price: f64, target_price: f64) -> f64 {
    if target_price > current_price && current_price > 0.0 {
        (target_price - current_price) / current_price
    } else {
        0.0
    }
}

/// Maximum `high` over bars `t+1 ..= t+days`, or `None` when fewer than
/// `days` bars follow `t`. A zero horizon, or one at least as long as the
/// series, yields no windows.
pub fn forward_max_highs(bars: &[PriceBar], days: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if days == 0 || days >= n {
        return out;
    }

    // Indices ascend front to back, highs ascend front to back; the back is the max
    let mut window: VecDeque<usize> = VecDeque::with_capacity(days);

    for t in (0..n).rev() {
        let entering = t + 1;
        if entering < n {
            while window
                .front()
                .is_some_and(|&j| bars[j].high <= bars[entering].high)
            {
                window.pop_front();
            }
            window.push_front(entering);
        }
        while window.back().is_some_and(|&j| j > t + days) {
            window.pop_back();
        }

        if t + days < n {
            out[t] = window.back().map(|&j| bars[j].high);
        }
    }

    out
}

/// Label each bar: `Some(true)` when the forward high reaches
/// `close * (1 + ratio)`, `None` when the forward window is incomplete.
///
/// The same `ratio` is applied to every historical bar.
pub fn label_forward(bars: &[PriceBar], days: usize, ratio: f64) -> Vec<Option<bool>> {
    forward_max_highs(bars, days)
        .into_iter()
        .zip(bars)
        .map(|(fwd, bar)| fwd.map(|high| high >= bar.close * (1.0 + ratio)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn make_bars(highs: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        highs
            .iter()
            .enumerate()
            .map(|(i, &h)| PriceBar {
                date: start + Duration::days(i as i64),
                open: h - 1.0,
                high: h,
                low: h - 2.0,
                close: h - 1.0,
                volume: 10.0,
            })
            .collect()
    }

    fn brute_force(bars: &[PriceBar], days: usize) -> Vec<Option<f64>> {
        (0..bars.len())
            .map(|t| {
                if t + days < bars.len() && days > 0 {
                    Some(
                        bars[t + 1..=t + days]
                            .iter()
                            .map(|b| b.high)
                            .fold(f64::NEG_INFINITY, f64::max),
                    )
                } else {
                    None
                }
            })
            .collect()
    }

    #[test]
    fn test_required_increase_ratio() {
        assert!((required_increase_ratio(100.0, 150.0) - 0.5).abs() < 1e-12);
        assert_eq!(required_increase_ratio(100.0, 100.0), 0.0);
        assert_eq!(required_increase_ratio(100.0, 80.0), 0.0);
    }

    #[test]
    fn test_forward_max_matches_brute_force() {
        let highs: Vec<f64> = (0..200)
            .map(|i| 100.0 + ((i * 37) % 23) as f64 - ((i * 11) % 7) as f64)
            .collect();
        let bars = make_bars(&highs);
        for days in [1usize, 2, 5, 10, 30, 199, 250] {
            assert_eq!(
                forward_max_highs(&bars, days),
                brute_force(&bars, days),
                "mismatch for horizon {}",
                days
            );
        }
    }

    #[test]
    fn test_window_excludes_current_bar() {
        // Bar 0 has the highest high; its own high must not count
        let bars = make_bars(&[500.0, 101.0, 102.0, 103.0]);
        let fwd = forward_max_highs(&bars, 2);
        assert_eq!(fwd[0], Some(102.0));
        assert_eq!(fwd[1], Some(103.0));
    }

    #[test]
    fn test_tail_rows_have_no_label() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        let labels = label_forward(&bars, 3, 0.0);
        assert_eq!(labels.len(), 6);
        assert!(labels[..3].iter().all(|l| l.is_some()));
        assert!(labels[3..].iter().all(|l| l.is_none()));
    }

    #[test]
    fn test_horizon_longer_than_series() {
        let bars = make_bars(&[10.0, 11.0, 12.0]);
        assert!(label_forward(&bars, 3, 0.0).iter().all(|l| l.is_none()));
        assert!(label_forward(&bars, 0, 0.0).iter().all(|l| l.is_none()));
    }

    #[test]
    fn test_huge_horizon_yields_no_windows() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0]);
        assert!(forward_max_highs(&bars, u32::MAX as usize).iter().all(|h| h.is_none()));
        assert!(forward_max_highs(&bars, usize::MAX).iter().all(|h| h.is_none()));
        assert_eq!(label_forward(&bars, usize::MAX, 0.1).len(), 4);
    }

    #[test]
    fn test_label_threshold_is_inclusive() {
        // close[0] = 100, ratio 0.5 needs a forward high of exactly 150
        let bars = make_bars(&[101.0, 150.0, 50.0]);
        let labels = label_forward(&bars, 1, 0.5);
        assert_eq!(labels[0], Some(true));

        let labels = label_forward(&bars, 1, 0.51);
        assert_eq!(labels[0], Some(false));
    }

    #[test]
    fn test_labels_ignore_bars_beyond_horizon() {
        let bars = make_bars(&[100.0, 100.0, 100.0, 1000.0]);
        let labels = label_forward(&bars, 2, 0.5);
        assert_eq!(labels[0], Some(false));
        assert_eq!(labels[1], Some(true));
    }
}
