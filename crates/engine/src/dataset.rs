//! Dataset builder: join features with labels and split chronologically

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{EstimateError, EstimateResult};
use crate::features::FeatureRow;

/// Minimum number of complete labeled rows needed to train
pub const MIN_ROWS: usize = 200;
/// Size of the trailing holdout when history is long enough
pub const TEST_SIZE: usize = 200;
/// Extra rows beyond `TEST_SIZE` required before the fixed holdout is used
pub const SPLIT_MARGIN: usize = 50;

/// One complete training example
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub date: NaiveDate,
    pub features: [f64; 5],
    pub label: bool,
}

/// Chronological partition: every holdout sample is later than every train sample
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<Sample>,
    pub holdout: Vec<Sample>,
}

/// Join feature rows and labels (same date axis) and drop incomplete rows.
pub fn build_samples(rows: &[FeatureRow], labels: &[Option<bool>]) -> EstimateResult<Vec<Sample>> {
    if rows.len() != labels.len() {
        return Err(EstimateError::Computation(format!(
            "feature rows ({}) and labels ({}) are not aligned",
            rows.len(),
            labels.len()
        )));
    }

    let samples: Vec<Sample> = rows
        .iter()
        .zip(labels)
        .filter_map(|(row, label)| {
            Some(Sample {
                date: row.date,
                features: row.vector()?,
                label: (*label)?,
            })
        })
        .collect();

    debug!(
        rows = rows.len(),
        kept = samples.len(),
        positives = samples.iter().filter(|s| s.label).count(),
        "Built labeled samples"
    );
    Ok(samples)
}

/// Reject datasets below `MIN_ROWS`
pub fn ensure_sufficient(samples: &[Sample]) -> EstimateResult<()> {
    if samples.len() < MIN_ROWS {
        return Err(EstimateError::InsufficientHistory {
            required: MIN_ROWS,
            actual: samples.len(),
        });
    }
    Ok(())
}

/// Number of holdout rows for a dataset of `n` rows.
///
/// Above `TEST_SIZE + SPLIT_MARGIN` the last `TEST_SIZE` rows are held out,
/// otherwise the newest 20% (rounded up).
pub fn holdout_len(n: usize) -> usize {
    if n > TEST_SIZE + SPLIT_MARGIN {
        TEST_SIZE
    } else {
        (n + 4) / 5
    }
}

/// Split in time order, never shuffled
pub fn chronological_split(samples: Vec<Sample>) -> Split {
    let cut = samples.len() - holdout_len(samples.len());
    let mut train = samples;
    let holdout = train.split_off(cut);
    Split { train, holdout }
}
