//! Target-price probability estimator
//!
//! Runs the full pipeline for one query and always answers with a
//! `PredictionResult`:
//!
//! ```text
//! bars ─► features (trailing) ─┐
//!      └► labels (forward) ────┴► samples ─► split ─► train ─► holdout accuracy
//!                                                        └───► score latest row
//! ```
//!
//! Nothing here performs I/O or keeps state between calls.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::dataset::{build_samples, chronological_split, ensure_sufficient, Sample};
use crate::error::{EstimateError, EstimateResult};
use crate::features::compute_features;
use crate::gbdt::{Classifier, GradientBoostingTrainer, Trainer};
use crate::labeler::{label_forward, required_increase_ratio};
use crate::types::{EstimateParams, FeatureImportances, PredictionResult, PriceBar};

const TARGET_MET_MESSAGE: &str = "Current price is already at or above the target";

/// Terminal states of a successful pipeline run
#[derive(Debug)]
enum Outcome {
    TargetAlreadyMet {
        current_price: f64,
    },
    Estimated {
        current_price: f64,
        required_increase: f64,
        probability: f64,
        accuracy: f64,
        importances: FeatureImportances,
    },
}

/// Estimate with the default gradient-boosted trainer
pub fn estimate(bars: &[PriceBar], params: &EstimateParams) -> PredictionResult {
    estimate_with(bars, params, &GradientBoostingTrainer::default())
}

/// Estimate with an explicit trainer.
///
/// Expected failures and unexpected faults, panics included, come back as a
/// result with `success == false`.
pub fn estimate_with<T: Trainer>(
    bars: &[PriceBar],
    params: &EstimateParams,
    trainer: &T,
) -> PredictionResult {
    info!(
        bars = bars.len(),
        target = params.target_price,
        days = params.days,
        seed = ?params.seed,
        "Starting target probability estimate"
    );

    let outcome = catch_unwind(AssertUnwindSafe(|| run_pipeline(bars, params, trainer)))
        .unwrap_or_else(|panic| Err(EstimateError::Computation(panic_message(panic))));

    let current_price = bars.last().map(|b| b.close).unwrap_or(0.0);
    match outcome {
        Ok(outcome) => assemble(params, outcome),
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "Estimate failed");
            failure(params, current_price, &e)
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic during estimation".to_string()
    }
}

fn validate(params: &EstimateParams) -> EstimateResult<()> {
    if !params.target_price.is_finite() || params.target_price <= 0.0 {
        return Err(EstimateError::InvalidParams(format!(
            "target price must be a positive number, got {}",
            params.target_price
        )));
    }
    if params.days == 0 {
        return Err(EstimateError::InvalidParams(
            "horizon must be at least one day".to_string(),
        ));
    }
    Ok(())
}

fn run_pipeline<T: Trainer>(
    bars: &[PriceBar],
    params: &EstimateParams,
    trainer: &T,
) -> EstimateResult<Outcome> {
    validate(params)?;

    let current_price = match bars.last() {
        Some(bar) if bar.close.is_finite() && bar.close > 0.0 => bar.close,
        _ => return Err(EstimateError::DataUnavailable),
    };

    if params.target_price <= current_price {
        debug!(current_price, "Target already met, skipping training");
        return Ok(Outcome::TargetAlreadyMet { current_price });
    }

    let ratio = required_increase_ratio(current_price, params.target_price);
    let rows = compute_features(bars, params.target_price)?;
    let labels = label_forward(bars, params.days as usize, ratio);
    let samples = build_samples(&rows, &labels)?;
    ensure_sufficient(&samples)?;

    let split = chronological_split(samples);
    info!(
        train = split.train.len(),
        holdout = split.holdout.len(),
        required_increase = ratio,
        "Training classifier"
    );

    let model = trainer.fit(&split.train, params.seed)?;
    let accuracy = holdout_accuracy(&model, &split.holdout);

    let latest = rows
        .iter()
        .rev()
        .find_map(|r| r.vector())
        .ok_or_else(|| EstimateError::Computation("no complete feature row to score".to_string()))?;
    let probability = model.predict_proba(&latest);
    if !probability.is_finite() {
        return Err(EstimateError::Computation(format!(
            "classifier returned a non-finite probability ({})",
            probability
        )));
    }

    Ok(Outcome::Estimated {
        current_price,
        required_increase: ratio,
        probability: probability.clamp(0.0, 1.0),
        accuracy,
        importances: FeatureImportances::ranked(model.feature_importances()),
    })
}

/// Fraction of holdout samples whose predicted label matches
pub fn holdout_accuracy<C: Classifier>(model: &C, holdout: &[Sample]) -> f64 {
    if holdout.is_empty() {
        return 0.0;
    }
    let correct = holdout
        .iter()
        .filter(|s| model.predict(&s.features) == s.label)
        .count();
    correct as f64 / holdout.len() as f64
}

fn assemble(params: &EstimateParams, outcome: Outcome) -> PredictionResult {
    match outcome {
        Outcome::TargetAlreadyMet { current_price } => PredictionResult {
            success: true,
            message: TARGET_MET_MESSAGE.to_string(),
            current_price,
            target_price: params.target_price,
            days: params.days,
            probability: 1.0,
            accuracy: 0.0,
            feature_importances: FeatureImportances::default(),
            required_increase: 0.0,
        },
        Outcome::Estimated {
            current_price,
            required_increase,
            probability,
            accuracy,
            importances,
        } => {
            info!(probability, accuracy, "Estimate complete");
            PredictionResult {
                success: true,
                message: String::new(),
                current_price,
                target_price: params.target_price,
                days: params.days,
                probability,
                accuracy,
                feature_importances: importances,
                required_increase,
            }
        }
    }
}

fn failure(params: &EstimateParams, current_price: f64, error: &EstimateError) -> PredictionResult {
    PredictionResult {
        success: false,
        message: error.to_string(),
        current_price: if current_price.is_finite() { current_price } else { 0.0 },
        target_price: params.target_price,
        days: params.days,
        probability: 0.0,
        accuracy: 0.0,
        feature_importances: FeatureImportances::default(),
        required_increase: 0.0,
    }
}
