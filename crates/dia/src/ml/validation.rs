//! ROC summaries and k-fold cross-validation of the logistic classifier

use super::classifier::{train_logistic, LogisticOptions};
use crate::features::FeatureVector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Regularization strengths tried by [`sweep_regularization`]
pub const DEFAULT_LAMBDAS: [f64; 7] = [1E-4, 5E-4, 1E-3, 5E-3, 1E-2, 5E-2, 1E-1];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RocMetrics {
    pub auc: f64,
    /// True positive rate at 1% false positive rate
    pub tpr_at_1_fpr: f64,
}

/// Area under the ROC curve for positive vs negative scores, by the
/// trapezoid rule. Returns AUC 0.5 if either class is empty.
pub fn roc_metrics(positives: &[f64], negatives: &[f64]) -> RocMetrics {
    if positives.is_empty() || negatives.is_empty() {
        return RocMetrics {
            auc: 0.5,
            tpr_at_1_fpr: 0.0,
        };
    }

    let mut scored = positives
        .iter()
        .map(|s| (*s, true))
        .chain(negatives.iter().map(|s| (*s, false)))
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let (n_pos, n_neg) = (positives.len() as f64, negatives.len() as f64);
    let (mut tp, mut fp) = (0usize, 0usize);
    let (mut prev_tpr, mut prev_fpr) = (0.0, 0.0);
    let mut auc = 0.0;
    let mut tpr_at_1_fpr = None;

    for (_, positive) in scored {
        match positive {
            true => tp += 1,
            false => fp += 1,
        }
        let tpr = tp as f64 / n_pos;
        let fpr = fp as f64 / n_neg;
        auc += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        if tpr_at_1_fpr.is_none() && fpr > 0.01 {
            tpr_at_1_fpr = Some(prev_tpr);
        }
        prev_tpr = tpr;
        prev_fpr = fpr;
    }
    auc += (1.0 - prev_fpr) * (1.0 + prev_tpr) / 2.0;

    RocMetrics {
        auc,
        tpr_at_1_fpr: tpr_at_1_fpr.unwrap_or(prev_tpr),
    }
}

/// Fold `fold` of `k` over `n` items: equal sized, the last fold takes the
/// remainder
fn fold_range(n: usize, k: usize, fold: usize) -> std::ops::Range<usize> {
    let size = n / k;
    let start = fold * size;
    match fold + 1 == k {
        true => start..n,
        false => start..start + size,
    }
}

fn split(
    pool: &[FeatureVector],
    range: std::ops::Range<usize>,
) -> (Vec<FeatureVector>, &[FeatureVector]) {
    let train = pool[..range.start]
        .iter()
        .chain(&pool[range.end..])
        .copied()
        .collect();
    (train, &pool[range])
}

/// Stratified k-fold cross-validation of logistic regression. Positives and
/// negatives are shuffled separately with `options.seed`, held-out scores
/// from every fold are pooled, and ROC metrics computed on the pooled
/// scores.
pub fn cross_validate(
    positives: &[FeatureVector],
    negatives: &[FeatureVector],
    k: usize,
    options: &LogisticOptions,
) -> RocMetrics {
    let k = k.max(2);
    if positives.len() < k || negatives.len() < k {
        return roc_metrics(&[], &[]);
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut pos = positives.to_vec();
    let mut neg = negatives.to_vec();
    pos.shuffle(&mut rng);
    neg.shuffle(&mut rng);

    let mut pos_scores = Vec::with_capacity(pos.len());
    let mut neg_scores = Vec::with_capacity(neg.len());
    for fold in 0..k {
        let (pos_train, pos_test) = split(&pos, fold_range(pos.len(), k, fold));
        let (neg_train, neg_test) = split(&neg, fold_range(neg.len(), k, fold));
        if let Some(model) = train_logistic(&pos_train, &neg_train, options) {
            pos_scores.extend(pos_test.iter().map(|fv| model.score(fv)));
            neg_scores.extend(neg_test.iter().map(|fv| model.score(fv)));
        }
    }
    roc_metrics(&pos_scores, &neg_scores)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepPoint {
    pub lambda: f64,
    pub metrics: RocMetrics,
}

/// Cross-validate logistic regression at each regularization strength
pub fn sweep_regularization(
    positives: &[FeatureVector],
    negatives: &[FeatureVector],
    lambdas: &[f64],
    k: usize,
    options: &LogisticOptions,
) -> Vec<SweepPoint> {
    lambdas
        .iter()
        .map(|&lambda| {
            let options = LogisticOptions { lambda, ..*options };
            let metrics = cross_validate(positives, negatives, k, &options);
            log::debug!(
                "- lambda {:e}: AUC {:.4}, TPR@1%FPR {:.4}",
                lambda,
                metrics.auc,
                metrics.tpr_at_1_fpr
            );
            SweepPoint { lambda, metrics }
        })
        .collect()
}

/// Regularization strength with the highest cross-validated AUC, preferring
/// the stronger penalty on ties
pub fn best_lambda(sweep: &[SweepPoint]) -> Option<f64> {
    sweep
        .iter()
        .fold(None, |best: Option<&SweepPoint>, point| match best {
            Some(b) if b.metrics.auc > point.metrics.auc => Some(b),
            Some(b) if b.metrics.auc == point.metrics.auc && b.lambda >= point.lambda => Some(b),
            _ => Some(point),
        })
        .map(|point| point.lambda)
}
