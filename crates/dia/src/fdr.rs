//! Iterative, self-labelled target-decoy FDR estimation
//!
//! Each iteration picks confident targets as positives and decoys as
//! negatives, trains a logistic regression classifier on their feature
//! vectors, rescores every precursor and recomputes q-values. Iteration stops
//! once both the classifier weights and the number of identifications settle.

use crate::features::FeatureVector;
use crate::ml::classifier::{train_logistic, ClassifierModel, LogisticOptions};
use crate::ml::qvalue::target_decoy_q_values;
use crate::ml::quartiles;
use crate::ml::validation::roc_metrics;
use crate::result::DiaSearchResult;
use crate::Error;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Decoys are subsampled once they outnumber positives by this factor
const MAX_DECOY_RATIO: usize = 2;
const MIN_NEGATIVE_SAMPLE: usize = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdrOptions {
    pub max_iterations: usize,
    /// Relative L2 weight change below which the classifier has converged
    pub convergence_threshold: f64,
    /// Relative change in identifications below which they have converged
    pub id_count_convergence_threshold: f64,
    pub q_value_threshold: f64,
    /// Fraction of targets used as positives before any q-values exist
    pub training_quantile: f64,
    pub min_training_examples: usize,
    pub lambda: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub interaction: bool,
}

impl Default for FdrOptions {
    fn default() -> Self {
        FdrOptions {
            max_iterations: 5,
            convergence_threshold: 0.01,
            id_count_convergence_threshold: 0.01,
            q_value_threshold: 0.01,
            training_quantile: 0.40,
            min_training_examples: 50,
            lambda: 5E-3,
            learning_rate: 0.05,
            epochs: 300,
            batch_size: 256,
            seed: 42,
            interaction: false,
        }
    }
}

impl FdrOptions {
    pub fn logistic(&self) -> LogisticOptions {
        LogisticOptions {
            learning_rate: self.learning_rate,
            lambda: self.lambda,
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
            interaction: self.interaction,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdrState {
    Initializing,
    Training,
    Scoring,
    Converged,
    MaxIterationsReached,
    /// A training pool fell below the minimum size
    Stalled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IterationDiagnostics {
    pub iteration: usize,
    pub positives: usize,
    pub negatives: usize,
    pub target_mean: f64,
    pub target_median: f64,
    pub target_q25: f64,
    pub target_q75: f64,
    pub decoy_mean: f64,
    pub decoy_median: f64,
    pub decoy_q25: f64,
    pub decoy_q75: f64,
    /// Difference between the mean target and decoy scores
    pub separation: f64,
    /// Target vs decoy ROC AUC
    pub auc: f64,
    pub ids_at_1pct: usize,
    /// Relative change from the previous weights; infinite on the first
    /// iteration
    pub weight_change: f64,
    pub weights: Vec<f64>,
    pub bias: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FdrResult {
    pub classifier: ClassifierModel,
    pub state: FdrState,
    pub iterations_completed: usize,
    pub ids_at_1pct: usize,
    pub diagnostics: Vec<IterationDiagnostics>,
}

pub struct FdrEngine<'a> {
    features: &'a [FeatureVector],
    options: &'a FdrOptions,
    state: FdrState,
}

impl<'a> FdrEngine<'a> {
    /// Run iterative FDR estimation over `features`, writing the final
    /// classifier scores and q-values back into `results`. `features[i]`
    /// must describe `results[i]`.
    pub fn run(
        results: &mut [DiaSearchResult],
        features: &'a [FeatureVector],
        options: &'a FdrOptions,
    ) -> Result<FdrResult, Error> {
        if features.is_empty() {
            return Err(Error::Fdr("no precursors to score".into()));
        }
        if features.len() != results.len() {
            return Err(Error::Fdr(format!(
                "{} feature vectors for {} results",
                features.len(),
                results.len()
            )));
        }
        let decoys = features.iter().filter(|fv| fv.decoy).count();
        if decoys == 0 {
            return Err(Error::Fdr("no decoys, q-values cannot be estimated".into()));
        }
        if decoys == features.len() {
            return Err(Error::Fdr("no targets".into()));
        }

        let mut engine = FdrEngine {
            features,
            options,
            state: FdrState::Initializing,
        };
        let fdr = engine.iterate();

        let scores = engine.score(&fdr.classifier);
        let (q_values, _) = engine.q_values(&scores);
        for ((result, score), q) in results.iter_mut().zip(&scores).zip(&q_values) {
            result.classifier_score = *score as f32;
            result.q_value = *q as f32;
        }
        Ok(fdr)
    }

    fn transition(&mut self, state: FdrState) {
        log::trace!("- fdr: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn score(&self, classifier: &ClassifierModel) -> Vec<f64> {
        self.features.iter().map(|fv| classifier.score(fv)).collect()
    }

    fn q_values(&self, scores: &[f64]) -> (Vec<f64>, usize) {
        let decoy = self.features.iter().map(|fv| fv.decoy).collect::<Vec<_>>();
        target_decoy_q_values(scores, &decoy, self.options.q_value_threshold)
    }

    /// The top `training_quantile` of targets by `scores`
    fn top_targets(&self, scores: &[f64]) -> Vec<FeatureVector> {
        let mut targets = (0..self.features.len())
            .filter(|&ix| !self.features[ix].decoy)
            .collect::<Vec<_>>();
        targets.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let n = targets.len();
        let excluded = (n as f64 * (1.0 - self.options.training_quantile)).floor() as usize;
        targets[..n - excluded.min(n)]
            .iter()
            .map(|&ix| self.features[ix])
            .collect()
    }

    fn positives(&self, previous: Option<(&[f64], &[f64])>) -> Vec<FeatureVector> {
        match previous {
            None => {
                let best = self
                    .features
                    .iter()
                    .map(|fv| fv.apex_score.max(fv.temporal_score) as f64)
                    .collect::<Vec<_>>();
                self.top_targets(&best)
            }
            Some((scores, q_values)) => {
                let passing = self
                    .features
                    .iter()
                    .zip(q_values)
                    .filter(|(fv, q)| !fv.decoy && **q <= self.options.q_value_threshold)
                    .map(|(fv, _)| *fv)
                    .collect::<Vec<_>>();
                if passing.len() >= self.options.min_training_examples {
                    passing
                } else {
                    log::trace!(
                        "- only {} targets pass q <= {}, using top {:.0}% by score",
                        passing.len(),
                        self.options.q_value_threshold,
                        self.options.training_quantile * 100.0
                    );
                    self.top_targets(scores)
                }
            }
        }
    }

    fn negatives(&self, positives: usize) -> Vec<FeatureVector> {
        let mut decoys = self
            .features
            .iter()
            .filter(|fv| fv.decoy)
            .copied()
            .collect::<Vec<_>>();
        if decoys.len() <= MAX_DECOY_RATIO * positives {
            return decoys;
        }
        let amount = positives.max(MIN_NEGATIVE_SAMPLE).min(decoys.len());
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let (sample, _) = decoys.partial_shuffle(&mut rng, amount);
        sample.to_vec()
    }

    fn diagnostics(
        &self,
        iteration: usize,
        training: (usize, usize),
        scores: &[f64],
        ids_at_1pct: usize,
        weight_change: f64,
        classifier: &ClassifierModel,
    ) -> IterationDiagnostics {
        let (mut targets, mut decoys): (Vec<f64>, Vec<f64>) = (Vec::new(), Vec::new());
        for (fv, score) in self.features.iter().zip(scores) {
            match fv.decoy {
                true => decoys.push(*score),
                false => targets.push(*score),
            }
        }
        let auc = roc_metrics(&targets, &decoys).auc;
        targets.sort_by(|a, b| a.total_cmp(b));
        decoys.sort_by(|a, b| a.total_cmp(b));
        let (target_mean, target_median, target_q25, target_q75) = quartiles(&targets);
        let (decoy_mean, decoy_median, decoy_q25, decoy_q75) = quartiles(&decoys);

        IterationDiagnostics {
            iteration,
            positives: training.0,
            negatives: training.1,
            target_mean,
            target_median,
            target_q25,
            target_q75,
            decoy_mean,
            decoy_median,
            decoy_q25,
            decoy_q75,
            separation: target_mean - decoy_mean,
            auc,
            ids_at_1pct,
            weight_change,
            weights: classifier.weights().to_vec(),
            bias: classifier.bias(),
        }
    }

    fn iterate(&mut self) -> FdrResult {
        let logistic = self.options.logistic();
        self.iterate_with(|positives, negatives| train_logistic(positives, negatives, &logistic))
    }

    /// Run the self-labelling loop with `train` fitting each iteration's
    /// classifier. A failed fit stalls the loop and keeps the last classifier.
    fn iterate_with<T>(&mut self, mut train: T) -> FdrResult
    where
        T: FnMut(&[FeatureVector], &[FeatureVector]) -> Option<ClassifierModel>,
    {
        let options = self.options;

        let mut classifier: Option<ClassifierModel> = None;
        let mut previous: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut ids_at_1pct = 0;
        let mut diagnostics = Vec::new();
        let mut final_state = FdrState::MaxIterationsReached;

        for iteration in 1..=options.max_iterations {
            let start = Instant::now();
            self.transition(FdrState::Training);

            let positives = self.positives(
                previous
                    .as_ref()
                    .map(|(s, q)| (s.as_slice(), q.as_slice())),
            );
            let negatives = self.negatives(positives.len());
            if positives.len() < options.min_training_examples
                || negatives.len() < options.min_training_examples
            {
                log::warn!(
                    "- fdr iteration {}: too few training examples ({} positives, {} negatives)",
                    iteration,
                    positives.len(),
                    negatives.len()
                );
                final_state = FdrState::Stalled;
                break;
            }

            let model = match train(&positives, &negatives) {
                Some(model) => model,
                None => {
                    log::warn!("- fdr iteration {}: classifier training failed", iteration);
                    final_state = FdrState::Stalled;
                    break;
                }
            };

            self.transition(FdrState::Scoring);
            let scores = self.score(&model);
            let (q_values, ids) = self.q_values(&scores);
            let weight_change = match &classifier {
                Some(prev) => model.weight_change_l2(prev.weights()),
                None => f64::INFINITY,
            };
            let id_change = (ids as f64 - ids_at_1pct as f64).abs() / (ids_at_1pct.max(1) as f64);

            let diag = self.diagnostics(
                iteration,
                (positives.len(), negatives.len()),
                &scores,
                ids,
                weight_change,
                &model,
            );
            log::trace!(
                "- fdr iteration {}: {} ids at {:.0}% FDR, AUC {:.4}, separation {:.3}, \
                 weight change {:.4}",
                iteration,
                ids,
                options.q_value_threshold * 100.0,
                diag.auc,
                diag.separation,
                weight_change
            );
            log::debug!("- fdr iteration {}: {:?}", iteration, start.elapsed());
            diagnostics.push(diag);

            classifier = Some(model);
            previous = Some((scores, q_values));
            let converged = iteration > 1
                && weight_change < options.convergence_threshold
                && id_change < options.id_count_convergence_threshold;
            ids_at_1pct = ids;

            if converged {
                final_state = FdrState::Converged;
                break;
            }
        }

        let classifier = classifier.unwrap_or_else(|| {
            log::warn!("- fdr: no classifier trained, ranking by max(apex, temporal) score");
            ClassifierModel::max_apex_temporal()
        });
        if diagnostics.is_empty() {
            let scores = self.score(&classifier);
            ids_at_1pct = self.q_values(&scores).1;
        }
        self.transition(final_state);

        log::info!(
            "- fdr: {} precursors at {:.0}% FDR after {} iterations ({:?})",
            ids_at_1pct,
            options.q_value_threshold * 100.0,
            diagnostics.len(),
            final_state
        );
        FdrResult {
            classifier,
            state: final_state,
            iterations_completed: diagnostics.len(),
            ids_at_1pct,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ml::classifier::test::synthetic;

    fn dataset(
        n_target: usize,
        n_decoy: usize,
        seed: u64,
    ) -> (Vec<DiaSearchResult>, Vec<FeatureVector>) {
        let (pos, neg) = synthetic(n_target, n_decoy, seed);
        let features = pos
            .into_iter()
            .chain(neg)
            .enumerate()
            .map(|(ix, fv)| FeatureVector {
                precursor_index: ix,
                ..fv
            })
            .collect::<Vec<_>>();
        let results = features
            .iter()
            .map(|fv| DiaSearchResult {
                precursor_index: fv.precursor_index,
                decoy: fv.decoy,
                ..Default::default()
            })
            .collect();
        (results, features)
    }

    #[test]
    fn separable_targets() {
        let (mut results, features) = dataset(600, 600, 7);
        let options = FdrOptions {
            epochs: 40,
            ..Default::default()
        };
        let fdr = FdrEngine::run(&mut results, &features, &options).unwrap();

        assert!(fdr.iterations_completed >= 1);
        assert!(fdr.iterations_completed <= options.max_iterations);
        assert!(matches!(
            fdr.state,
            FdrState::Converged | FdrState::MaxIterationsReached
        ));
        assert_eq!(fdr.classifier.name(), "LogisticRegression");
        assert!(fdr.ids_at_1pct > 300, "{}", fdr.ids_at_1pct);
        assert!(fdr.ids_at_1pct <= 600);

        let first = &fdr.diagnostics[0];
        assert_eq!(first.weight_change, f64::INFINITY);
        assert_eq!(first.positives, 240);
        assert_eq!(first.negatives, 600);
        assert!(first.separation > 0.0);
        assert!(first.auc > 0.9);

        assert!(results.iter().all(|r| !r.classifier_score.is_nan()));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.q_value)));
    }

    #[test]
    fn convergence_requires_both_thresholds() {
        let (results, features) = dataset(400, 400, 11);
        let base = FdrOptions {
            epochs: 20,
            max_iterations: 4,
            ..Default::default()
        };

        let options = FdrOptions {
            convergence_threshold: f64::MAX,
            id_count_convergence_threshold: f64::MAX,
            ..base
        };
        let fdr = FdrEngine::run(&mut results.clone(), &features, &options).unwrap();
        assert_eq!(fdr.state, FdrState::Converged);
        assert_eq!(fdr.iterations_completed, 2);
        assert!(fdr.iterations_completed < options.max_iterations);

        // Settled weights alone never stop the loop
        let options = FdrOptions {
            convergence_threshold: f64::MAX,
            id_count_convergence_threshold: 0.0,
            ..base
        };
        let fdr = FdrEngine::run(&mut results.clone(), &features, &options).unwrap();
        assert_eq!(fdr.state, FdrState::MaxIterationsReached);
        assert_eq!(fdr.iterations_completed, options.max_iterations);

        // Nor do settled identification counts
        let options = FdrOptions {
            convergence_threshold: 0.0,
            id_count_convergence_threshold: f64::MAX,
            ..base
        };
        let fdr = FdrEngine::run(&mut results.clone(), &features, &options).unwrap();
        assert_eq!(fdr.state, FdrState::MaxIterationsReached);
        assert_eq!(fdr.iterations_completed, options.max_iterations);
    }

    #[test]
    fn failed_training_keeps_last_classifier() {
        let (_, features) = dataset(300, 300, 13);
        let options = FdrOptions {
            epochs: 20,
            ..Default::default()
        };
        let logistic = options.logistic();
        let mut engine = FdrEngine {
            features: &features,
            options: &options,
            state: FdrState::Initializing,
        };

        let mut calls = 0;
        let fdr = engine.iterate_with(|pos, neg| {
            calls += 1;
            match calls {
                1 => train_logistic(pos, neg, &logistic),
                _ => None,
            }
        });

        assert_eq!(calls, 2);
        assert_eq!(fdr.state, FdrState::Stalled);
        assert_eq!(engine.state, FdrState::Stalled);
        assert_eq!(fdr.iterations_completed, 1);
        assert_eq!(fdr.classifier.name(), "LogisticRegression");
        assert_eq!(fdr.classifier.weights(), fdr.diagnostics[0].weights.as_slice());
        assert_eq!(fdr.classifier.bias(), fdr.diagnostics[0].bias);
        assert_eq!(fdr.ids_at_1pct, fdr.diagnostics[0].ids_at_1pct);
    }

    #[test]
    fn q_values_are_monotone() {
        let (mut results, features) = dataset(400, 300, 3);
        let options = FdrOptions {
            epochs: 20,
            max_iterations: 2,
            ..Default::default()
        };
        let fdr = FdrEngine::run(&mut results, &features, &options).unwrap();

        let mut ranked = results.iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| {
            b.classifier_score
                .total_cmp(&a.classifier_score)
                .then(a.q_value.total_cmp(&b.q_value))
        });
        for pair in ranked.windows(2) {
            assert!(pair[0].q_value <= pair[1].q_value);
        }
        let passing = results.iter().filter(|r| !r.decoy && r.q_value <= 0.01).count();
        assert_eq!(passing, fdr.ids_at_1pct);
    }

    #[test]
    fn decoy_subsampling() {
        let (_, features) = dataset(100, 5000, 5);
        let options = FdrOptions::default();
        let engine = FdrEngine {
            features: &features,
            options: &options,
            state: FdrState::Initializing,
        };
        let negatives = engine.negatives(40);
        assert_eq!(negatives.len(), MIN_NEGATIVE_SAMPLE);
        assert!(negatives.iter().all(|fv| fv.decoy));
        assert_eq!(negatives, engine.negatives(40));
        assert_eq!(engine.negatives(3000).len(), 5000);
    }

    #[test]
    fn stalls_on_small_pools() {
        let (mut results, features) = dataset(60, 60, 9);
        let fdr = FdrEngine::run(&mut results, &features, &FdrOptions::default()).unwrap();
        assert_eq!(fdr.state, FdrState::Stalled);
        assert_eq!(fdr.iterations_completed, 0);
        assert_eq!(fdr.classifier, ClassifierModel::MaxApexTemporal);
        assert!(results.iter().all(|r| !r.classifier_score.is_nan()));
    }

    #[test]
    fn invalid_input() {
        let options = FdrOptions::default();
        let (mut results, features) = dataset(10, 10, 1);
        assert!(FdrEngine::run(&mut [], &[], &options).is_err());
        assert!(FdrEngine::run(&mut results[..5], &features, &options).is_err());

        let targets = &features[..10];
        assert!(matches!(
            FdrEngine::run(&mut results[..10], targets, &options),
            Err(Error::Fdr(_))
        ));
        let decoys = &features[10..];
        assert!(FdrEngine::run(&mut results[10..], decoys, &options).is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: FdrOptions = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(options.max_iterations, 3);
        assert_eq!(options.lambda, 5E-3);
        assert_eq!(options.logistic().learning_rate, 0.05);
    }
}
