//! Linear target/decoy classifiers over [`FeatureVector`]s
//!
//! Every trained model standardizes features with the global mean and
//! standard deviation of its training set before applying a linear model.
//! The optional interaction term multiplies the standardized ApexScore and
//! MeanFragCorr features.

use super::gauss::Gauss;
use super::matrix::Matrix;
use super::norm;
use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Hand-tuned weights for [`ClassifierModel::FixedLinear`], in canonical
/// feature order
pub const FIXED_LINEAR_WEIGHTS: [f64; FEATURE_COUNT] = [
    0.30, 0.20, 0.0, 0.20, 0.05, 0.08, 0.03, -0.04, 0.02, -0.02, 0.02, -0.05, -0.02,
];

const INTERACTION_NAME: &str = "ApexScore*MeanFragCorr";
const APEX: usize = 0;
const MEAN_FRAG_CORR: usize = 3;

/// Standard deviations at or below this value zero out their feature
const MIN_STD: f64 = 1E-8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardization {
    pub fn fit<'a, I>(features: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let mut sum = [0.0f64; FEATURE_COUNT];
        let mut sum_sq = [0.0f64; FEATURE_COUNT];
        let mut n = 0usize;
        for fv in features {
            for (j, x) in fv.to_array().iter().enumerate() {
                let x = if x.is_nan() { 0.0 } else { *x as f64 };
                sum[j] += x;
                sum_sq[j] += x * x;
            }
            n += 1;
        }
        let n = n.max(1) as f64;
        let means = sum.iter().map(|s| s / n).collect::<Vec<_>>();
        let stds = sum_sq
            .iter()
            .zip(&means)
            .map(|(sq, mean)| {
                let var = sq / n - mean * mean;
                if var > 0.0 {
                    var.sqrt()
                } else {
                    MIN_STD
                }
            })
            .collect();
        Standardization { means, stds }
    }

    pub fn apply(&self, fv: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        for (j, x) in fv.to_array().iter().enumerate() {
            let x = if x.is_nan() { 0.0 } else { *x as f64 };
            out[j] = match self.stds[j] > MIN_STD {
                true => (x - self.means[j]) / self.stds[j],
                false => 0.0,
            };
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// `FEATURE_COUNT` weights, plus one trailing interaction weight when
    /// `interaction` is set
    pub weights: Vec<f64>,
    pub bias: f64,
    pub standardization: Option<Standardization>,
    pub interaction: bool,
}

impl LinearModel {
    /// Design row: standardized features, with the interaction term appended
    fn design(&self, fv: &FeatureVector) -> Vec<f64> {
        let x = match &self.standardization {
            Some(s) => s.apply(fv),
            None => {
                let mut x = [0.0; FEATURE_COUNT];
                for (out, v) in x.iter_mut().zip(fv.to_array()) {
                    *out = if v.is_nan() { 0.0 } else { v as f64 };
                }
                x
            }
        };
        let mut row = x.to_vec();
        if self.interaction {
            row.push(x[APEX] * x[MEAN_FRAG_CORR]);
        }
        row
    }

    pub fn score(&self, fv: &FeatureVector) -> f64 {
        self.design(fv)
            .iter()
            .zip(&self.weights)
            .fold(self.bias, |acc, (x, w)| acc + x * w)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassifierModel {
    /// max(ApexScore, TemporalScore)
    MaxApexTemporal,
    FixedLinear(LinearModel),
    Lda(LinearModel),
    LogisticRegression(LinearModel),
}

impl ClassifierModel {
    pub fn max_apex_temporal() -> Self {
        ClassifierModel::MaxApexTemporal
    }

    pub fn fixed_linear() -> Self {
        ClassifierModel::FixedLinear(LinearModel {
            weights: FIXED_LINEAR_WEIGHTS.to_vec(),
            bias: 0.0,
            standardization: None,
            interaction: false,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClassifierModel::MaxApexTemporal => "MaxApexTemporal",
            ClassifierModel::FixedLinear(_) => "FixedLinear",
            ClassifierModel::Lda(_) => "LDA",
            ClassifierModel::LogisticRegression(_) => "LogisticRegression",
        }
    }

    pub fn linear(&self) -> Option<&LinearModel> {
        match self {
            ClassifierModel::MaxApexTemporal => None,
            ClassifierModel::FixedLinear(m)
            | ClassifierModel::Lda(m)
            | ClassifierModel::LogisticRegression(m) => Some(m),
        }
    }

    pub fn weights(&self) -> &[f64] {
        self.linear().map(|m| m.weights.as_slice()).unwrap_or(&[])
    }

    pub fn bias(&self) -> f64 {
        self.linear().map(|m| m.bias).unwrap_or(0.0)
    }

    pub fn score(&self, fv: &FeatureVector) -> f64 {
        match self.linear() {
            Some(model) => model.score(fv),
            None => fv.apex_score.max(fv.temporal_score) as f64,
        }
    }

    pub fn weight_norm_l2(&self) -> f64 {
        norm(self.weights())
    }

    /// Relative change `|w - previous| / |previous|`; infinite if the shapes
    /// differ or `previous` is zero
    pub fn weight_change_l2(&self, previous: &[f64]) -> f64 {
        weight_change_l2(self.weights(), previous)
    }

    /// Human-readable weights, sorted by decreasing magnitude
    pub fn describe_weights(&self) -> String {
        let mut out = format!("classifier: {}\nbias: {:.6}\n", self.name(), self.bias());
        let weights = self.weights();
        let mut named = weights
            .iter()
            .enumerate()
            .map(|(i, w)| (FEATURE_NAMES.get(i).copied().unwrap_or(INTERACTION_NAME), *w))
            .collect::<Vec<_>>();
        named.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        for (name, w) in named {
            out.push_str(&format!("  {:>+9.4}  {}\n", w, name));
        }
        out
    }
}

pub fn weight_change_l2(current: &[f64], previous: &[f64]) -> f64 {
    if current.len() != previous.len() {
        return f64::INFINITY;
    }
    let old = norm(previous);
    if old <= 1E-12 {
        return f64::INFINITY;
    }
    let diff = current
        .iter()
        .zip(previous)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt();
    diff / old
}

/// Linear discriminant analysis on standardized features: solve
/// `(Sw + ridge * I) . w = mu_pos - mu_neg`. Returns `None` if either class
/// is empty.
pub fn train_lda(
    positives: &[FeatureVector],
    negatives: &[FeatureVector],
) -> Option<ClassifierModel> {
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }
    let standardization = Standardization::fit(positives.iter().chain(negatives));
    let to_matrix = |class: &[FeatureVector]| {
        let data = class
            .iter()
            .flat_map(|fv| standardization.apply(fv))
            .collect::<Vec<_>>();
        Matrix::new(data, class.len(), FEATURE_COUNT)
    };
    let pos = to_matrix(positives);
    let neg = to_matrix(negatives);
    let (mean_pos, mean_neg) = (pos.mean(), neg.mean());

    let mut scatter_within = pos.scatter(&mean_pos);
    scatter_within += neg.scatter(&mean_neg);
    scatter_within.add_diagonal(1E-4 * (positives.len() + negatives.len()) as f64);

    let diff = mean_pos
        .iter()
        .zip(&mean_neg)
        .map(|(p, n)| p - n)
        .collect::<Vec<_>>();

    let diagonal = scatter_within.diagonal();
    let mut weights = match Gauss::solve(scatter_within, Matrix::col_vector(diff.clone())) {
        Some(solution) if solution.col(0).all(f64::is_finite) => solution.col(0).collect(),
        _ => {
            log::trace!("- LDA scatter matrix is singular, using diagonal approximation");
            diff.iter()
                .zip(&diagonal)
                .map(|(d, s)| if *s > 1E-10 { d / s } else { 0.0 })
                .collect::<Vec<_>>()
        }
    };

    let n = norm(&weights);
    if n > 1E-8 {
        weights.iter_mut().for_each(|w| *w /= n);
    }
    let bias = -weights
        .iter()
        .zip(mean_pos.iter().zip(&mean_neg))
        .map(|(w, (p, n))| w * (p + n) / 2.0)
        .sum::<f64>();

    log::trace!("- LDA weights: {:?}", weights);
    Some(ClassifierModel::Lda(LinearModel {
        weights,
        bias,
        standardization: Some(standardization),
        interaction: false,
    }))
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticOptions {
    pub learning_rate: f64,
    pub lambda: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub interaction: bool,
}

impl Default for LogisticOptions {
    fn default() -> Self {
        LogisticOptions {
            learning_rate: 0.01,
            lambda: 1E-3,
            epochs: 200,
            batch_size: 256,
            seed: 42,
            interaction: false,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    match z {
        z if z > 20.0 => 1.0,
        z if z < -20.0 => 0.0,
        z => 1.0 / (1.0 + (-z).exp()),
    }
}

/// L2-regularized logistic regression, fit by mini-batch gradient descent
/// over a freshly shuffled order every epoch. Returns `None` if either class
/// is empty or the fit diverged to non-finite weights.
pub fn train_logistic(
    positives: &[FeatureVector],
    negatives: &[FeatureVector],
    options: &LogisticOptions,
) -> Option<ClassifierModel> {
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }
    let standardization = Standardization::fit(positives.iter().chain(negatives));
    let mut model = LinearModel {
        weights: vec![0.0; FEATURE_COUNT + options.interaction as usize],
        bias: 0.0,
        standardization: Some(standardization),
        interaction: options.interaction,
    };

    let rows = positives
        .iter()
        .map(|fv| (model.design(fv), 1.0))
        .chain(negatives.iter().map(|fv| (model.design(fv), 0.0)))
        .collect::<Vec<_>>();

    let dims = model.weights.len();
    let batch_size = options.batch_size.max(1);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut order = (0..rows.len()).collect::<Vec<_>>();
    let mut grad = vec![0.0; dims];

    for _ in 0..options.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(batch_size) {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0;
            for &ix in batch {
                let (x, y) = &rows[ix];
                let z = x
                    .iter()
                    .zip(&model.weights)
                    .fold(model.bias, |acc, (x, w)| acc + x * w);
                let err = sigmoid(z) - y;
                grad.iter_mut().zip(x).for_each(|(g, x)| *g += err * x);
                grad_bias += err;
            }
            let inv = 1.0 / batch.len() as f64;
            for (w, g) in model.weights.iter_mut().zip(&grad) {
                *w -= options.learning_rate * (g * inv + options.lambda * *w);
            }
            model.bias -= options.learning_rate * grad_bias * inv;
        }
    }

    if !model.bias.is_finite() || !model.weights.iter().all(|w| w.is_finite()) {
        log::error!(
            "logistic regression produced non-finite weights: {:?}",
            model.weights
        );
        return None;
    }
    Some(ClassifierModel::LogisticRegression(model))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use rand::Rng;

    /// Separable synthetic classes: positives have higher apex/temporal and
    /// fragment correlation, negatives are noisier
    pub fn synthetic(
        n_pos: usize,
        n_neg: usize,
        seed: u64,
    ) -> (Vec<FeatureVector>, Vec<FeatureVector>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut draw = |center: f32, decoy: bool| FeatureVector {
            apex_score: center + rng.gen_range(-0.15..0.15),
            temporal_score: center + rng.gen_range(-0.15..0.15),
            spectral_angle: center * 0.8 + rng.gen_range(-0.1..0.1),
            mean_fragment_correlation: center + rng.gen_range(-0.2..0.2),
            min_fragment_correlation: center - 0.3 + rng.gen_range(-0.2..0.2),
            fragment_detection_rate: rng.gen_range(0.5..1.0),
            log_total_intensity: rng.gen_range(3.0..6.0),
            intensity_cv: rng.gen_range(0.2..1.0),
            median_xic_depth: rng.gen_range(5.0..20.0),
            xic_depth_cv: rng.gen_range(0.0..0.5),
            time_points_used: rng.gen_range(5.0..20.0),
            rt_deviation_minutes: rng.gen_range(0.0..2.0),
            rt_deviation_squared: 0.0,
            decoy,
            ..Default::default()
        };
        let pos: Vec<_> = (0..n_pos).map(|_| draw(0.75, false)).collect();
        let neg: Vec<_> = (0..n_neg).map(|_| draw(0.45, true)).collect();
        (pos, neg)
    }

    #[test]
    fn fixed_models() {
        let fv = FeatureVector {
            apex_score: 0.6,
            temporal_score: 0.8,
            mean_fragment_correlation: 0.5,
            ..Default::default()
        };
        let max = ClassifierModel::max_apex_temporal();
        assert!((max.score(&fv) - 0.8).abs() < 1E-6);
        assert!(max.weights().is_empty());

        let fixed = ClassifierModel::fixed_linear();
        let expected = 0.30 * 0.6 + 0.20 * 0.8 + 0.20 * 0.5;
        assert!((fixed.score(&fv) - expected).abs() < 1E-6);
        assert_eq!(fixed.weights().len(), FEATURE_COUNT);
    }

    #[test]
    fn standardization() {
        let a = FeatureVector {
            apex_score: 1.0,
            temporal_score: 5.0,
            ..Default::default()
        };
        let b = FeatureVector {
            apex_score: 3.0,
            temporal_score: 5.0,
            ..Default::default()
        };
        let s = Standardization::fit([a, b].iter());
        assert_eq!(s.means[0], 2.0);
        assert_eq!(s.stds[0], 1.0);
        let x = s.apply(&a);
        assert_eq!(x[0], -1.0);
        // Constant features are zeroed out
        assert_eq!(x[1], 0.0);

        let nan = FeatureVector {
            apex_score: f32::NAN,
            ..Default::default()
        };
        assert_eq!(s.apply(&nan)[0], -2.0);
    }

    #[test]
    fn lda_separates() {
        let (pos, neg) = synthetic(300, 300, 1);
        let model = train_lda(&pos, &neg).unwrap();
        assert_eq!(model.name(), "LDA");
        assert!((model.weight_norm_l2() - 1.0).abs() < 1E-9);

        let mean = |xs: &[FeatureVector]| {
            xs.iter().map(|fv| model.score(fv)).sum::<f64>() / xs.len() as f64
        };
        assert!(mean(&pos) > 0.0);
        assert!(mean(&neg) < 0.0);
        assert!(train_lda(&pos, &[]).is_none());
    }

    #[test]
    fn logistic_separates() {
        let (pos, neg) = synthetic(400, 400, 2);
        let options = LogisticOptions {
            interaction: true,
            epochs: 50,
            ..Default::default()
        };
        let model = train_logistic(&pos, &neg, &options).unwrap();
        assert_eq!(model.weights().len(), FEATURE_COUNT + 1);
        assert!(model.weights()[0] > 0.0);

        let correct = pos.iter().filter(|fv| model.score(fv) > 0.0).count()
            + neg.iter().filter(|fv| model.score(fv) < 0.0).count();
        assert!(correct as f64 / 800.0 > 0.9);

        // Deterministic under a fixed seed
        let again = train_logistic(&pos, &neg, &options).unwrap();
        assert_eq!(model, again);
        assert!(train_logistic(&[], &neg, &options).is_none());
    }

    #[test]
    fn diverging_logistic_fit_is_rejected() {
        let (pos, neg) = synthetic(100, 100, 4);
        let options = LogisticOptions {
            learning_rate: 1E300,
            lambda: 1.0,
            epochs: 5,
            ..Default::default()
        };
        assert!(train_logistic(&pos, &neg, &options).is_none());
    }

    #[test]
    fn weight_diagnostics() {
        assert_eq!(weight_change_l2(&[1.0, 1.0], &[1.0]), f64::INFINITY);
        assert_eq!(weight_change_l2(&[1.0], &[0.0]), f64::INFINITY);
        assert!((weight_change_l2(&[3.0, 4.0], &[3.0, 0.0]) - 4.0 / 3.0).abs() < 1E-12);

        let described = ClassifierModel::fixed_linear().describe_weights();
        assert!(described.starts_with("classifier: FixedLinear"));
        let first = described.lines().nth(2).unwrap();
        assert!(first.ends_with("ApexScore"));
    }

    #[test]
    fn serde_tagged() {
        let json = serde_json::to_string(&ClassifierModel::MaxApexTemporal).unwrap();
        assert_eq!(json, r#"{"type":"MaxApexTemporal"}"#);
        let fixed = ClassifierModel::fixed_linear();
        let json = serde_json::to_string(&fixed).unwrap();
        let back: ClassifierModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fixed);
    }
}
