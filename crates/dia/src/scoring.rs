//! Chromatogram similarity scores
//!
//! All scores operate on an [`XicMatrix`]: fragment XICs aligned onto the
//! time grid of a reference fragment. Scores are `NaN` whenever there is not
//! enough signal to compute them; `NaN` means "unscored" and is never an
//! error.

use serde::{Deserialize, Serialize};

/// Two XIC points closer than this (in minutes) belong to the same scan
pub const RT_ALIGN_TOLERANCE: f32 = 0.01;

/// Default minimum number of co-detected fragments for a time point to take
/// part in temporal scoring
pub const MIN_ACTIVE_FRAGMENTS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScoringStrategy {
    /// Library vs. intensities summed over the whole RT window
    Summed,
    /// Library vs. the single time point with the highest total signal
    ConsensusApex,
    #[default]
    TemporalCosine,
    /// Intensity-weighted temporal cosine with power-law sharpening
    WeightedTemporalCosineWithTransform,
}

/// Time x fragment intensity matrix, row-major
#[derive(Clone, Debug, PartialEq)]
pub struct XicMatrix {
    rts: Vec<f32>,
    data: Vec<f32>,
    fragments: usize,
}

impl XicMatrix {
    /// # Panics
    ///
    /// * Panics if `data.len() != rts.len() * fragments`
    pub fn new(rts: Vec<f32>, data: Vec<f32>, fragments: usize) -> Self {
        assert_eq!(
            data.len(),
            rts.len() * fragments,
            "XIC matrix does not have shape ({}, {})",
            rts.len(),
            fragments
        );
        XicMatrix {
            rts,
            data,
            fragments,
        }
    }

    /// Align each fragment's (rt, intensity) trace onto `reference_rts` with a
    /// two-pointer sweep. Missing points stay zero.
    pub fn align(reference_rts: &[f32], xics: &[(&[f32], &[f32])]) -> Self {
        let fragments = xics.len();
        let mut data = vec![0.0f32; reference_rts.len() * fragments];

        for (f, (rts, intensities)) in xics.iter().enumerate() {
            let mut ptr = 0;
            for (t, &reference) in reference_rts.iter().enumerate() {
                if ptr >= rts.len() {
                    break;
                }
                while ptr < rts.len() && rts[ptr] < reference - RT_ALIGN_TOLERANCE {
                    ptr += 1;
                }
                if ptr < rts.len() && (rts[ptr] - reference).abs() <= RT_ALIGN_TOLERANCE {
                    data[t * fragments + f] = intensities[ptr];
                    ptr += 1;
                }
            }
        }

        XicMatrix {
            rts: reference_rts.to_vec(),
            data,
            fragments,
        }
    }

    pub fn time_points(&self) -> usize {
        self.rts.len()
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn rt(&self, t: usize) -> f32 {
        self.rts[t]
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.fragments..(t + 1) * self.fragments]
    }

    pub fn get(&self, t: usize, f: usize) -> f32 {
        self.data[t * self.fragments + f]
    }

    pub fn row_total(&self, t: usize) -> f32 {
        self.row(t).iter().sum()
    }

    /// Clamp an inclusive range to the matrix, `None` if it is empty
    fn clamp(&self, lo: usize, hi: usize) -> Option<(usize, usize)> {
        let hi = hi.min(self.time_points().checked_sub(1)?);
        (lo <= hi).then_some((lo, hi))
    }

    /// Time index with the largest positive total signal in `[lo, hi]`
    pub fn apex_index(&self, lo: usize, hi: usize) -> Option<usize> {
        let (lo, hi) = self.clamp(lo, hi)?;
        let mut best = None;
        let mut best_total = 0.0f32;
        for t in lo..=hi {
            let total = self.row_total(t);
            if total > best_total {
                best_total = total;
                best = Some(t);
            }
        }
        best
    }
}

/// Cosine similarity clamped to [0, 1]; `NaN` if either vector has zero norm
pub fn normalized_dot_product(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return f32::NAN;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Cosine similarity restricted to fragments observed with positive intensity
pub fn cosine_active_fragments(library: &[f32], observed: &[f32]) -> f32 {
    let (dot, norm_lib, norm_obs) = observed
        .iter()
        .enumerate()
        .filter(|(_, obs)| **obs > 0.0)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, nl, no), (f, obs)| {
            let lib = library.get(f).copied().unwrap_or(0.0);
            (dot + lib * obs, nl + lib * lib, no + obs * obs)
        });
    if norm_lib <= 0.0 || norm_obs <= 0.0 {
        return f32::NAN;
    }
    (dot / (norm_lib.sqrt() * norm_obs.sqrt())).clamp(0.0, 1.0)
}

/// Normalized spectral angle, `1 - 2 * acos(cos) / pi`, in [0, 1]
pub fn spectral_angle(cosine: f32) -> f32 {
    if cosine.is_nan() {
        return f32::NAN;
    }
    1.0 - 2.0 * cosine.clamp(0.0, 1.0).acos() / std::f32::consts::PI
}

/// Apex score: active-fragment cosine at the time point of maximal signal
/// within `[lo, hi]`
pub fn apex_score(
    library: &[f32],
    matrix: &XicMatrix,
    lo: usize,
    hi: usize,
) -> (f32, Option<usize>) {
    match matrix.apex_index(lo, hi) {
        Some(t) => (cosine_active_fragments(library, matrix.row(t)), Some(t)),
        None => (f32::NAN, None),
    }
}

/// Pearson correlation over time points where both fragments are observed
fn pearson(matrix: &XicMatrix, a: usize, b: usize, lo: usize, hi: usize) -> f32 {
    let mut n = 0usize;
    let (mut sa, mut sb, mut sab, mut sa2, mut sb2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for t in lo..=hi {
        let x = matrix.get(t, a) as f64;
        let y = matrix.get(t, b) as f64;
        if x <= 0.0 || y <= 0.0 {
            continue;
        }
        sa += x;
        sb += y;
        sab += x * y;
        sa2 += x * x;
        sb2 += y * y;
        n += 1;
    }
    if n < 3 {
        return f32::NAN;
    }
    let n = n as f64;
    let denom = (n * sa2 - sa * sa) * (n * sb2 - sb * sb);
    if denom <= 0.0 {
        return f32::NAN;
    }
    (((n * sab - sa * sb) / denom.sqrt()) as f32).clamp(-1.0, 1.0)
}

/// Mean and minimum pairwise correlation of fragments with at least three
/// observed points in `[lo, hi]`
pub fn fragment_correlations(matrix: &XicMatrix, lo: usize, hi: usize) -> (f32, f32) {
    let (lo, hi) = match matrix.clamp(lo, hi) {
        Some(range) if range.1 - range.0 + 1 >= 3 => range,
        _ => return (f32::NAN, f32::NAN),
    };

    let detected = (0..matrix.fragments())
        .filter(|&f| (lo..=hi).filter(|&t| matrix.get(t, f) > 0.0).count() >= 3)
        .collect::<Vec<_>>();
    if detected.len() < 2 {
        return (f32::NAN, f32::NAN);
    }

    let mut sum = 0.0f32;
    let mut min = f32::MAX;
    let mut pairs = 0;
    for (i, &a) in detected.iter().enumerate() {
        for &b in &detected[i + 1..] {
            let r = pearson(matrix, a, b, lo, hi);
            if !r.is_nan() {
                sum += r;
                min = min.min(r);
                pairs += 1;
            }
        }
    }
    match pairs {
        0 => (f32::NAN, f32::NAN),
        _ => (sum / pairs as f32, min),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct TemporalScore {
    /// Primary score, after any transform
    pub dot_product_score: f32,
    /// Untransformed aggregate cosine
    pub raw_cosine: f32,
    pub time_points_used: usize,
    pub apex_time_index: Option<usize>,
}

impl TemporalScore {
    pub const INSUFFICIENT: TemporalScore = TemporalScore {
        dot_product_score: f32::NAN,
        raw_cosine: f32::NAN,
        time_points_used: 0,
        apex_time_index: None,
    };

    pub fn is_valid(&self) -> bool {
        !self.dot_product_score.is_nan()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TemporalScorer {
    pub strategy: ScoringStrategy,
    pub nonlinear_power: f32,
    pub min_active_fragments: usize,
}

impl Default for TemporalScorer {
    fn default() -> Self {
        TemporalScorer::new(ScoringStrategy::TemporalCosine, 3.0)
    }
}

impl TemporalScorer {
    pub fn new(strategy: ScoringStrategy, nonlinear_power: f32) -> Self {
        TemporalScorer {
            strategy,
            nonlinear_power: nonlinear_power.max(1.0),
            min_active_fragments: MIN_ACTIVE_FRAGMENTS,
        }
    }

    pub fn with_min_active_fragments(mut self, n: usize) -> Self {
        self.min_active_fragments = n;
        self
    }

    pub fn score(&self, library: &[f32], matrix: &XicMatrix) -> TemporalScore {
        self.score_range(library, matrix, 0, usize::MAX)
    }

    /// Score the inclusive time range `[lo, hi]`
    pub fn score_range(
        &self,
        library: &[f32],
        matrix: &XicMatrix,
        lo: usize,
        hi: usize,
    ) -> TemporalScore {
        if matrix.fragments() < 2 || library.iter().all(|&x| x <= 0.0) {
            return TemporalScore::INSUFFICIENT;
        }
        let (lo, hi) = match matrix.clamp(lo, hi) {
            Some(range) => range,
            None => return TemporalScore::INSUFFICIENT,
        };

        match self.strategy {
            ScoringStrategy::Summed => {
                let mut summed = vec![0.0f32; matrix.fragments()];
                let mut used = 0;
                for t in lo..=hi {
                    let row = matrix.row(t);
                    if row.iter().any(|&x| x > 0.0) {
                        used += 1;
                    }
                    summed.iter_mut().zip(row).for_each(|(s, x)| *s += x);
                }
                let dp = normalized_dot_product(library, &summed);
                TemporalScore {
                    dot_product_score: dp,
                    raw_cosine: dp,
                    time_points_used: used,
                    apex_time_index: None,
                }
            }
            ScoringStrategy::ConsensusApex => match matrix.apex_index(lo, hi) {
                Some(apex) => {
                    let dp = normalized_dot_product(library, matrix.row(apex));
                    TemporalScore {
                        dot_product_score: dp,
                        raw_cosine: dp,
                        time_points_used: hi - lo + 1,
                        apex_time_index: Some(apex),
                    }
                }
                None => TemporalScore::INSUFFICIENT,
            },
            ScoringStrategy::TemporalCosine => self.temporal_cosine(library, matrix, lo, hi, false),
            ScoringStrategy::WeightedTemporalCosineWithTransform => {
                self.temporal_cosine(library, matrix, lo, hi, true)
            }
        }
    }

    fn temporal_cosine(
        &self,
        library: &[f32],
        matrix: &XicMatrix,
        lo: usize,
        hi: usize,
        weighted: bool,
    ) -> TemporalScore {
        let mut raw_sum = 0.0f32;
        let mut sharpened_sum = 0.0f32;
        let mut weight_sum = 0.0f32;
        let mut used = 0;
        let mut apex = None;
        let mut apex_total = 0.0f32;

        for t in lo..=hi {
            let row = matrix.row(t);
            let (active, total) = row
                .iter()
                .filter(|&&x| x > 0.0)
                .fold((0usize, 0.0f32), |(n, sum), x| (n + 1, sum + x));
            if total > apex_total {
                apex_total = total;
                apex = Some(t);
            }
            if active < self.min_active_fragments || total <= 0.0 {
                continue;
            }
            let cosine = cosine_active_fragments(library, row);
            if cosine.is_nan() {
                continue;
            }
            let weight = if weighted { total.sqrt() } else { 1.0 };
            let sharpened = if weighted {
                cosine.max(0.0).powf(self.nonlinear_power)
            } else {
                cosine
            };
            raw_sum += weight * cosine;
            sharpened_sum += weight * sharpened;
            weight_sum += weight;
            used += 1;
        }

        if used == 0 || weight_sum <= 0.0 {
            return TemporalScore {
                apex_time_index: apex,
                ..TemporalScore::INSUFFICIENT
            };
        }
        TemporalScore {
            dot_product_score: sharpened_sum / weight_sum,
            raw_cosine: raw_sum / weight_sum,
            time_points_used: used,
            apex_time_index: apex,
        }
    }
}
