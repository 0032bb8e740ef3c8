//! Chromatographic peak group detection
//!
//! Fragment XICs are collapsed into a single library-weighted composite
//! trace, smoothed, and searched for local maxima. Each candidate apex is
//! extended outwards to its boundaries, and the candidate integrating the
//! most signal wins.

use crate::scoring::XicMatrix;
use serde::Serialize;

/// Boundary walk stops once the smoothed trace drops below this fraction of
/// the apex height
const BOUNDARY_FRACTION: f32 = 0.05;
const MIN_CANDIDATE_FRACTION: f32 = 0.10;
const MIN_PEAK_SCANS: usize = 3;
const SMOOTH_HALF_WIDTH: usize = 2;
const MAX_CANDIDATES: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PeakGroup {
    pub apex_index: usize,
    pub apex_rt: f32,
    pub left_index: usize,
    pub right_index: usize,
    pub left_rt: f32,
    pub right_rt: f32,
    /// Right RT - left RT, in minutes
    pub width: f32,
    /// Relative apex position within the peak; 0.5 is perfectly centered
    pub symmetry: f32,
    pub scan_count: usize,
    pub total_signal: f32,
    pub candidate_count: usize,
    pub is_valid: bool,
}

impl Default for PeakGroup {
    fn default() -> Self {
        PeakGroup::NONE
    }
}

impl PeakGroup {
    pub const NONE: PeakGroup = PeakGroup {
        apex_index: 0,
        apex_rt: 0.0,
        left_index: 0,
        right_index: 0,
        left_rt: 0.0,
        right_rt: 0.0,
        width: 0.0,
        symmetry: 0.0,
        scan_count: 0,
        total_signal: 0.0,
        candidate_count: 0,
        is_valid: false,
    };
}

fn smooth(input: &[f32], half_width: usize) -> Vec<f32> {
    let n = input.len();
    (0..n)
        .map(|t| {
            let lo = t.saturating_sub(half_width);
            let hi = (t + half_width).min(n - 1);
            input[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32
        })
        .collect()
}

/// Library-weighted sum of positive observations at every time point
fn composite(matrix: &XicMatrix, library: &[f32]) -> Vec<f32> {
    let fragments = matrix.fragments();
    let norm = library
        .iter()
        .take(fragments)
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    let norm = if norm > 0.0 { norm } else { 1.0 };

    (0..matrix.time_points())
        .map(|t| {
            matrix
                .row(t)
                .iter()
                .enumerate()
                .filter(|(_, obs)| **obs > 0.0)
                .map(|(f, obs)| {
                    let weight = match library.get(f) {
                        Some(lib) => lib / norm,
                        None => 1.0 / fragments as f32,
                    };
                    obs * weight
                })
                .sum()
        })
        .collect()
}

/// Detect the dominant co-eluting peak group, returning [`PeakGroup::NONE`]
/// when there is no peak spanning at least three time points
pub fn detect(matrix: &XicMatrix, library: &[f32]) -> PeakGroup {
    let n = matrix.time_points();
    if n < MIN_PEAK_SCANS || matrix.fragments() < 2 {
        return PeakGroup::NONE;
    }

    let raw = composite(matrix, library);
    let smoothed = smooth(&raw, SMOOTH_HALF_WIDTH);

    let global_max = smoothed.iter().copied().fold(0.0f32, f32::max);
    if global_max <= 0.0 {
        return PeakGroup::NONE;
    }
    let min_height = global_max * MIN_CANDIDATE_FRACTION;

    // Local maxima, ignoring the interior of flat plateaus
    let mut candidates = (1..n - 1)
        .filter(|&t| {
            let (prev, here, next) = (smoothed[t - 1], smoothed[t], smoothed[t + 1]);
            here >= min_height && here >= prev && here >= next && (here > prev || here > next)
        })
        .take(MAX_CANDIDATES)
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        let mut apex = 0;
        for t in 1..n {
            if smoothed[t] > smoothed[apex] {
                apex = t;
            }
        }
        candidates.push(apex);
    }

    let mut best = PeakGroup::NONE;
    let mut best_signal = f32::MIN;
    for &apex in &candidates {
        let threshold = smoothed[apex] * BOUNDARY_FRACTION;

        let mut left = apex;
        for t in (0..apex).rev() {
            if smoothed[t] < threshold {
                break;
            }
            left = t;
            if t > 0 && smoothed[t] <= smoothed[t - 1] && smoothed[t] < smoothed[t + 1] {
                break;
            }
        }

        let mut right = apex;
        for t in apex + 1..n {
            if smoothed[t] < threshold {
                break;
            }
            right = t;
            if t < n - 1 && smoothed[t] <= smoothed[t + 1] && smoothed[t] < smoothed[t - 1] {
                break;
            }
        }

        let scan_count = right - left + 1;
        if scan_count < MIN_PEAK_SCANS {
            continue;
        }

        let total_signal = raw[left..=right].iter().sum::<f32>();
        if total_signal > best_signal {
            best_signal = total_signal;
            let (apex_rt, left_rt, right_rt) = (matrix.rt(apex), matrix.rt(left), matrix.rt(right));
            let width = right_rt - left_rt;
            best = PeakGroup {
                apex_index: apex,
                apex_rt,
                left_index: left,
                right_index: right,
                left_rt,
                right_rt,
                width,
                symmetry: if width > 0.0 {
                    (apex_rt - left_rt) / width
                } else {
                    0.5
                },
                scan_count,
                total_signal,
                candidate_count: candidates.len(),
                is_valid: true,
            };
        }
    }
    best
}
