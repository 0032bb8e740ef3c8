//! Translation of library precursors into per-fragment extraction queries

use crate::calibration::RtCalibrationModel;
use crate::library::LibraryPrecursor;
use crate::mass::Tolerance;
use crate::scan_index::ScanIndex;
use crate::scoring::ScoringStrategy;
use fnv::FnvHashSet;
use serde::{Deserialize, Serialize};

/// A single XIC extraction: sum the intensity of peaks within
/// `target_mz ± tolerance_ppm` in every scan of `window_id` acquired between
/// `rt_min` and `rt_max`
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct FragmentQuery {
    pub target_mz: f32,
    pub tolerance_ppm: f32,
    pub rt_min: f32,
    pub rt_max: f32,
    pub window_id: usize,
    pub query_id: usize,
}

impl FragmentQuery {
    pub fn mz_bounds(&self) -> (f32, f32) {
        Tolerance::symmetric_ppm(self.tolerance_ppm).bounds(self.target_mz)
    }
}

/// Contiguous block of queries generated for one precursor
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PrecursorQueryGroup {
    /// Index into the precursor slice passed to the generator
    pub input_index: usize,
    pub query_offset: usize,
    pub query_count: usize,
    pub window_id: usize,
    pub rt_min: f32,
    pub rt_max: f32,
}

#[derive(Default, Debug)]
pub struct GenerationResult {
    pub queries: Vec<FragmentQuery>,
    pub groups: Vec<PrecursorQueryGroup>,
    pub skipped_no_window: usize,
    pub skipped_no_fragments: usize,
    /// Same sequence, charge and decoy status as an earlier precursor
    pub skipped_duplicate: usize,
}

impl GenerationResult {
    pub fn skipped(&self) -> usize {
        self.skipped_no_window + self.skipped_no_fragments + self.skipped_duplicate
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct QueryParameters {
    /// Symmetric fragment tolerance
    pub ppm_tolerance: f32,
    /// Half-width of the fixed (uncalibrated) RT extraction window
    pub rt_tolerance_minutes: f32,
    pub min_fragments_required: usize,
    pub min_score_threshold: f32,
    /// Worker threads for extraction; <= 0 uses every core
    pub max_threads: i32,
    pub prefer_cpu: bool,
    /// `k` in `k * sigma` half-width for calibrated windows
    pub calibrated_window_sigma_multiplier: f32,
    pub scoring_strategy: ScoringStrategy,
    pub nonlinear_power: f32,
}

impl Default for QueryParameters {
    fn default() -> Self {
        QueryParameters {
            ppm_tolerance: 20.0,
            rt_tolerance_minutes: 5.0,
            min_fragments_required: 3,
            min_score_threshold: 0.0,
            max_threads: -1,
            prefer_cpu: true,
            calibrated_window_sigma_multiplier: 3.0,
            scoring_strategy: ScoringStrategy::TemporalCosine,
            nonlinear_power: 3.0,
        }
    }
}

/// Generate queries with a fixed `library_rt ± rt_tolerance_minutes` window.
/// Precursors without a library RT are extracted over the whole run.
pub fn generate(
    precursors: &[LibraryPrecursor],
    index: &ScanIndex,
    parameters: &QueryParameters,
) -> GenerationResult {
    let run = (index.global_rt_min(), index.global_rt_max());
    let tolerance = parameters.rt_tolerance_minutes.abs();
    build(precursors, index, parameters, |precursor| {
        match precursor.rt.filter(|rt| rt.is_finite()) {
            Some(rt) => (rt - tolerance, rt + tolerance),
            None => run,
        }
    })
}

/// Generate queries whose RT windows are centered on the calibrated
/// prediction `slope * irt + intercept`, with half-width `k * sigma_minutes`.
/// Precursors without an iRT are mapped through the model from their library
/// RT instead.
pub fn generate_calibrated(
    precursors: &[LibraryPrecursor],
    index: &ScanIndex,
    parameters: &QueryParameters,
    model: &RtCalibrationModel,
) -> GenerationResult {
    let run = (index.global_rt_min(), index.global_rt_max());
    let half_width = model
        .minutes_window_half_width(parameters.calibrated_window_sigma_multiplier as f64)
        .abs() as f32;

    build(precursors, index, parameters, |precursor| {
        let center = precursor
            .irt
            .filter(|irt| irt.is_finite())
            .map(|irt| model.to_minutes(irt as f64) as f32)
            .or_else(|| {
                precursor
                    .rt
                    .filter(|rt| rt.is_finite())
                    .map(|rt| model.to_minutes(rt as f64) as f32)
            });
        match center {
            Some(center) => (center - half_width, center + half_width),
            None => run,
        }
    })
}

fn build<F>(
    precursors: &[LibraryPrecursor],
    index: &ScanIndex,
    parameters: &QueryParameters,
    rt_window: F,
) -> GenerationResult
where
    F: Fn(&LibraryPrecursor) -> (f32, f32),
{
    let mut result = GenerationResult::default();
    let mut seen = FnvHashSet::default();

    // First pass: resolve windows and count queries, so the output is
    // allocated exactly once
    let mut resolved = Vec::with_capacity(precursors.len());
    let mut total = 0;
    for (ix, precursor) in precursors.iter().enumerate() {
        if precursor.fragment_count() == 0 {
            result.skipped_no_fragments += 1;
            continue;
        }
        let window = match index.find_window(precursor.precursor_mz) {
            Some(window) => window,
            None => {
                result.skipped_no_window += 1;
                continue;
            }
        };
        if !seen.insert((precursor.sequence.as_str(), precursor.charge, precursor.decoy)) {
            result.skipped_duplicate += 1;
            continue;
        }
        total += precursor.fragment_count();
        resolved.push((ix, window));
    }

    result.queries.reserve_exact(total);
    result.groups.reserve_exact(resolved.len());

    for (ix, window_id) in resolved {
        let precursor = &precursors[ix];
        let (rt_min, rt_max) = rt_window(precursor);
        let query_offset = result.queries.len();
        for &target_mz in &precursor.fragment_mz[..precursor.fragment_count()] {
            result.queries.push(FragmentQuery {
                target_mz,
                tolerance_ppm: parameters.ppm_tolerance.abs(),
                rt_min,
                rt_max,
                window_id,
                query_id: result.queries.len(),
            });
        }
        result.groups.push(PrecursorQueryGroup {
            input_index: ix,
            query_offset,
            query_count: result.queries.len() - query_offset,
            window_id,
            rt_min,
            rt_max,
        });
    }

    log::info!(
        "- generated {} fragment queries for {} precursors",
        result.queries.len(),
        result.groups.len()
    );
    if result.skipped() > 0 {
        log::info!(
            "- skipped precursors: {} without isolation window, {} without fragments, \
             {} duplicates",
            result.skipped_no_window,
            result.skipped_no_fragments,
            result.skipped_duplicate
        );
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::Ms2Scan;

    fn index() -> ScanIndex {
        let scans = (0..20)
            .flat_map(|i| {
                [
                    Ms2Scan::new(2 * i, i as f32, 512.5, 25.0, vec![200.0], vec![1.0]),
                    Ms2Scan::new(2 * i + 1, i as f32, 537.5, 25.0, vec![200.0], vec![1.0]),
                ]
            })
            .collect::<Vec<_>>();
        ScanIndex::build(&scans)
    }

    fn precursor(
        seq: &str,
        mz: f32,
        rt: Option<f32>,
        irt: Option<f32>,
        n: usize,
    ) -> LibraryPrecursor {
        LibraryPrecursor {
            sequence: seq.into(),
            precursor_mz: mz,
            charge: 2,
            rt,
            irt,
            decoy: false,
            fragment_mz: (0..n).map(|i| 200.0 + i as f32 * 100.0).collect(),
            fragment_intensity: vec![1.0; n],
        }
    }

    #[test]
    fn fixed_windows_and_skips() {
        let index = index();
        let precursors = vec![
            precursor("AAAK", 505.0, Some(10.0), None, 3),
            precursor("CCCK", 900.0, Some(10.0), None, 3),
            precursor("DDDK", 530.0, None, None, 4),
            precursor("EEEK", 530.0, Some(2.0), None, 0),
            precursor("AAAK", 505.0, Some(10.0), None, 3),
        ];
        let params = QueryParameters {
            rt_tolerance_minutes: 2.5,
            ppm_tolerance: 10.0,
            ..Default::default()
        };
        let result = generate(&precursors, &index, &params);

        assert_eq!(result.skipped_no_window, 1);
        assert_eq!(result.skipped_no_fragments, 1);
        assert_eq!(result.skipped_duplicate, 1);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.queries.len(), 7);

        let first = result.groups[0];
        assert_eq!((first.input_index, first.query_offset, first.query_count), (0, 0, 3));
        assert_eq!(first.window_id, 0);
        assert_eq!((first.rt_min, first.rt_max), (7.5, 12.5));

        let second = result.groups[1];
        assert_eq!(second.input_index, 2);
        assert_eq!(second.window_id, 1);
        assert_eq!((second.rt_min, second.rt_max), (0.0, 19.0));

        for (ix, query) in result.queries.iter().enumerate() {
            assert_eq!(query.query_id, ix);
            assert_eq!(query.tolerance_ppm, 10.0);
        }
        assert_eq!(result.queries[3].target_mz, 200.0);
        assert_eq!(result.queries[3].window_id, 1);
    }

    #[test]
    fn calibrated_windows() {
        let index = index();
        let model = RtCalibrationModel::new(0.5, 2.0, 0.4, 0.99, 100).unwrap();
        let precursors = vec![
            precursor("AAAK", 505.0, Some(3.0), Some(10.0), 3),
            precursor("CCCK", 505.0, Some(3.0), None, 3),
            precursor("DDDK", 505.0, None, None, 3),
            precursor("EEEK", 505.0, Some(10.0), None, 3),
        ];
        let params = QueryParameters {
            calibrated_window_sigma_multiplier: 2.5,
            ..Default::default()
        };
        let result = generate_calibrated(&precursors, &index, &params, &model);
        assert_eq!(result.groups.len(), 4);

        // iRT 10 -> 0.5 * 10 + 2 = 7, half-width 2.5 * 0.4 = 1
        let g = result.groups[0];
        assert!((g.rt_min - 6.0).abs() < 1E-5 && (g.rt_max - 8.0).abs() < 1E-5);
        // library RT 3 -> 0.5 * 3 + 2 = 3.5
        let g = result.groups[1];
        assert!((g.rt_min - 2.5).abs() < 1E-5 && (g.rt_max - 4.5).abs() < 1E-5);
        let g = result.groups[2];
        assert_eq!((g.rt_min, g.rt_max), (0.0, 19.0));
        // library RT 10 is mapped through the model, not used as-is
        let g = result.groups[3];
        assert!((g.rt_min - 6.0).abs() < 1E-5 && (g.rt_max - 8.0).abs() < 1E-5);
    }

    #[test]
    fn query_mz_bounds() {
        let query = FragmentQuery {
            target_mz: 500.0,
            tolerance_ppm: 10.0,
            rt_min: 0.0,
            rt_max: 1.0,
            window_id: 0,
            query_id: 0,
        };
        let (lo, hi) = query.mz_bounds();
        assert!((lo - 499.995).abs() < 1E-4);
        assert!((hi - 500.005).abs() < 1E-4);
    }
}
