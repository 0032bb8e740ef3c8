//! Assembly of per-precursor search results from extracted XICs

use crate::calibration::RtCalibrationModel;
use crate::extraction::ExtractionResult;
use crate::library::LibraryPrecursor;
use crate::peak_group::{self, PeakGroup};
use crate::query::{GenerationResult, PrecursorQueryGroup, QueryParameters};
use crate::scoring::{
    apex_score, cosine_active_fragments, fragment_correlations, spectral_angle, TemporalScorer,
    XicMatrix,
};
use rayon::prelude::*;
use serde::Serialize;

/// Scores and evidence for a single library precursor.
///
/// Created by [`assemble_results`]; `classifier_score` and `q_value` are
/// filled in by the FDR stage.
#[derive(Clone, Debug, Serialize)]
pub struct DiaSearchResult {
    pub sequence: String,
    pub charge: u8,
    pub precursor_mz: f32,
    pub decoy: bool,
    /// Index of the precursor in the library slice
    pub precursor_index: usize,
    pub window_id: usize,
    pub rt_window_start: f32,
    pub rt_window_end: f32,

    pub fragments_queried: usize,
    pub fragments_detected: usize,
    pub extracted_intensities: Vec<f32>,
    pub xic_point_counts: Vec<usize>,
    pub library_intensities: Vec<f32>,

    /// Primary score, as computed by the configured scoring strategy
    pub dot_product_score: f32,
    pub raw_cosine: f32,
    pub apex_score: f32,
    pub temporal_score: f32,
    pub spectral_angle: f32,
    pub mean_fragment_correlation: f32,
    pub min_fragment_correlation: f32,

    pub peak_apex_score: f32,
    pub peak_temporal_score: f32,
    pub peak_mean_fragment_correlation: f32,
    pub peak_min_fragment_correlation: f32,
    pub peak_group: PeakGroup,

    pub time_points_used: usize,
    pub apex_time_index: Option<usize>,
    /// Library retention time in minutes, either given directly or predicted
    /// from iRT through the calibration model
    pub library_rt: Option<f32>,
    pub observed_apex_rt: Option<f32>,

    pub classifier_score: f32,
    pub q_value: f32,
}

impl Default for DiaSearchResult {
    fn default() -> Self {
        DiaSearchResult {
            sequence: String::new(),
            charge: 0,
            precursor_mz: 0.0,
            decoy: false,
            precursor_index: 0,
            window_id: 0,
            rt_window_start: 0.0,
            rt_window_end: 0.0,
            fragments_queried: 0,
            fragments_detected: 0,
            extracted_intensities: Vec::new(),
            xic_point_counts: Vec::new(),
            library_intensities: Vec::new(),
            dot_product_score: f32::NAN,
            raw_cosine: f32::NAN,
            apex_score: f32::NAN,
            temporal_score: f32::NAN,
            spectral_angle: f32::NAN,
            mean_fragment_correlation: f32::NAN,
            min_fragment_correlation: f32::NAN,
            peak_apex_score: f32::NAN,
            peak_temporal_score: f32::NAN,
            peak_mean_fragment_correlation: f32::NAN,
            peak_min_fragment_correlation: f32::NAN,
            peak_group: PeakGroup::NONE,
            time_points_used: 0,
            apex_time_index: None,
            library_rt: None,
            observed_apex_rt: None,
            classifier_score: f32::NAN,
            q_value: 1.0,
        }
    }
}

impl DiaSearchResult {
    fn new(
        precursor: &LibraryPrecursor,
        group: &PrecursorQueryGroup,
        library_rt: Option<f32>,
    ) -> Self {
        let n = group.query_count;
        DiaSearchResult {
            sequence: precursor.sequence.clone(),
            charge: precursor.charge,
            precursor_mz: precursor.precursor_mz,
            decoy: precursor.decoy,
            precursor_index: group.input_index,
            window_id: group.window_id,
            rt_window_start: group.rt_min,
            rt_window_end: group.rt_max,
            fragments_queried: n,
            extracted_intensities: vec![0.0; n],
            xic_point_counts: vec![0; n],
            library_intensities: precursor.fragment_intensity[..n].to_vec(),
            library_rt,
            ..Default::default()
        }
    }

    pub fn total_intensity(&self) -> f32 {
        self.extracted_intensities.iter().sum()
    }

    /// Best of the apex and temporal scores, ignoring NaN
    pub fn best_score(&self) -> f32 {
        match (self.apex_score.is_nan(), self.temporal_score.is_nan()) {
            (true, true) => f32::NAN,
            _ => self.apex_score.max(self.temporal_score),
        }
    }
}

fn library_rt(
    precursor: &LibraryPrecursor,
    calibration: Option<&RtCalibrationModel>,
) -> Option<f32> {
    precursor.rt.filter(|rt| rt.is_finite()).or_else(|| {
        let model = calibration?;
        let irt = precursor.irt.filter(|irt| irt.is_finite())?;
        Some(model.to_minutes(irt as f64) as f32)
    })
}

fn assemble_group(
    precursor: &LibraryPrecursor,
    group: &PrecursorQueryGroup,
    extraction: &ExtractionResult,
    parameters: &QueryParameters,
    scorer: &TemporalScorer,
    calibration: Option<&RtCalibrationModel>,
) -> Option<DiaSearchResult> {
    let mut result = DiaSearchResult::new(precursor, group, library_rt(precursor, calibration));
    let queries = group.query_offset..group.query_offset + group.query_count;

    for (f, q) in queries.clone().enumerate() {
        let xic = &extraction.results[q];
        result.extracted_intensities[f] = xic.total_intensity;
        result.xic_point_counts[f] = xic.data_point_count;
    }
    result.fragments_detected = result.xic_point_counts.iter().filter(|&&n| n > 0).count();
    if result.fragments_detected < parameters.min_fragments_required {
        return None;
    }

    // Reference fragment: the most complete XIC
    let reference = match queries
        .clone()
        .max_by(|&a, &b| {
            extraction.results[a]
                .data_point_count
                .cmp(&extraction.results[b].data_point_count)
                .then(b.cmp(&a))
        })
        .filter(|&q| extraction.results[q].data_point_count > 0)
    {
        Some(q) => q,
        None => return Some(result),
    };

    let xics = queries
        .map(|q| (extraction.rts(q), extraction.intensities(q)))
        .collect::<Vec<_>>();
    let matrix = XicMatrix::align(extraction.rts(reference), &xics);
    let library = &result.library_intensities;
    let last = matrix.time_points() - 1;

    let peak = peak_group::detect(&matrix, library);

    let (apex, apex_index) = apex_score(library, &matrix, 0, last);
    result.apex_score = apex;
    result.apex_time_index = apex_index;
    result.observed_apex_rt = apex_index.map(|t| matrix.rt(t));

    let temporal = scorer.score(library, &matrix);
    result.dot_product_score = temporal.dot_product_score;
    result.raw_cosine = temporal.raw_cosine;
    result.temporal_score = temporal.dot_product_score;
    result.time_points_used = temporal.time_points_used;

    let (mean, min) = fragment_correlations(&matrix, 0, last);
    result.mean_fragment_correlation = mean;
    result.min_fragment_correlation = min;

    if peak.is_valid {
        let (left, right) = (peak.left_index, peak.right_index);
        result.peak_apex_score = cosine_active_fragments(library, matrix.row(peak.apex_index));
        result.observed_apex_rt = Some(peak.apex_rt);
        result.peak_temporal_score = scorer
            .score_range(library, &matrix, left, right)
            .dot_product_score;
        let (mean, min) = fragment_correlations(&matrix, left, right);
        result.peak_mean_fragment_correlation = mean;
        result.peak_min_fragment_correlation = min;
    } else {
        result.peak_apex_score = result.apex_score;
        result.peak_temporal_score = result.temporal_score;
        result.peak_mean_fragment_correlation = result.mean_fragment_correlation;
        result.peak_min_fragment_correlation = result.min_fragment_correlation;
    }
    result.peak_group = peak;
    result.spectral_angle = spectral_angle(result.raw_cosine);

    if !result.dot_product_score.is_nan()
        && result.dot_product_score < parameters.min_score_threshold
    {
        return None;
    }
    Some(result)
}

/// Build one [`DiaSearchResult`] per query group, in group order. Groups with
/// fewer than `min_fragments_required` detected fragments, or scoring below
/// `min_score_threshold`, are dropped.
///
/// # Panics
///
/// * Panics if `extraction` does not hold one result per generated query
pub fn assemble_results(
    precursors: &[LibraryPrecursor],
    generation: &GenerationResult,
    extraction: &ExtractionResult,
    parameters: &QueryParameters,
    calibration: Option<&RtCalibrationModel>,
) -> Vec<DiaSearchResult> {
    assert_eq!(
        generation.queries.len(),
        extraction.results.len(),
        "extraction does not match generated queries"
    );
    let scorer = TemporalScorer::new(parameters.scoring_strategy, parameters.nonlinear_power);

    let results = generation
        .groups
        .par_iter()
        .filter_map(|group| {
            assemble_group(
                &precursors[group.input_index],
                group,
                extraction,
                parameters,
                &scorer,
                calibration,
            )
        })
        .collect::<Vec<_>>();

    log::info!(
        "- assembled {} results from {} precursor groups",
        results.len(),
        generation.groups.len()
    );
    results
}
