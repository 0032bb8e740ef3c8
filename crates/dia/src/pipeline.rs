//! End-to-end driver: index, calibrate, generate, extract, score and
//! estimate FDR

use crate::calibration::{self, FitOptions, RtCalibrationModel};
use crate::extraction::{ExtractionOrchestrator, ExtractorFactory};
use crate::fdr::{FdrEngine, FdrOptions, FdrResult};
use crate::features::{compute_features, FeatureVector};
use crate::library::{IrtLibraryIndex, LibraryPrecursor};
use crate::query::{self, GenerationResult, QueryParameters};
use crate::result::{assemble_results, DiaSearchResult};
use crate::scan_index::ScanIndex;
use crate::spectrum::Ms2Scan;
use crate::Error;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParameters {
    pub fit: FitOptions,
    /// Half-width, in iRT units, of the broad first-pass extraction window
    pub initial_irt_window: f64,
    /// Only targets with an apex score at least this high become anchors
    pub min_anchor_score: f32,
    pub max_anchors: usize,
    /// Lower bound on the fitted residual sigma, so that calibrated windows
    /// always span a few scans
    pub min_sigma_minutes: f64,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        CalibrationParameters {
            fit: FitOptions::default(),
            initial_irt_window: 20.0,
            min_anchor_score: 0.5,
            max_anchors: 2000,
            min_sigma_minutes: 0.1,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub query: QueryParameters,
    /// iRT calibration; disabled if `None`
    pub calibration: Option<CalibrationParameters>,
    pub fdr: FdrOptions,
}

pub struct PipelineOutput {
    pub results: Vec<DiaSearchResult>,
    /// `features[i]` describes `results[i]`
    pub features: Vec<FeatureVector>,
    /// `None` if FDR estimation was not possible, e.g. without decoys
    pub fdr: Option<FdrResult>,
    pub calibration: Option<RtCalibrationModel>,
    pub skipped_no_window: usize,
    pub skipped_no_fragments: usize,
    pub skipped_duplicate: usize,
}

fn extract_and_assemble(
    index: &ScanIndex,
    precursors: &[LibraryPrecursor],
    generation: &GenerationResult,
    parameters: &QueryParameters,
    calibration: Option<&RtCalibrationModel>,
) -> Result<Vec<DiaSearchResult>, Error> {
    let extraction = ExtractionOrchestrator::new(index, parameters.prefer_cpu)
        .extract_all(&generation.queries, parameters.max_threads)?;
    Ok(assemble_results(
        precursors,
        generation,
        &extraction,
        parameters,
        calibration,
    ))
}

/// Fit an iRT -> RT calibration from a broad first pass over the library.
///
/// Returns `Ok(None)` if the library has no iRT values, too few anchors are
/// found, or the fitted model is not reliable; callers then keep using fixed
/// RT windows.
pub fn calibrate(
    index: &ScanIndex,
    precursors: &[LibraryPrecursor],
    query: &QueryParameters,
    parameters: &CalibrationParameters,
) -> Result<Option<RtCalibrationModel>, Error> {
    let irt_index = IrtLibraryIndex::new(precursors);
    if irt_index.is_empty() {
        log::warn!("- no library precursors carry an iRT, skipping calibration");
        return Ok(None);
    }

    let provisional = RtCalibrationModel::provisional(
        index.global_rt_min() as f64,
        index.global_rt_max() as f64,
        irt_index.min_irt() as f64,
        irt_index.max_irt() as f64,
        parameters.initial_irt_window,
    );
    log::debug!("- provisional calibration: {}", provisional);

    let generation = query::generate_calibrated(precursors, index, query, &provisional);
    let results = extract_and_assemble(index, precursors, &generation, query, Some(&provisional))?;

    let mut anchors = results
        .iter()
        .filter(|r| !r.decoy && r.apex_score >= parameters.min_anchor_score)
        .filter_map(|r| {
            let irt = precursors[r.precursor_index].irt.filter(|x| x.is_finite())?;
            let observed = r.observed_apex_rt.filter(|x| x.is_finite())?;
            Some((r.apex_score, irt as f64, observed as f64))
        })
        .collect::<Vec<_>>();
    anchors.sort_by(|a, b| b.0.total_cmp(&a.0));
    anchors.truncate(parameters.max_anchors);

    let (irts, rts): (Vec<f64>, Vec<f64>) = anchors.iter().map(|(_, x, y)| (*x, *y)).unzip();
    let model = match calibration::fit(&irts, &rts, &parameters.fit)? {
        Some(model) => model,
        None => return Ok(None),
    };
    if !model.is_reliable() {
        log::warn!("- calibration is not reliable, using fixed RT windows: {}", model);
        return Ok(None);
    }

    let model = match model.sigma_minutes < parameters.min_sigma_minutes {
        true => RtCalibrationModel::new(
            model.slope,
            model.intercept,
            parameters.min_sigma_minutes,
            model.r_squared,
            model.anchor_count,
        )?,
        false => model,
    };
    log::info!("- calibration: {}", model);
    Ok(Some(model))
}

pub struct Pipeline;

impl Pipeline {
    pub fn run(
        scans: &[Ms2Scan],
        precursors: &[LibraryPrecursor],
        parameters: &Parameters,
    ) -> Result<PipelineOutput, Error> {
        let start = Instant::now();
        let query = &parameters.query;

        let index = ScanIndex::build(scans);
        log::debug!("- indexing: {:?}", start.elapsed());
        log::info!(
            "- extraction backend: {}",
            ExtractorFactory::describe_backend(query.prefer_cpu)
        );

        let calibration = match &parameters.calibration {
            Some(options) => {
                let start = Instant::now();
                let model = calibrate(&index, precursors, query, options)?;
                log::debug!("- calibration: {:?}", start.elapsed());
                model
            }
            None => None,
        };

        let start_search = Instant::now();
        let generation = match &calibration {
            Some(model) => query::generate_calibrated(precursors, &index, query, model),
            None => query::generate(precursors, &index, query),
        };

        let mut results =
            extract_and_assemble(&index, precursors, &generation, query, calibration.as_ref())?;
        index.release();
        log::debug!("- search: {:?}", start_search.elapsed());

        let features = results
            .par_iter()
            .map(|r| compute_features(r, r.precursor_index))
            .collect::<Vec<_>>();

        let fdr = match results.is_empty() {
            true => {
                log::warn!("- no precursors were scored");
                None
            }
            false => match FdrEngine::run(&mut results, &features, &parameters.fdr) {
                Ok(fdr) => Some(fdr),
                Err(Error::Fdr(msg)) => {
                    log::warn!("- skipping FDR estimation: {}", msg);
                    None
                }
                Err(e) => return Err(e),
            },
        };

        log::debug!("- total: {:?}", start.elapsed());
        Ok(PipelineOutput {
            results,
            features,
            fdr,
            calibration,
            skipped_no_window: generation.skipped_no_window,
            skipped_no_fragments: generation.skipped_no_fragments,
            skipped_duplicate: generation.skipped_duplicate,
        })
    }
}
