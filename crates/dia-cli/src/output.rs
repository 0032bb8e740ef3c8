use crate::runner::Runner;
use anyhow::Context;
use dia_core::calibration::RtCalibrationModel;
use dia_core::fdr::IterationDiagnostics;
use dia_core::features::{FeatureVector, FEATURE_NAMES};
use dia_core::result::DiaSearchResult;
use rayon::prelude::*;
use std::path::Path;

const RESULT_HEADERS: [&str; 23] = [
    "sequence",
    "charge",
    "precursor_mz",
    "label",
    "window_id",
    "rt_window_start",
    "rt_window_end",
    "library_rt",
    "observed_apex_rt",
    "fragments_queried",
    "fragments_detected",
    "dot_product_score",
    "raw_cosine",
    "peak_apex_score",
    "peak_temporal_score",
    "peak_valid",
    "peak_apex_rt",
    "peak_left_rt",
    "peak_right_rt",
    "peak_width",
    "peak_symmetry",
    "classifier_score",
    "q_value",
];

const ITERATION_HEADERS: [&str; 17] = [
    "iteration",
    "positives",
    "negatives",
    "target_mean",
    "target_median",
    "target_q25",
    "target_q75",
    "decoy_mean",
    "decoy_median",
    "decoy_q25",
    "decoy_q75",
    "separation",
    "auc",
    "ids_at_1pct",
    "weight_change",
    "bias",
    "weights",
];

fn write_bytes(path: &Path, bytes: Vec<u8>) -> anyhow::Result<String> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write `{}`", path.display()))?;
    Ok(path.display().to_string())
}

fn optional(x: Option<f32>) -> f32 {
    x.unwrap_or(f32::NAN)
}

impl Runner {
    pub fn serialize_result(
        &self,
        result: &DiaSearchResult,
        features: &FeatureVector,
    ) -> csv::ByteRecord {
        let peak = &result.peak_group;
        let mut record = csv::ByteRecord::new();
        record.push_field(result.sequence.as_bytes());
        record.push_field(itoa::Buffer::new().format(result.charge).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.precursor_mz).as_bytes());
        record.push_field(if result.decoy { b"-1".as_slice() } else { b"1".as_slice() });
        record.push_field(itoa::Buffer::new().format(result.window_id).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.rt_window_start).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.rt_window_end).as_bytes());
        record.push_field(ryu::Buffer::new().format(optional(result.library_rt)).as_bytes());
        record.push_field(
            ryu::Buffer::new()
                .format(optional(result.observed_apex_rt))
                .as_bytes(),
        );
        record.push_field(itoa::Buffer::new().format(result.fragments_queried).as_bytes());
        record.push_field(itoa::Buffer::new().format(result.fragments_detected).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.dot_product_score).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.raw_cosine).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.peak_apex_score).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.peak_temporal_score).as_bytes());
        record.push_field(itoa::Buffer::new().format(peak.is_valid as u8).as_bytes());
        record.push_field(ryu::Buffer::new().format(peak.apex_rt).as_bytes());
        record.push_field(ryu::Buffer::new().format(peak.left_rt).as_bytes());
        record.push_field(ryu::Buffer::new().format(peak.right_rt).as_bytes());
        record.push_field(ryu::Buffer::new().format(peak.width).as_bytes());
        record.push_field(ryu::Buffer::new().format(peak.symmetry).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.classifier_score).as_bytes());
        record.push_field(ryu::Buffer::new().format(result.q_value).as_bytes());
        for x in features.to_array() {
            record.push_field(ryu::Buffer::new().format(x).as_bytes());
        }
        record
    }

    /// One row per scored precursor, followed by its classifier features
    pub fn write_results(
        &self,
        results: &[DiaSearchResult],
        features: &[FeatureVector],
    ) -> anyhow::Result<String> {
        let path = self.make_path("results.dia.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(RESULT_HEADERS.to_vec());
        headers.extend(FEATURE_NAMES);
        wtr.write_byte_record(&headers)?;

        for record in results
            .par_iter()
            .zip(features)
            .map(|(result, features)| self.serialize_result(result, features))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        write_bytes(&path, bytes)
    }

    pub fn write_fdr_iterations(
        &self,
        diagnostics: &[IterationDiagnostics],
    ) -> anyhow::Result<String> {
        let path = self.make_path("fdr_iterations.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);
        wtr.write_byte_record(&csv::ByteRecord::from(ITERATION_HEADERS.to_vec()))?;

        for diag in diagnostics {
            let mut record = csv::ByteRecord::new();
            record.push_field(itoa::Buffer::new().format(diag.iteration).as_bytes());
            record.push_field(itoa::Buffer::new().format(diag.positives).as_bytes());
            record.push_field(itoa::Buffer::new().format(diag.negatives).as_bytes());
            for x in [
                diag.target_mean,
                diag.target_median,
                diag.target_q25,
                diag.target_q75,
                diag.decoy_mean,
                diag.decoy_median,
                diag.decoy_q25,
                diag.decoy_q75,
                diag.separation,
                diag.auc,
            ] {
                record.push_field(ryu::Buffer::new().format(x).as_bytes());
            }
            record.push_field(itoa::Buffer::new().format(diag.ids_at_1pct).as_bytes());
            record.push_field(ryu::Buffer::new().format(diag.weight_change).as_bytes());
            record.push_field(ryu::Buffer::new().format(diag.bias).as_bytes());
            let weights = diag
                .weights
                .iter()
                .map(|w| ryu::Buffer::new().format(*w).to_string())
                .collect::<Vec<_>>()
                .join(";");
            record.push_field(weights.as_bytes());
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        write_bytes(&path, bytes)
    }

    pub fn write_calibration(&self, model: &RtCalibrationModel) -> anyhow::Result<String> {
        let path = self.make_path("calibration.json");
        let bytes = serde_json::to_vec_pretty(model)?;
        write_bytes(&path, bytes)
    }
}
