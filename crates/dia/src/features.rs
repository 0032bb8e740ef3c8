//! Fixed-width feature vectors for classifier training and scoring

use crate::result::DiaSearchResult;
use crate::Error;
use serde::Serialize;

pub const FEATURE_COUNT: usize = 13;

/// Canonical feature order, shared by [`FeatureVector::write_to`], classifier
/// weights and TSV output
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "ApexScore",
    "TemporalScore",
    "SpectralAngle",
    "MeanFragCorr",
    "MinFragCorr",
    "FragDetRate",
    "LogTotalIntensity",
    "IntensityCV",
    "MedianXicDepth",
    "XicDepthCV",
    "TimePointsUsed",
    "RtDeviationMinutes",
    "RtDeviationSquared",
];

const _: () = assert!(FEATURE_NAMES.len() == FEATURE_COUNT);

/// RT deviations are capped at this value, which is also used when either RT
/// is unknown
pub const MAX_RT_DEVIATION_MINUTES: f32 = 5.0;

/// Check that `found` features match the canonical schema
pub fn validate_schema(found: usize) -> Result<(), Error> {
    if found != FEATURE_COUNT {
        return Err(Error::FeatureSchema {
            expected: FEATURE_COUNT,
            found,
        });
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct FeatureVector {
    pub apex_score: f32,
    pub temporal_score: f32,
    pub spectral_angle: f32,
    pub mean_fragment_correlation: f32,
    pub min_fragment_correlation: f32,
    pub fragment_detection_rate: f32,
    pub log_total_intensity: f32,
    pub intensity_cv: f32,
    pub median_xic_depth: f32,
    pub xic_depth_cv: f32,
    pub time_points_used: f32,
    pub rt_deviation_minutes: f32,
    pub rt_deviation_squared: f32,

    pub decoy: bool,
    pub precursor_index: usize,
    pub charge: u8,
    pub precursor_mz: f32,
    pub fragments_detected: usize,
    pub fragments_queried: usize,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f32; FEATURE_COUNT] {
        [
            self.apex_score,
            self.temporal_score,
            self.spectral_angle,
            self.mean_fragment_correlation,
            self.min_fragment_correlation,
            self.fragment_detection_rate,
            self.log_total_intensity,
            self.intensity_cv,
            self.median_xic_depth,
            self.xic_depth_cv,
            self.time_points_used,
            self.rt_deviation_minutes,
            self.rt_deviation_squared,
        ]
    }

    /// Write the classifier features in canonical order
    pub fn write_to(&self, buf: &mut [f32]) -> Result<(), Error> {
        if buf.len() < FEATURE_COUNT {
            return Err(Error::BufferTooSmall {
                needed: FEATURE_COUNT,
                found: buf.len(),
            });
        }
        buf[..FEATURE_COUNT].copy_from_slice(&self.to_array());
        Ok(())
    }

    /// Restore the classifier features from canonical order. Metadata is
    /// left at its default.
    pub fn read_from(buf: &[f32]) -> Result<Self, Error> {
        if buf.len() < FEATURE_COUNT {
            return Err(Error::BufferTooSmall {
                needed: FEATURE_COUNT,
                found: buf.len(),
            });
        }
        Ok(FeatureVector {
            apex_score: buf[0],
            temporal_score: buf[1],
            spectral_angle: buf[2],
            mean_fragment_correlation: buf[3],
            min_fragment_correlation: buf[4],
            fragment_detection_rate: buf[5],
            log_total_intensity: buf[6],
            intensity_cv: buf[7],
            median_xic_depth: buf[8],
            xic_depth_cv: buf[9],
            time_points_used: buf[10],
            rt_deviation_minutes: buf[11],
            rt_deviation_squared: buf[12],
            ..Default::default()
        })
    }
}

fn nan_to(x: f32, fallback: f32) -> f32 {
    if x.is_nan() {
        fallback
    } else {
        x
    }
}

/// Coefficient of variation using the population variance
fn cv(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 1.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    var.sqrt() / mean
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    match values.len() % 2 {
        1 => values[mid],
        _ => (values[mid - 1] + values[mid]) / 2.0,
    }
}

pub fn compute_features(result: &DiaSearchResult, precursor_index: usize) -> FeatureVector {
    let detected = result
        .extracted_intensities
        .iter()
        .zip(&result.xic_point_counts)
        .filter(|(_, &n)| n > 0)
        .collect::<Vec<_>>();
    let intensities = detected.iter().map(|(i, _)| **i).collect::<Vec<_>>();
    let mut depths = detected.iter().map(|(_, n)| **n as f32).collect::<Vec<_>>();

    let total = result.total_intensity();
    let rt_deviation = match (result.observed_apex_rt, result.library_rt) {
        (Some(observed), Some(library)) if observed.is_finite() && library.is_finite() => {
            (observed - library).abs().min(MAX_RT_DEVIATION_MINUTES)
        }
        _ => MAX_RT_DEVIATION_MINUTES,
    };

    FeatureVector {
        apex_score: nan_to(result.apex_score, 0.0),
        temporal_score: nan_to(result.temporal_score, 0.0),
        spectral_angle: nan_to(result.spectral_angle, 0.0),
        mean_fragment_correlation: nan_to(result.mean_fragment_correlation, 0.0),
        min_fragment_correlation: nan_to(result.min_fragment_correlation, -1.0),
        fragment_detection_rate: match result.fragments_queried {
            0 => 0.0,
            n => result.fragments_detected as f32 / n as f32,
        },
        log_total_intensity: if total > 0.0 { total.log10() } else { 0.0 },
        intensity_cv: cv(&intensities),
        xic_depth_cv: cv(&depths),
        median_xic_depth: median(&mut depths),
        time_points_used: result.time_points_used as f32,
        rt_deviation_minutes: rt_deviation,
        rt_deviation_squared: rt_deviation * rt_deviation,

        decoy: result.decoy,
        precursor_index,
        charge: result.charge,
        precursor_mz: result.precursor_mz,
        fragments_detected: result.fragments_detected,
        fragments_queried: result.fragments_queried,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peak_group::PeakGroup;

    fn result() -> DiaSearchResult {
        DiaSearchResult {
            sequence: "PEPTIDEK".into(),
            charge: 3,
            precursor_mz: 600.5,
            decoy: true,
            precursor_index: 0,
            window_id: 0,
            rt_window_start: 0.0,
            rt_window_end: 10.0,
            fragments_queried: 4,
            fragments_detected: 3,
            extracted_intensities: vec![100.0, 300.0, 600.0, 0.0],
            xic_point_counts: vec![5, 9, 7, 0],
            library_intensities: vec![1.0; 4],
            dot_product_score: 0.9,
            raw_cosine: 0.9,
            apex_score: 0.95,
            temporal_score: f32::NAN,
            spectral_angle: 0.7,
            mean_fragment_correlation: 0.8,
            min_fragment_correlation: f32::NAN,
            peak_apex_score: 0.95,
            peak_temporal_score: 0.9,
            peak_mean_fragment_correlation: 0.8,
            peak_min_fragment_correlation: 0.5,
            peak_group: PeakGroup::NONE,
            time_points_used: 12,
            apex_time_index: Some(4),
            library_rt: Some(20.0),
            observed_apex_rt: Some(20.12),
            classifier_score: f32::NAN,
            q_value: 1.0,
        }
    }

    #[test]
    fn schema() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert!(validate_schema(13).is_ok());
        assert!(matches!(
            validate_schema(12),
            Err(Error::FeatureSchema {
                expected: 13,
                found: 12
            })
        ));
    }

    #[test]
    fn computed_features() {
        let fv = compute_features(&result(), 7);
        assert_eq!(fv.apex_score, 0.95);
        assert_eq!(fv.temporal_score, 0.0);
        assert_eq!(fv.min_fragment_correlation, -1.0);
        assert_eq!(fv.fragment_detection_rate, 0.75);
        assert!((fv.log_total_intensity - 3.0).abs() < 1E-6);
        assert_eq!(fv.median_xic_depth, 7.0);
        assert_eq!(fv.time_points_used, 12.0);
        assert!((fv.rt_deviation_minutes - 0.12).abs() < 1E-4);
        assert!((fv.rt_deviation_squared - 0.0144).abs() < 1E-4);

        // mean 333.3, population std 205.5
        assert!((fv.intensity_cv - 0.6164).abs() < 1E-3);
        assert!(fv.xic_depth_cv > 0.0);

        assert!(fv.decoy);
        assert_eq!(fv.precursor_index, 7);
        assert_eq!(fv.charge, 3);
        assert_eq!(fv.fragments_detected, 3);
        assert_eq!(fv.fragments_queried, 4);
    }

    #[test]
    fn rt_deviation_squared() {
        let mut r = result();
        r.library_rt = Some(10.0);
        r.observed_apex_rt = Some(10.12);
        let fv = compute_features(&r, 0);
        let expected = fv.rt_deviation_minutes * fv.rt_deviation_minutes;
        assert!((fv.rt_deviation_squared - expected).abs() < 1E-6);

        let fv = FeatureVector {
            rt_deviation_minutes: 0.12,
            rt_deviation_squared: 0.12 * 0.12,
            ..Default::default()
        };
        assert!((fv.rt_deviation_squared - 0.0144).abs() < 1E-6);
    }

    #[test]
    fn missing_rt_and_detections() {
        let mut r = result();
        r.library_rt = None;
        r.xic_point_counts = vec![0, 0, 4, 0];
        r.fragments_detected = 1;
        let fv = compute_features(&r, 0);
        assert_eq!(fv.rt_deviation_minutes, 5.0);
        assert_eq!(fv.rt_deviation_squared, 25.0);
        assert_eq!(fv.intensity_cv, 1.0);
        assert_eq!(fv.xic_depth_cv, 1.0);
        assert_eq!(fv.median_xic_depth, 4.0);

        r.observed_apex_rt = Some(100.0);
        r.library_rt = Some(1.0);
        assert_eq!(compute_features(&r, 0).rt_deviation_minutes, 5.0);
    }

    #[test]
    fn write_and_read() {
        let fv = compute_features(&result(), 3);
        let mut buf = [0.0f32; 16];
        fv.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..FEATURE_COUNT], &fv.to_array());
        assert_eq!(buf[13], 0.0);

        let restored = FeatureVector::read_from(&buf).unwrap();
        assert_eq!(restored.to_array(), fv.to_array());

        let mut short = [0.0f32; 12];
        assert!(matches!(
            fv.write_to(&mut short),
            Err(Error::BufferTooSmall { needed: 13, found: 12 })
        ));
        assert!(FeatureVector::read_from(&short).is_err());
    }
}
