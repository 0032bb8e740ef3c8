use anyhow::{ensure, Context};
use clap::ArgMatches;
use dia_core::calibration::FitOptions;
use dia_core::fdr::FdrOptions;
use dia_core::pipeline::{CalibrationParameters, Parameters};
use dia_core::query::QueryParameters;
use dia_core::scoring::ScoringStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual run parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub scans: String,
    pub library: String,
    pub query: QueryParameters,
    pub calibration: Option<CalibrationParameters>,
    pub fdr: FdrOptions,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

impl Search {
    pub fn parameters(&self) -> Parameters {
        Parameters {
            query: self.query,
            calibration: self.calibration,
            fdr: self.fdr,
        }
    }
}

#[derive(Deserialize)]
/// Input run parameters deserialized from JSON file
pub struct Input {
    scans: Option<String>,
    library: Option<String>,
    output_directory: Option<String>,
    query: Option<QueryOptions>,
    calibration: Option<CalibrationOptions>,
    fdr: Option<FdrOptionsBuilder>,
    prefer_cpu: Option<bool>,
    max_threads: Option<i32>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct QueryOptions {
    ppm_tolerance: Option<f32>,
    rt_tolerance_minutes: Option<f32>,
    min_fragments_required: Option<usize>,
    min_score_threshold: Option<f32>,
    calibrated_window_sigma_multiplier: Option<f32>,
    scoring_strategy: Option<ScoringStrategy>,
    nonlinear_power: Option<f32>,
}

impl From<QueryOptions> for QueryParameters {
    fn from(value: QueryOptions) -> QueryParameters {
        let default = QueryParameters::default();
        let parameters = QueryParameters {
            ppm_tolerance: value.ppm_tolerance.unwrap_or(default.ppm_tolerance).abs(),
            rt_tolerance_minutes: value
                .rt_tolerance_minutes
                .unwrap_or(default.rt_tolerance_minutes)
                .abs(),
            min_fragments_required: value
                .min_fragments_required
                .unwrap_or(default.min_fragments_required),
            min_score_threshold: value.min_score_threshold.unwrap_or(default.min_score_threshold),
            calibrated_window_sigma_multiplier: value
                .calibrated_window_sigma_multiplier
                .unwrap_or(default.calibrated_window_sigma_multiplier)
                .abs(),
            scoring_strategy: value.scoring_strategy.unwrap_or(default.scoring_strategy),
            nonlinear_power: value.nonlinear_power.unwrap_or(default.nonlinear_power),
            ..default
        };
        if parameters.ppm_tolerance > 50.0 {
            log::warn!("query.ppm_tolerance is higher than expected");
        }
        if parameters.min_fragments_required < 2 {
            log::warn!(
                "query.min_fragments_required < 2: temporal scores need at least two fragments"
            );
        }
        if parameters.calibrated_window_sigma_multiplier < 1.0 {
            log::warn!("query.calibrated_window_sigma_multiplier is lower than expected");
        }
        if parameters.nonlinear_power < 1.0 {
            log::warn!("query.nonlinear_power < 1 is treated as 1");
        }
        parameters
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct CalibrationOptions {
    enabled: Option<bool>,
    use_ransac: Option<bool>,
    ransac_iterations: Option<usize>,
    inlier_threshold_minutes: Option<f64>,
    min_inlier_fraction: Option<f64>,
    outlier_rejection_passes: Option<usize>,
    outlier_sigma: Option<f64>,
    min_anchors: Option<usize>,
    initial_irt_window: Option<f64>,
    min_anchor_score: Option<f32>,
    max_anchors: Option<usize>,
    min_sigma_minutes: Option<f64>,
}

impl From<CalibrationOptions> for Option<CalibrationParameters> {
    fn from(value: CalibrationOptions) -> Self {
        if !value.enabled.unwrap_or(true) {
            return None;
        }
        let default = CalibrationParameters::default();
        let fit = FitOptions {
            use_ransac: value.use_ransac.unwrap_or(default.fit.use_ransac),
            ransac_iterations: value.ransac_iterations.unwrap_or(default.fit.ransac_iterations),
            inlier_threshold_minutes: value
                .inlier_threshold_minutes
                .unwrap_or(default.fit.inlier_threshold_minutes)
                .abs(),
            min_inlier_fraction: value
                .min_inlier_fraction
                .unwrap_or(default.fit.min_inlier_fraction),
            outlier_rejection_passes: value
                .outlier_rejection_passes
                .unwrap_or(default.fit.outlier_rejection_passes),
            outlier_sigma: value.outlier_sigma.unwrap_or(default.fit.outlier_sigma).abs(),
            min_anchors: value.min_anchors.unwrap_or(default.fit.min_anchors),
            ..default.fit
        };
        let parameters = CalibrationParameters {
            fit,
            initial_irt_window: value
                .initial_irt_window
                .unwrap_or(default.initial_irt_window)
                .abs(),
            min_anchor_score: value.min_anchor_score.unwrap_or(default.min_anchor_score),
            max_anchors: value.max_anchors.unwrap_or(default.max_anchors),
            min_sigma_minutes: value
                .min_sigma_minutes
                .unwrap_or(default.min_sigma_minutes)
                .abs(),
        };
        if !(0.0..=1.0).contains(&parameters.fit.min_inlier_fraction) {
            log::warn!("calibration.min_inlier_fraction should be between 0 and 1");
        }
        if parameters.max_anchors < parameters.fit.min_anchors {
            log::warn!("calibration.max_anchors is lower than calibration.min_anchors");
        }
        Some(parameters)
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct FdrOptionsBuilder {
    max_iterations: Option<usize>,
    convergence_threshold: Option<f64>,
    id_count_convergence_threshold: Option<f64>,
    q_value_threshold: Option<f64>,
    training_quantile: Option<f64>,
    min_training_examples: Option<usize>,
    lambda: Option<f64>,
    learning_rate: Option<f64>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    seed: Option<u64>,
    interaction: Option<bool>,
}

impl From<FdrOptionsBuilder> for FdrOptions {
    fn from(value: FdrOptionsBuilder) -> Self {
        let default = FdrOptions::default();
        let options = FdrOptions {
            max_iterations: value.max_iterations.unwrap_or(default.max_iterations).max(1),
            convergence_threshold: value
                .convergence_threshold
                .unwrap_or(default.convergence_threshold),
            id_count_convergence_threshold: value
                .id_count_convergence_threshold
                .unwrap_or(default.id_count_convergence_threshold),
            q_value_threshold: value.q_value_threshold.unwrap_or(default.q_value_threshold),
            training_quantile: value.training_quantile.unwrap_or(default.training_quantile),
            min_training_examples: value
                .min_training_examples
                .unwrap_or(default.min_training_examples),
            lambda: value.lambda.unwrap_or(default.lambda).abs(),
            learning_rate: value.learning_rate.unwrap_or(default.learning_rate).abs(),
            epochs: value.epochs.unwrap_or(default.epochs),
            batch_size: value.batch_size.unwrap_or(default.batch_size).max(1),
            seed: value.seed.unwrap_or(default.seed),
            interaction: value.interaction.unwrap_or(default.interaction),
        };
        if options.q_value_threshold > 0.05 {
            log::warn!("fdr.q_value_threshold is higher than expected");
        }
        if !(options.training_quantile > 0.0 && options.training_quantile <= 1.0) {
            log::warn!("fdr.training_quantile should be in (0, 1]");
        }
        options
    }
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("missing required `parameters` argument")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(scans) = matches.get_one::<String>("scans") {
            log::trace!("overriding `scans` parameter.");
            input.scans = Some(scans.into());
        }
        if let Some(library) = matches.get_one::<String>("library") {
            log::trace!("overriding `library` parameter.");
            input.library = Some(library.into());
        }
        if let Some(threads) = matches.get_one::<u16>("threads").copied() {
            input.max_threads = Some(threads as i32);
        }
        if matches.get_flag("gpu") {
            input.prefer_cpu = Some(false);
        }

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        dia_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        ensure!(
            self.scans.is_some(),
            "`scans` must be set. For more information try '--help'"
        );
        ensure!(
            self.library.is_some(),
            "`library` must be set. For more information try '--help'"
        );

        let mut query: QueryParameters = self.query.unwrap_or_default().into();
        if let Some(prefer_cpu) = self.prefer_cpu {
            query.prefer_cpu = prefer_cpu;
        }
        if let Some(max_threads) = self.max_threads {
            query.max_threads = max_threads;
        }
        if query.max_threads > num_cpus::get() as i32 {
            log::warn!(
                "max_threads ({}) is higher than the number of available cores ({})",
                query.max_threads,
                num_cpus::get()
            );
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            scans: self.scans.unwrap_or_default(),
            library: self.library.unwrap_or_default(),
            query,
            calibration: self.calibration.unwrap_or_default().into(),
            fdr: self.fdr.unwrap_or_default().into(),
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> Input {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults() {
        let dir = std::env::temp_dir().join("dia-cli-input-defaults");
        let json = format!(
            r#"{{"scans": "scans.json", "library": "library.json", "output_directory": {:?}}}"#,
            dir.display().to_string()
        );
        let search = parse(&json).build().unwrap();
        assert_eq!(search.scans, "scans.json");
        assert_eq!(search.output_directory, dir);
        assert_eq!(search.query.ppm_tolerance, QueryParameters::default().ppm_tolerance);
        assert_eq!(search.fdr, FdrOptions::default());
        assert!(search.calibration.is_some());
        assert!(search.output_paths.is_empty());
    }

    #[test]
    fn overrides_and_sanitizing() {
        let dir = std::env::temp_dir().join("dia-cli-input-overrides");
        let json = format!(
            r#"{{
                "scans": "s.json",
                "library": "l.json",
                "output_directory": {:?},
                "prefer_cpu": false,
                "max_threads": 2,
                "query": {{"ppm_tolerance": -15.0, "scoring_strategy": "ConsensusApex"}},
                "calibration": {{"enabled": false}},
                "fdr": {{"max_iterations": 0, "lambda": 0.01}}
            }}"#,
            dir.display().to_string()
        );
        let search = parse(&json).build().unwrap();
        assert_eq!(search.query.ppm_tolerance, 15.0);
        assert_eq!(search.query.scoring_strategy, ScoringStrategy::ConsensusApex);
        assert!(!search.query.prefer_cpu);
        assert_eq!(search.query.max_threads, 2);
        assert!(search.calibration.is_none());
        assert_eq!(search.fdr.max_iterations, 1);
        assert_eq!(search.fdr.lambda, 0.01);
        assert_eq!(search.fdr.epochs, FdrOptions::default().epochs);

        let parameters = search.parameters();
        assert!(parameters.calibration.is_none());
        assert_eq!(parameters.query.max_threads, 2);
    }

    #[test]
    fn missing_paths() {
        assert!(parse(r#"{"library": "l.json"}"#).build().is_err());
        assert!(parse(r#"{"scans": "s.json"}"#).build().is_err());
    }

    #[test]
    fn calibration_options() {
        let options: CalibrationOptions =
            serde_json::from_str(r#"{"use_ransac": false, "min_anchors": 12}"#).unwrap();
        let parameters: Option<CalibrationParameters> = options.into();
        let parameters = parameters.unwrap();
        assert!(!parameters.fit.use_ransac);
        assert_eq!(parameters.fit.min_anchors, 12);
        assert_eq!(parameters.initial_irt_window, 20.0);
    }
}
