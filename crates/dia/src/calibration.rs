//! Retention time calibration: robust linear mapping from library iRT to
//! observed retention time (minutes) in the current run.

use crate::Error;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Anchor count required before a fitted model is trusted for narrowing
/// extraction windows
pub const MIN_RELIABLE_ANCHORS: usize = 30;
pub const MIN_RELIABLE_R_SQUARED: f64 = 0.90;

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct FitOptions {
    pub use_ransac: bool,
    pub ransac_iterations: usize,
    /// Absolute residual (minutes) below which a point is a RANSAC inlier
    pub inlier_threshold_minutes: f64,
    pub min_inlier_fraction: f64,
    pub outlier_rejection_passes: usize,
    pub outlier_sigma: f64,
    pub min_anchors: usize,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            use_ransac: true,
            ransac_iterations: 200,
            inlier_threshold_minutes: 2.0,
            min_inlier_fraction: 0.5,
            outlier_rejection_passes: 2,
            outlier_sigma: 3.0,
            min_anchors: 5,
            seed: 42,
        }
    }
}

/// `observed_rt = slope * irt + intercept`
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RtCalibrationModel {
    pub slope: f64,
    pub intercept: f64,
    /// Residual standard deviation, in minutes
    pub sigma_minutes: f64,
    pub r_squared: f64,
    pub anchor_count: usize,
}

impl RtCalibrationModel {
    pub fn new(
        slope: f64,
        intercept: f64,
        sigma_minutes: f64,
        r_squared: f64,
        anchor_count: usize,
    ) -> Result<Self, Error> {
        if slope == 0.0 || !slope.is_finite() {
            return Err(Error::Calibration(format!(
                "invalid calibration slope: {}",
                slope
            )));
        }
        if !intercept.is_finite() || !(sigma_minutes >= 0.0) {
            return Err(Error::Calibration(format!(
                "invalid calibration parameters: intercept = {}, sigma = {}",
                intercept, sigma_minutes
            )));
        }
        Ok(RtCalibrationModel {
            slope,
            intercept,
            sigma_minutes,
            r_squared,
            anchor_count,
        })
    }

    /// Coarse model spanning the library iRT range onto the run's RT range,
    /// used for a first broad extraction pass before any anchors exist.
    /// `initial_window_irt` is the desired half-width (in iRT units) of a
    /// 3-sigma window. Never reliable.
    pub fn provisional(
        rt_min: f64,
        rt_max: f64,
        irt_min: f64,
        irt_max: f64,
        initial_window_irt: f64,
    ) -> Self {
        let d_rt = rt_max - rt_min;
        let d_irt = irt_max - irt_min;
        let slope = match d_rt / d_irt {
            s if s.is_finite() && s.abs() > 1E-9 => s,
            _ => 1.0,
        };
        let intercept = match rt_min - slope * irt_min {
            b if b.is_finite() => b,
            _ => 0.0,
        };
        let sigma_irt = match initial_window_irt.abs() / 3.0 {
            s if s.is_finite() => s,
            _ => 0.0,
        };
        RtCalibrationModel {
            slope,
            intercept,
            sigma_minutes: sigma_irt * slope.abs(),
            r_squared: 0.0,
            anchor_count: 0,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.anchor_count >= MIN_RELIABLE_ANCHORS && self.r_squared >= MIN_RELIABLE_R_SQUARED
    }

    pub fn to_minutes(&self, irt: f64) -> f64 {
        self.slope * irt + self.intercept
    }

    pub fn to_irt(&self, minutes: f64) -> f64 {
        (minutes - self.intercept) / self.slope
    }

    pub fn sigma_irt(&self) -> f64 {
        self.sigma_minutes / self.slope.abs()
    }

    pub fn minutes_window_half_width(&self, k: f64) -> f64 {
        k * self.sigma_minutes
    }

    pub fn irt_window_half_width(&self, k: f64) -> f64 {
        k * self.sigma_irt()
    }

    /// Gaussian log-likelihood style penalty for an iRT residual
    pub fn rt_score(&self, residual_irt: f64) -> f64 {
        let sigma = self.sigma_irt().max(f64::EPSILON);
        -(residual_irt * residual_irt) / (2.0 * sigma * sigma)
    }

    pub fn rt_score_between(&self, library_irt: f64, observed_irt: f64) -> f64 {
        self.rt_score(observed_irt - library_irt)
    }
}

impl std::fmt::Display for RtCalibrationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RT = {:.4} * iRT + {:.4} (sigma = {:.3} min, R² = {:.4}, anchors={})",
            self.slope, self.intercept, self.sigma_minutes, self.r_squared, self.anchor_count
        )?;
        if !self.is_reliable() {
            write!(f, " UNRELIABLE")?;
        }
        Ok(())
    }
}

/// Ordinary least squares over the points selected by `active`
fn ols(x: &[f64], y: &[f64], active: &[usize]) -> Option<(f64, f64)> {
    if active.len() < 2 {
        return None;
    }
    let n = active.len() as f64;
    let x_mean = active.iter().map(|&i| x[i]).sum::<f64>() / n;
    let y_mean = active.iter().map(|&i| y[i]).sum::<f64>() / n;

    let (sxy, sxx) = active.iter().fold((0.0f64, 0.0f64), |(sxy, sxx), &i| {
        let dx = x[i] - x_mean;
        (sxy + dx * (y[i] - y_mean), sxx + dx * dx)
    });
    if sxx.abs() < 1E-12 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}

/// Residual standard deviation with two fitted parameters
fn residual_sigma(x: &[f64], y: &[f64], active: &[usize], slope: f64, intercept: f64) -> f64 {
    if active.len() <= 2 {
        return 0.0;
    }
    let ssr = active
        .iter()
        .map(|&i| (y[i] - (slope * x[i] + intercept)).powi(2))
        .sum::<f64>();
    (ssr / (active.len() - 2) as f64).sqrt()
}

fn r_squared(x: &[f64], y: &[f64], active: &[usize], slope: f64, intercept: f64) -> f64 {
    let n = active.len() as f64;
    let y_mean = active.iter().map(|&i| y[i]).sum::<f64>() / n;
    let (ss_res, ss_tot) = active.iter().fold((0.0f64, 0.0f64), |(res, tot), &i| {
        let pred = slope * x[i] + intercept;
        (res + (y[i] - pred).powi(2), tot + (y[i] - y_mean).powi(2))
    });
    if ss_tot < 1E-12 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Random sample consensus: repeatedly hypothesize a line from two random
/// anchors and keep the largest set of points within the inlier threshold.
fn ransac(x: &[f64], y: &[f64], options: &FitOptions) -> Option<Vec<usize>> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut best: Vec<usize> = Vec::new();

    for _ in 0..options.ransac_iterations {
        let i = rng.gen_range(0..n);
        let mut j = rng.gen_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let dx = x[j] - x[i];
        if dx.abs() < 1E-9 {
            continue;
        }
        let slope = (y[j] - y[i]) / dx;
        let intercept = y[i] - slope * x[i];

        let within = |k: &usize| {
            (y[*k] - (slope * x[*k] + intercept)).abs() <= options.inlier_threshold_minutes
        };
        let count = (0..n).filter(within).count();
        if count > best.len() {
            best = (0..n).filter(within).collect();
        }
    }

    let required = ((n as f64 * options.min_inlier_fraction).ceil() as usize).max(2);
    if best.len() < required {
        log::debug!(
            "- RANSAC consensus too small ({} of {} anchors), using all anchors",
            best.len(),
            n
        );
        return None;
    }
    Some(best)
}

/// Fit a calibration model mapping `library_irt` onto `observed_rt`.
///
/// Returns `Ok(None)` when fewer than `options.min_anchors` finite anchor
/// pairs are available or the anchors are degenerate; callers must then fall
/// back to a wide fixed RT window.
pub fn fit(
    library_irt: &[f64],
    observed_rt: &[f64],
    options: &FitOptions,
) -> Result<Option<RtCalibrationModel>, Error> {
    if library_irt.len() != observed_rt.len() {
        return Err(Error::Calibration(format!(
            "anchor length mismatch: {} library values, {} observed values",
            library_irt.len(),
            observed_rt.len()
        )));
    }

    let (x, y): (Vec<f64>, Vec<f64>) = library_irt
        .iter()
        .zip(observed_rt)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();

    if x.len() < options.min_anchors.max(2) {
        log::warn!(
            "- only {} calibration anchors available, {} required",
            x.len(),
            options.min_anchors
        );
        return Ok(None);
    }

    let mut active = match options.use_ransac {
        true => ransac(&x, &y, options).unwrap_or_else(|| (0..x.len()).collect()),
        false => (0..x.len()).collect::<Vec<_>>(),
    };

    for pass in 0..options.outlier_rejection_passes {
        let (slope, intercept) = match ols(&x, &y, &active) {
            Some(line) => line,
            None => break,
        };
        let sigma = residual_sigma(&x, &y, &active, slope, intercept);
        let limit = options.outlier_sigma * sigma;
        let kept = active
            .iter()
            .copied()
            .filter(|&i| (y[i] - (slope * x[i] + intercept)).abs() <= limit)
            .collect::<Vec<_>>();
        if kept.len() == active.len() || kept.len() < 3 {
            break;
        }
        log::trace!(
            "- outlier rejection pass {}: removed {} anchors",
            pass + 1,
            active.len() - kept.len()
        );
        active = kept;
    }

    let (slope, intercept) = match ols(&x, &y, &active) {
        Some(line) => line,
        None => {
            log::warn!("- calibration anchors have no spread in iRT");
            return Ok(None);
        }
    };
    let sigma = residual_sigma(&x, &y, &active, slope, intercept);
    let r2 = r_squared(&x, &y, &active, slope, intercept);

    match RtCalibrationModel::new(slope, intercept, sigma, r2, active.len()) {
        Ok(model) => {
            log::debug!("- fitted retention time calibration: {}", model);
            Ok(Some(model))
        }
        Err(e) => {
            log::warn!("- {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::distributions::Distribution;
    use statrs::distribution::Normal;

    fn synthetic(n: usize, outlier_fraction: f64, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.15).unwrap();
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let irt = -20.0 + 140.0 * (i as f64 / n as f64);
            let mut rt = 0.8 * irt + 25.0 + noise.sample(&mut rng);
            if (i as f64) < n as f64 * outlier_fraction {
                rt += if i % 2 == 0 { 15.0 } else { -12.0 } + rng.gen_range(0.0..10.0);
            }
            x.push(irt);
            y.push(rt);
        }
        (x, y)
    }

    #[test]
    fn ransac_recovers_line_with_outliers() {
        let (x, y) = synthetic(300, 0.10, 7);
        let model = fit(&x, &y, &FitOptions::default())
            .unwrap()
            .expect("model should fit");

        assert!((model.slope - 0.8).abs() < 0.01, "{}", model);
        assert!((model.intercept - 25.0).abs() < 0.3, "{}", model);
        assert!(model.sigma_minutes < 0.3, "{}", model);
        assert!(model.r_squared > 0.99, "{}", model);
        assert!(model.anchor_count >= 250);
        assert!(model.is_reliable());
    }

    #[test]
    fn plain_ols_is_pulled_by_outliers() {
        let (x, y) = synthetic(300, 0.10, 7);
        let options = FitOptions {
            use_ransac: false,
            outlier_rejection_passes: 0,
            ..Default::default()
        };
        let model = fit(&x, &y, &options).unwrap().unwrap();
        assert_eq!(model.anchor_count, 300);
        assert!(model.sigma_minutes > 1.0);
    }

    #[test]
    fn reliability_depends_on_anchor_count() {
        let (x, y) = synthetic(MIN_RELIABLE_ANCHORS - 10, 0.0, 3);
        let model = fit(&x, &y, &FitOptions::default()).unwrap().unwrap();
        assert!(model.r_squared > 0.99);
        assert!(!model.is_reliable());

        let (x, y) = synthetic(MIN_RELIABLE_ANCHORS + 20, 0.0, 3);
        let model = fit(&x, &y, &FitOptions::default()).unwrap().unwrap();
        assert!(model.is_reliable());

        let weak = RtCalibrationModel::new(1.0, 0.0, 1.0, 0.80, 50).unwrap();
        assert!(!weak.is_reliable());
        assert!(weak.to_string().contains("UNRELIABLE"));
    }

    #[test]
    fn too_few_anchors() {
        let x = [1.0, 2.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        assert!(fit(&x, &y, &FitOptions::default()).unwrap().is_none());
        assert!(fit(&x, &y[..2], &FitOptions::default()).is_err());
    }

    #[test]
    fn model_conversions() {
        assert!(RtCalibrationModel::new(0.0, 1.0, 1.0, 1.0, 10).is_err());

        let model = RtCalibrationModel::new(0.5, 10.0, 0.6, 0.98, 100).unwrap();
        assert_eq!(model.to_minutes(20.0), 20.0);
        assert_eq!(model.to_irt(20.0), 20.0);
        assert!((model.sigma_irt() - 1.2).abs() < 1E-12);
        assert!((model.minutes_window_half_width(3.0) - 1.8).abs() < 1E-12);
        assert!((model.irt_window_half_width(3.0) - 3.6).abs() < 1E-12);
        assert_eq!(model.rt_score(0.0), 0.0);
        assert!((model.rt_score(1.2) + 0.5).abs() < 1E-12);
        assert!((model.rt_score_between(5.0, 6.2) - model.rt_score(1.2)).abs() < 1E-9);

        let display = model.to_string();
        assert!(display.contains("0.5000"));
        assert!(display.contains("R²"));
        assert!(display.contains("anchors=100"));
        assert!(!display.contains("UNRELIABLE"));
    }

    #[test]
    fn provisional_model() {
        let model = RtCalibrationModel::provisional(0.0, 60.0, -20.0, 130.0, 20.0);
        assert!((model.slope - 0.4).abs() < 1E-12);
        assert!((model.to_minutes(-20.0) - 0.0).abs() < 1E-9);
        assert!((model.to_minutes(130.0) - 60.0).abs() < 1E-9);
        assert!((model.irt_window_half_width(3.0) - 20.0).abs() < 1E-9);
        assert_eq!(model.anchor_count, 0);
        assert!(!model.is_reliable());

        let degenerate = RtCalibrationModel::provisional(10.0, 10.0, 5.0, 5.0, 20.0);
        assert_eq!(degenerate.slope, 1.0);
        assert!(degenerate.intercept.is_finite());
    }
}
