use serde::{Deserialize, Serialize};

/// Isolation centers closer than this (in ppm) belong to the same DIA window
pub const WINDOW_GROUPING_PPM: f32 = 10.0;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f32, f32),
}

impl Tolerance {
    /// Symmetric ppm tolerance, as carried by a fragment query
    pub fn symmetric_ppm(ppm: f32) -> Self {
        Tolerance::Ppm(-ppm.abs(), ppm.abs())
    }

    /// Compute the (`lower`, `upper`) m/z window for a center and a given tolerance
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
        }
    }

    pub fn contains(&self, center: f32, rhs: f32) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }
}

/// Signed mass error of `observed` relative to `reference`, in ppm
pub fn ppm_error(reference: f32, observed: f32) -> f32 {
    (observed - reference) / reference * 1_000_000.0
}
