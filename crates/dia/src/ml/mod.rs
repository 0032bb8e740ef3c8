//! Linear algebra, classifiers & target-decoy q-values

pub mod classifier;
pub mod gauss;
pub mod matrix;
pub mod qvalue;
pub mod validation;

#[cfg(test)]
fn all_close(lhs: &[f64], rhs: &[f64], eps: f64) -> bool {
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs.iter())
            .all(|(l, r)| (l - r).abs() <= eps)
}

pub fn norm(slice: &[f64]) -> f64 {
    slice.iter().fold(0.0, |acc, x| acc + x.powi(2)).sqrt()
}

pub fn mean(slice: &[f64]) -> f64 {
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Mean, median, first and third quartile of a sorted slice, using nearest
/// rank. All zero for an empty slice.
pub fn quartiles(sorted: &[f64]) -> (f64, f64, f64, f64) {
    if sorted.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let n = sorted.len();
    (mean(sorted), sorted[n / 2], sorted[n / 4], sorted[3 * n / 4])
}
