/// Target-decoy q-values for `scores`, returned in input order, along with
/// the number of targets with q <= `threshold`
///
/// FDR at each rank is `decoys / targets` (1.0 before the first target),
/// and q-values are the cumulative minimum of FDR from the bottom of the
/// ranking, capped at 1.0. NaN scores rank last.
pub fn target_decoy_q_values(scores: &[f64], decoy: &[bool], threshold: f64) -> (Vec<f64>, usize) {
    assert_eq!(scores.len(), decoy.len());

    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| rank(scores[b]).total_cmp(&rank(scores[a])));

    let mut decoys = 0;
    let mut targets = 0;
    let mut fdr = Vec::with_capacity(order.len());
    for &ix in &order {
        match decoy[ix] {
            true => decoys += 1,
            false => targets += 1,
        }
        fdr.push(match targets {
            0 => 1.0,
            t => decoys as f64 / t as f64,
        });
    }

    // Reverse, and calculate the cumulative minimum
    let mut q_values = vec![1.0; scores.len()];
    let mut q_min = 1.0f64;
    let mut passing = 0;
    for (&ix, q) in order.iter().zip(fdr).rev() {
        q_min = q_min.min(q);
        q_values[ix] = q_min;
        if q_min <= threshold && !decoy[ix] {
            passing += 1;
        }
    }
    (q_values, passing)
}

fn rank(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}
