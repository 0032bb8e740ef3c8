//! Gauss-Jordan elimination for solution of systems of linear equations
//!
//! LDA needs the solution of `Sw . w = mu_pos - mu_neg`, with `Sw` the pooled
//! within-class scatter matrix.

use super::matrix::Matrix;

/// Pivots smaller than this are treated as zero
const PIVOT_EPSILON: f64 = 1E-12;

#[derive(Debug)]
pub struct Gauss {
    pub left: Matrix,
    pub right: Matrix,
}

impl Gauss {
    /// Solve `left . x = right`, returning `None` if `left` is singular
    pub fn solve(left: Matrix, right: Matrix) -> Option<Matrix> {
        if left.rows != left.cols || left.rows != right.rows {
            return None;
        }
        let mut g = Gauss { left, right };
        g.echelon();
        g.reduce();
        g.backfill();

        match g.left.is_close(&Matrix::identity(g.left.rows), 1E-9) {
            true => Some(g.right),
            false => None,
        }
    }

    /// Forward elimination with partial pivoting on the largest magnitude
    fn echelon(&mut self) {
        let (m, n) = self.left.shape();
        let mut h = 0;
        let mut k = 0;

        while h < m && k < n {
            let mut pivot = h;
            for i in h + 1..m {
                if self.left[(i, k)].abs() > self.left[(pivot, k)].abs() {
                    pivot = i;
                }
            }
            if self.left[(pivot, k)].abs() < PIVOT_EPSILON {
                k += 1;
                continue;
            }

            if h != pivot {
                self.left.swap_rows(h, pivot);
                self.right.swap_rows(h, pivot);
            }

            for i in h + 1..m {
                let factor = self.left[(i, k)] / self.left[(h, k)];
                self.left[(i, k)] = 0.0;
                for j in k + 1..n {
                    self.left[(i, j)] -= self.left[(h, j)] * factor;
                }
                for j in 0..self.right.cols {
                    self.right[(i, j)] -= self.right[(h, j)] * factor;
                }
            }
            h += 1;
            k += 1;
        }
    }

    /// Scale every row so that its leading entry is one
    fn reduce(&mut self) {
        for i in 0..self.left.rows {
            let lead = (0..self.left.cols).find(|&j| self.left[(i, j)].abs() >= PIVOT_EPSILON);
            if let Some(j) = lead {
                let x = self.left[(i, j)];
                for k in j..self.left.cols {
                    self.left[(i, k)] /= x;
                }
                for k in 0..self.right.cols {
                    self.right[(i, k)] /= x;
                }
            }
        }
    }

    /// Eliminate entries above each leading one
    fn backfill(&mut self) {
        for i in (0..self.left.rows).rev() {
            let lead = (0..self.left.cols).find(|&j| self.left[(i, j)].abs() >= PIVOT_EPSILON);
            if let Some(j) = lead {
                for k in 0..i {
                    let factor = self.left[(k, j)];
                    if factor == 0.0 {
                        continue;
                    }
                    for h in 0..self.left.cols {
                        self.left[(k, h)] -= self.left[(i, h)] * factor;
                    }
                    for h in 0..self.right.cols {
                        self.right[(k, h)] -= self.right[(i, h)] * factor;
                    }
                }
            }
        }
    }
}
