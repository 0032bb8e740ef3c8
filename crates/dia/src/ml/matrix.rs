use rayon::prelude::*;
use std::fmt::{self, Debug};
use std::ops::{AddAssign, Index, IndexMut};

/// Dense row-major matrix, sized for the 13-14 column problems of the
/// linear classifiers
#[derive(Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
}

impl Matrix {
    /// Create a new `Matrix`
    ///
    /// # Panics
    ///
    /// * Panics if `data` does not have len == rows * cols
    pub fn new<T: Into<Vec<f64>>>(t: T, rows: usize, cols: usize) -> Matrix {
        let data = t.into();
        assert_eq!(
            data.len(),
            rows * cols,
            "data passed to Matrix::new() does not have shape ({}, {})",
            rows,
            cols
        );
        Matrix { data, rows, cols }
    }

    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix::new(vec![0.0; rows * cols], rows, cols)
    }

    pub fn identity(size: usize) -> Matrix {
        let mut matrix = Matrix::zeros(size, size);
        matrix.add_diagonal(1.0);
        matrix
    }

    pub fn col_vector(data: Vec<f64>) -> Matrix {
        let rows = data.len();
        Matrix::new(data, rows, 1)
    }

    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn col(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(col).step_by(self.cols.max(1)).copied()
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols)).map(|i| self[(i, i)]).collect()
    }

    /// Ridge term: add `value` to every diagonal element
    pub fn add_diagonal(&mut self, value: f64) {
        for i in 0..self.rows.min(self.cols) {
            self[(i, i)] += value;
        }
    }

    pub fn is_close(&self, rhs: &Self, eps: f64) -> bool {
        self.shape() == rhs.shape()
            && self
                .data
                .iter()
                .zip(&rhs.data)
                .all(|(l, r)| (l - r).abs() <= eps)
    }

    /// Column means; NaN for a matrix without rows
    pub fn mean(&self) -> Vec<f64> {
        (0..self.cols)
            .into_par_iter()
            .map(|col| self.col(col).sum::<f64>() / self.rows as f64)
            .collect()
    }

    /// Scatter matrix of the rows around `center`: sum of (x - c)(x - c)^T
    pub fn scatter(&self, center: &[f64]) -> Matrix {
        let n = self.cols;
        let data = (0..n * n)
            .into_par_iter()
            .map(|ij| {
                let (i, j) = (ij / n, ij % n);
                (0..self.rows)
                    .map(|r| {
                        let row = self.row(r);
                        (row[i] - center[i]) * (row[j] - center[j])
                    })
                    .sum::<f64>()
            })
            .collect::<Vec<_>>();
        Matrix::new(data, n, n)
    }

    pub(super) fn swap_rows(&mut self, i: usize, j: usize) {
        for k in 0..self.cols {
            self.data.swap(i * self.cols + k, j * self.cols + k);
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &Self::Output {
        &self.data[self.cols * row + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Self::Output {
        &mut self.data[self.cols * row + col]
    }
}

impl AddAssign<Matrix> for Matrix {
    fn add_assign(&mut self, rhs: Matrix) {
        assert_eq!(
            self.shape(),
            rhs.shape(),
            "matrices must have equal shape to add"
        );
        self.data
            .iter_mut()
            .zip(rhs.data)
            .for_each(|(l, r)| *l += r);
    }
}

impl Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for row in 0..self.rows {
            writeln!(f, "{:?}", self.row(row))?;
        }
        writeln!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rows_and_cols() {
        let mat = Matrix::new([1., 2., 3., 4., 5., 6.], 3, 2);
        assert_eq!(mat.shape(), (3, 2));
        assert_eq!(mat.row(1), &[3., 4.]);
        assert_eq!(mat.col(0).collect::<Vec<_>>(), vec![1., 3., 5.]);
        assert_eq!(mat.col(1).collect::<Vec<_>>(), vec![2., 4., 6.]);
        assert_eq!(mat[(2, 1)], 6.);

        let v = Matrix::col_vector(vec![7., 8.]);
        assert_eq!(v.col(0).collect::<Vec<_>>(), vec![7., 8.]);
    }

    #[test]
    fn scatter_and_diagonal() {
        let x = Matrix::new([1., 2., 3., 6.], 2, 2);
        assert_eq!(x.mean(), vec![2., 4.]);

        let s = x.scatter(&x.mean());
        assert_eq!(s, Matrix::new([2., 4., 4., 8.], 2, 2));

        #[rustfmt::skip]
        let y = Matrix::new([
            1., 0., 2.,
            3., 1., 2.,
            2., 2., 2.,
        ], 3, 3);
        let s = y.scatter(&y.mean());
        #[rustfmt::skip]
        let expected = Matrix::new([
            2., 1., 0.,
            1., 2., 0.,
            0., 0., 0.,
        ], 3, 3);
        assert!(s.is_close(&expected, 1E-12));

        let mut eye = Matrix::identity(3);
        assert_eq!(eye.diagonal(), vec![1., 1., 1.]);
        eye.add_diagonal(0.5);
        assert!(eye.is_close(&Matrix::new([1.5, 0., 0., 0., 1.5, 0., 0., 0., 1.5], 3, 3), 1E-12));

        let mut m = Matrix::zeros(2, 2);
        m += Matrix::identity(2);
        m.swap_rows(0, 1);
        assert_eq!(m, Matrix::new([0., 1., 1., 0.], 2, 2));
    }
}
