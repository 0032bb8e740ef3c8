use crate::scan_index::exact_range;
use serde::{Deserialize, Serialize};

/// A spectral library entry, as produced by an external library parser
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LibraryPrecursor {
    pub sequence: String,
    pub precursor_mz: f32,
    pub charge: u8,
    /// Library retention time, in minutes
    #[serde(default)]
    pub rt: Option<f32>,
    /// Indexed retention time
    #[serde(default)]
    pub irt: Option<f32>,
    #[serde(default)]
    pub decoy: bool,
    pub fragment_mz: Vec<f32>,
    pub fragment_intensity: Vec<f32>,
}

impl LibraryPrecursor {
    pub fn fragment_count(&self) -> usize {
        self.fragment_mz.len().min(self.fragment_intensity.len())
    }
}

/// Sorted view over the iRT values of a library, supporting fast inclusive
/// range queries. Only used while calibrating.
pub struct IrtLibraryIndex {
    irts: Vec<f32>,
    indices: Vec<usize>,
}

impl IrtLibraryIndex {
    pub fn new(precursors: &[LibraryPrecursor]) -> Self {
        let mut pairs = precursors
            .iter()
            .enumerate()
            .filter_map(|(ix, p)| p.irt.filter(|irt| irt.is_finite()).map(|irt| (irt, ix)))
            .collect::<Vec<_>>();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let (irts, indices) = pairs.into_iter().unzip();
        IrtLibraryIndex { irts, indices }
    }

    pub fn len(&self) -> usize {
        self.irts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.irts.is_empty()
    }

    pub fn min_irt(&self) -> f32 {
        self.irts.first().copied().unwrap_or(f32::NAN)
    }

    pub fn max_irt(&self) -> f32 {
        self.irts.last().copied().unwrap_or(f32::NAN)
    }

    pub fn sorted_irts(&self) -> &[f32] {
        &self.irts
    }

    /// iRT of the `i`-th entry in sorted order
    pub fn irt(&self, i: usize) -> f32 {
        self.irts[i]
    }

    /// Index into the original precursor slice of the `i`-th sorted entry
    pub fn original_index(&self, i: usize) -> usize {
        self.indices[i]
    }

    /// Return (`start`, `count`) such that `sorted_irts()[start..start + count]`
    /// holds exactly the entries with `lo <= irt <= hi`. A valid range without
    /// matches yields its insertion point with a count of 0; an empty index or
    /// an inverted (or NaN) range yields `(0, 0)`.
    pub fn query_range(&self, lo: f32, hi: f32) -> (usize, usize) {
        if self.irts.is_empty() || !(lo <= hi) {
            return (0, 0);
        }
        let (start, end) = exact_range(&self.irts, lo, hi);
        (start, end - start)
    }

    pub fn original_indices(&self, lo: f32, hi: f32) -> &[usize] {
        let (start, count) = self.query_range(lo, hi);
        &self.indices[start..start + count]
    }
}
