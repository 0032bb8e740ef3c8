//! Structure-of-arrays index over DIA MS2 scans
//!
//! Every peak of every indexed scan lives in two contiguous buffers
//! (`mz`, `intensity`). Scans are grouped by isolation window and sorted by
//! retention time within a window, so that an extraction query only ever has
//! to touch a single contiguous range of scans, and peaks within a scan are
//! sorted by m/z so that they can be binary searched.

use crate::mass::{ppm_error, WINDOW_GROUPING_PPM};
use crate::spectrum::Ms2Scan;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct IsolationWindow {
    pub id: usize,
    pub center: f32,
    pub lo: f32,
    pub hi: f32,
}

impl IsolationWindow {
    pub fn contains(&self, mz: f32) -> bool {
        mz >= self.lo && mz <= self.hi
    }
}

pub struct ScanIndex {
    mz: Vec<f32>,
    intensity: Vec<f32>,
    scan_offsets: Vec<usize>,
    scan_lengths: Vec<usize>,
    scan_rts: Vec<f32>,
    scan_windows: Vec<usize>,
    scan_numbers: Vec<u32>,
    /// Sorted by lower bound; `windows[i].id == i`
    windows: Vec<IsolationWindow>,
    /// Running maximum of upper bounds, used to stop the backwards walk in
    /// [`ScanIndex::find_window`]
    max_hi: Vec<f32>,
    /// (start, count) into the per-scan arrays, indexed by window id
    window_scans: Vec<(usize, usize)>,
}

struct Staged {
    window: usize,
    rt: f32,
    scan_number: u32,
    peaks: Vec<(f32, f32)>,
}

impl ScanIndex {
    pub fn build(scans: &[Ms2Scan]) -> ScanIndex {
        let usable = scans
            .iter()
            .filter(|scan| scan.is_indexable())
            .collect::<Vec<_>>();

        if usable.len() < scans.len() {
            log::debug!(
                "- ignoring {} scans without isolation window or peaks",
                scans.len() - usable.len()
            );
        }

        let (windows, assignment) = discover_windows(&usable);

        let mut staged = usable
            .iter()
            .zip(assignment)
            .map(|(scan, window)| {
                let mut peaks = scan
                    .mz
                    .iter()
                    .copied()
                    .zip(scan.intensity.iter().copied())
                    .collect::<Vec<_>>();
                peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
                Staged {
                    window,
                    rt: scan.rt,
                    scan_number: scan.scan_number,
                    peaks,
                }
            })
            .collect::<Vec<_>>();

        staged.sort_by(|a, b| {
            a.window
                .cmp(&b.window)
                .then_with(|| a.rt.total_cmp(&b.rt))
                .then_with(|| a.scan_number.cmp(&b.scan_number))
        });

        let n_peaks = staged.iter().map(|s| s.peaks.len()).sum::<usize>();
        let mut index = ScanIndex {
            mz: Vec::with_capacity(n_peaks),
            intensity: Vec::with_capacity(n_peaks),
            scan_offsets: Vec::with_capacity(staged.len()),
            scan_lengths: Vec::with_capacity(staged.len()),
            scan_rts: Vec::with_capacity(staged.len()),
            scan_windows: Vec::with_capacity(staged.len()),
            scan_numbers: Vec::with_capacity(staged.len()),
            max_hi: Vec::with_capacity(windows.len()),
            window_scans: vec![(0, 0); windows.len()],
            windows,
        };

        for (ix, scan) in staged.into_iter().enumerate() {
            let (start, count) = &mut index.window_scans[scan.window];
            if *count == 0 {
                *start = ix;
            }
            *count += 1;

            index.scan_offsets.push(index.mz.len());
            index.scan_lengths.push(scan.peaks.len());
            index.scan_rts.push(scan.rt);
            index.scan_windows.push(scan.window);
            index.scan_numbers.push(scan.scan_number);
            for (mz, intensity) in scan.peaks {
                index.mz.push(mz);
                index.intensity.push(intensity);
            }
        }

        let mut running = f32::MIN;
        for window in &index.windows {
            running = running.max(window.hi);
            index.max_hi.push(running);
        }

        log::info!(
            "- indexed {} scans ({} peaks) across {} isolation windows",
            index.scan_count(),
            index.peak_count(),
            index.window_count()
        );
        index
    }

    pub fn scan_count(&self) -> usize {
        self.scan_rts.len()
    }

    pub fn peak_count(&self) -> usize {
        self.mz.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.windows.iter().map(|w| w.id)
    }

    pub fn windows(&self) -> &[IsolationWindow] {
        &self.windows
    }

    pub fn window_bounds(&self, id: usize) -> Option<(f32, f32)> {
        self.windows.get(id).map(|w| (w.lo, w.hi))
    }

    /// Contiguous (start, count) range of scans acquired in window `id`
    pub fn scan_range(&self, id: usize) -> Option<(usize, usize)> {
        self.window_scans.get(id).copied()
    }

    /// Resolve the isolation window containing `mz`. When windows overlap,
    /// the window with the greatest lower bound wins.
    pub fn find_window(&self, mz: f32) -> Option<usize> {
        if !mz.is_finite() {
            return None;
        }
        // Number of windows with lo <= mz
        let mut idx = self.windows.partition_point(|w| w.lo <= mz);
        while idx > 0 {
            idx -= 1;
            if self.max_hi[idx] < mz {
                return None;
            }
            if self.windows[idx].contains(mz) {
                return Some(self.windows[idx].id);
            }
        }
        None
    }

    pub fn scan_rt(&self, scan: usize) -> f32 {
        self.scan_rts[scan]
    }

    pub fn scan_rts(&self) -> &[f32] {
        &self.scan_rts
    }

    pub fn scan_number(&self, scan: usize) -> u32 {
        self.scan_numbers[scan]
    }

    pub fn scan_window(&self, scan: usize) -> usize {
        self.scan_windows[scan]
    }

    /// Lowest and highest m/z observed in a scan
    pub fn scan_mz_span(&self, scan: usize) -> Option<(f32, f32)> {
        let (mz, _) = self.scan_peaks(scan);
        Some((*mz.first()?, *mz.last()?))
    }

    /// m/z-sorted peaks of a single scan
    pub fn scan_peaks(&self, scan: usize) -> (&[f32], &[f32]) {
        let start = self.scan_offsets[scan];
        let end = start + self.scan_lengths[scan];
        (&self.mz[start..end], &self.intensity[start..end])
    }

    /// Half-open range of scan indices in window `id` with `rt_min <= rt <= rt_max`
    pub fn rt_range_in_window(&self, id: usize, rt_min: f32, rt_max: f32) -> (usize, usize) {
        let (start, count) = match self.scan_range(id) {
            Some(range) => range,
            None => return (0, 0),
        };
        if count == 0 || rt_min > rt_max {
            return (start, start);
        }
        let rts = &self.scan_rts[start..start + count];
        let (lo, hi) = exact_range(rts, rt_min, rt_max);
        (start + lo, start + hi)
    }

    pub fn global_rt_min(&self) -> f32 {
        self.scan_rts
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, rt| Some(acc.map_or(rt, |a| a.min(rt))))
            .unwrap_or(0.0)
    }

    pub fn global_rt_max(&self) -> f32 {
        self.scan_rts
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, rt| Some(acc.map_or(rt, |a| a.max(rt))))
            .unwrap_or(0.0)
    }

    /// Largest number of scans acquired in any one window
    pub fn max_scans_per_window(&self) -> usize {
        self.window_scans.iter().map(|(_, n)| *n).max().unwrap_or(0)
    }

    pub fn memory_bytes(&self) -> usize {
        use std::mem::size_of;
        (self.mz.capacity() + self.intensity.capacity() + self.scan_rts.capacity())
            * size_of::<f32>()
            + (self.scan_offsets.capacity()
                + self.scan_lengths.capacity()
                + self.scan_windows.capacity())
                * size_of::<usize>()
            + self.scan_numbers.capacity() * size_of::<u32>()
    }

    /// Explicitly drop the index buffers
    pub fn release(self) {
        log::debug!("- releasing scan index ({} bytes)", self.memory_bytes());
    }
}

/// Cluster isolation centers lying within [`WINDOW_GROUPING_PPM`] of each
/// other, returning windows ordered by lower bound and, for each scan, the
/// id of its window.
fn discover_windows(scans: &[&Ms2Scan]) -> (Vec<IsolationWindow>, Vec<usize>) {
    let mut order = (0..scans.len()).collect::<Vec<_>>();
    let center = |ix: usize| scans[ix].isolation_mz.unwrap_or(0.0);
    order.sort_by(|&a, &b| center(a).total_cmp(&center(b)));

    // (sum of centers, members, max width) for each cluster
    let mut clusters: Vec<(f64, usize, f32)> = Vec::new();
    let mut cluster_of = vec![0usize; scans.len()];
    let mut anchor = f32::NAN;

    for ix in order {
        let c = center(ix);
        let width = scans[ix].isolation_width.abs();
        let same = !anchor.is_nan() && ppm_error(anchor, c) <= WINDOW_GROUPING_PPM;
        if !same {
            anchor = c;
            clusters.push((0.0, 0, 0.0));
        }
        let last = clusters.len() - 1;
        let cluster = &mut clusters[last];
        cluster.0 += c as f64;
        cluster.1 += 1;
        cluster.2 = cluster.2.max(width);
        cluster_of[ix] = last;
    }

    let mut windows = clusters
        .iter()
        .enumerate()
        .map(|(ix, &(sum, n, width))| {
            let center = (sum / n as f64) as f32;
            IsolationWindow {
                id: ix,
                center,
                lo: center - width / 2.0,
                hi: center + width / 2.0,
            }
        })
        .collect::<Vec<_>>();

    windows.sort_by(|a, b| a.lo.total_cmp(&b.lo).then(a.center.total_cmp(&b.center)));

    let mut remap = vec![0usize; windows.len()];
    for (new_id, window) in windows.iter_mut().enumerate() {
        remap[window.id] = new_id;
        window.id = new_id;
    }
    let assignment = cluster_of.into_iter().map(|c| remap[c]).collect();
    (windows, assignment)
}

/// Return the indices (`left`, `right`) that bound a sorted slice such that
/// every element with `low <= key <= high` is contained in `slice[left..right]`.
/// `left` may point one element below `low`.
///
/// # Invariants
///
/// * `slice[left] <= low || left == 0`
/// * `slice[right] > high || right == slice.len()`
/// * `0 <= left <= right <= slice.len()`
#[inline]
pub fn binary_search_slice<T, F, S>(slice: &[T], key: F, low: S, high: S) -> (usize, usize)
where
    F: Fn(&T, &S) -> Ordering,
{
    let left_idx = match slice.binary_search_by(|a| key(a, &low)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx.saturating_sub(1);
            while idx > 0 && key(&slice[idx], &low) != Ordering::Less {
                idx -= 1;
            }
            idx
        }
    };

    let right_idx = match slice[left_idx..].binary_search_by(|a| key(a, &high)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx + left_idx;
            while idx < slice.len() && key(&slice[idx], &high) != Ordering::Greater {
                idx = idx.saturating_add(1);
            }
            idx.min(slice.len())
        }
    };
    (left_idx, right_idx)
}

/// Exact half-open range of a sorted `f32` slice with `low <= x <= high`
pub fn exact_range(slice: &[f32], low: f32, high: f32) -> (usize, usize) {
    let (mut left, right) = binary_search_slice(slice, |a, b| a.total_cmp(b), low, high);
    while left < right && slice[left] < low {
        left += 1;
    }
    (left, right.max(left))
}
