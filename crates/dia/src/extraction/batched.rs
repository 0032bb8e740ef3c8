//! Data-parallel extraction backend
//!
//! The batch is flattened into a dense grid with one cell per
//! (query, candidate scan) pair, every cell is evaluated independently by a
//! single kernel launch, and the grid is then compacted into the flat output
//! buffers. Grid buffers are pooled on the extractor and reused between
//! batches. Batches whose grid would exceed the cell budget are split into
//! several launches.

use super::{check_buffers, sum_in_tolerance, FragmentExtractor, FragmentResult};
use crate::query::FragmentQuery;
use crate::scan_index::ScanIndex;
use crate::Error;
use rayon::prelude::*;

/// Environment variable selecting the accelerator device
pub const DEVICE_ENV: &str = "DIA_DEVICE";

const MIN_POOL_CAPACITY: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub compute_units: usize,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {} compute units", self.name, self.compute_units)
    }
}

pub struct DeviceProbe;

impl DeviceProbe {
    /// Probe for an accelerator. Never panics: anything unexpected is
    /// reported as "no device".
    pub fn detect() -> Option<DeviceInfo> {
        match std::env::var(DEVICE_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => None,
        }
    }

    fn parse(value: &str) -> Option<DeviceInfo> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "cpu" => None,
            "host" => Some(DeviceInfo {
                name: "host".into(),
                compute_units: num_cpus::get(),
            }),
            other => {
                log::warn!("{}={} does not name a supported device", DEVICE_ENV, other);
                None
            }
        }
    }

    pub fn description() -> String {
        match Self::detect() {
            Some(device) => device.to_string(),
            None => "no accelerator device".into(),
        }
    }
}

/// Grow `buf` to hold at least `len` elements, by 1.5x steps
fn reserve_pooled(buf: &mut Vec<f32>, len: usize) {
    if buf.len() >= len {
        return;
    }
    let mut capacity = buf.len().max(MIN_POOL_CAPACITY);
    while capacity < len {
        capacity += capacity / 2;
    }
    buf.resize(capacity, 0.0);
}

/// Grid budget of a single kernel launch, in cells
pub const DEFAULT_GRID_CELLS: usize = 1 << 22;

/// Length and stride of the longest run of queries at the front of `ranges`
/// whose dense grid fits in `budget` cells. Always takes at least one query.
fn next_launch(ranges: &[(usize, usize)], budget: usize) -> (usize, usize) {
    let mut stride = 0;
    for (n, (lo, hi)) in ranges.iter().enumerate() {
        let width = stride.max(hi - lo);
        if n > 0 && (n + 1) * width > budget {
            return (n, stride);
        }
        stride = width;
    }
    (ranges.len(), stride)
}

pub struct BatchedFragmentExtractor<'a> {
    index: &'a ScanIndex,
    device: DeviceInfo,
    max_grid_cells: usize,
    launches: usize,
    grid_rt: Vec<f32>,
    grid_intensity: Vec<f32>,
    scan_ranges: Vec<(usize, usize)>,
}

impl<'a> BatchedFragmentExtractor<'a> {
    /// Fails fast with [`Error::Gpu`] when no device is available
    pub fn new(index: &'a ScanIndex) -> Result<Self, Error> {
        match DeviceProbe::detect() {
            Some(device) => Ok(Self::with_device(index, device)),
            None => Err(Error::Gpu(DeviceProbe::description())),
        }
    }

    pub fn with_device(index: &'a ScanIndex, device: DeviceInfo) -> Self {
        log::debug!("- batched extraction on {}", device);
        BatchedFragmentExtractor {
            index,
            device,
            max_grid_cells: DEFAULT_GRID_CELLS,
            launches: 0,
            grid_rt: Vec::new(),
            grid_intensity: Vec::new(),
            scan_ranges: Vec::new(),
        }
    }

    /// Cap the dense grid of each kernel launch at `cells`. Queries wider
    /// than the cap still get a launch of their own.
    pub fn with_grid_budget(mut self, cells: usize) -> Self {
        self.max_grid_cells = cells.max(1);
        self
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Currently pooled grid size, in cells
    pub fn pooled_cells(&self) -> usize {
        self.grid_intensity.len()
    }

    /// Kernel launches issued over the lifetime of this extractor
    pub fn launches(&self) -> usize {
        self.launches
    }

    fn extract_launches(
        &mut self,
        queries: &[FragmentQuery],
        ranges: &[(usize, usize)],
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
    ) -> Result<usize, Error> {
        let mut cursor = 0;
        let mut start = 0;
        while start < queries.len() {
            let (len, stride) = next_launch(&ranges[start..], self.max_grid_cells);
            let end = start + len;
            cursor = self.launch(
                &queries[start..end],
                &ranges[start..end],
                stride,
                &mut results[start..end],
                rt_buffer,
                intensity_buffer,
                cursor,
            )?;
            start = end;
        }
        Ok(cursor)
    }

    /// Evaluate one dense grid and compact it into the output buffers from
    /// `cursor` on, returning the new cursor
    #[allow(clippy::too_many_arguments)]
    fn launch(
        &mut self,
        queries: &[FragmentQuery],
        ranges: &[(usize, usize)],
        stride: usize,
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
        mut cursor: usize,
    ) -> Result<usize, Error> {
        if stride == 0 {
            for (query, result) in queries.iter().zip(results.iter_mut()) {
                *result = FragmentResult {
                    query_id: query.query_id,
                    rt_offset: cursor,
                    intensity_offset: cursor,
                    ..Default::default()
                };
            }
            return Ok(cursor);
        }

        let index = self.index;
        let cells = queries.len() * stride;
        reserve_pooled(&mut self.grid_rt, cells);
        reserve_pooled(&mut self.grid_intensity, cells);
        self.launches += 1;

        // Kernel: one cell per (query, scan) pair
        self.grid_intensity[..cells]
            .par_chunks_mut(stride)
            .zip(self.grid_rt[..cells].par_chunks_mut(stride))
            .zip(queries.par_iter().zip(ranges.par_iter()))
            .for_each(|((intensity_row, rt_row), (query, &(first, last)))| {
                let (lo, hi) = query.mz_bounds();
                let row = intensity_row.iter_mut().zip(rt_row.iter_mut());
                for (s, (cell_int, cell_rt)) in row.enumerate() {
                    let scan = first + s;
                    if scan >= last {
                        *cell_int = 0.0;
                        continue;
                    }
                    let (mz, intensity) = index.scan_peaks(scan);
                    *cell_int = sum_in_tolerance(mz, intensity, lo, hi);
                    *cell_rt = index.scan_rt(scan);
                }
            });

        // Compaction
        for (q, (query, result)) in queries.iter().zip(results.iter_mut()).enumerate() {
            let offset = cursor;
            let mut total = 0.0f32;
            let row = q * stride..(q + 1) * stride;
            let points = self.grid_intensity[row.clone()]
                .iter()
                .zip(&self.grid_rt[row]);
            for (&intensity, &rt) in points {
                if intensity <= 0.0 {
                    continue;
                }
                if cursor >= rt_buffer.len() {
                    return Err(Error::BufferTooSmall {
                        needed: cursor + 1,
                        found: rt_buffer.len(),
                    });
                }
                rt_buffer[cursor] = rt;
                intensity_buffer[cursor] = intensity;
                total += intensity;
                cursor += 1;
            }
            *result = FragmentResult {
                query_id: query.query_id,
                data_point_count: cursor - offset,
                rt_offset: offset,
                intensity_offset: offset,
                total_intensity: total,
            };
        }
        Ok(cursor)
    }
}

impl<'a> FragmentExtractor for BatchedFragmentExtractor<'a> {
    fn name(&self) -> &'static str {
        "batched"
    }

    fn extract_batch(
        &mut self,
        queries: &[FragmentQuery],
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
    ) -> Result<usize, Error> {
        check_buffers(queries, results, rt_buffer, intensity_buffer)?;

        let index = self.index;
        let mut ranges = std::mem::take(&mut self.scan_ranges);
        ranges.clear();
        ranges.extend(
            queries
                .iter()
                .map(|q| index.rt_range_in_window(q.window_id, q.rt_min, q.rt_max)),
        );
        let extracted =
            self.extract_launches(queries, &ranges, results, rt_buffer, intensity_buffer);
        self.scan_ranges = ranges;
        extracted
    }
}
