//! Fragment ion chromatogram (XIC) extraction
//!
//! Extractors write into caller-provided flat buffers: every query gets a
//! contiguous `(offset, count)` segment of the shared RT and intensity
//! buffers, so no allocation happens per query.

pub mod batched;
pub mod cpu;
pub mod orchestrator;

pub use batched::{BatchedFragmentExtractor, DeviceInfo, DeviceProbe};
pub use cpu::CpuFragmentExtractor;
pub use orchestrator::ExtractionOrchestrator;

use crate::query::FragmentQuery;
use crate::scan_index::ScanIndex;
use crate::Error;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct FragmentResult {
    pub query_id: usize,
    pub data_point_count: usize,
    pub rt_offset: usize,
    pub intensity_offset: usize,
    pub total_intensity: f32,
}

/// Extracted XICs for a batch of queries, `results[i]` belonging to the
/// `i`-th query of the batch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionResult {
    pub results: Vec<FragmentResult>,
    pub rt_buffer: Vec<f32>,
    pub intensity_buffer: Vec<f32>,
    pub total_data_points: usize,
}

impl ExtractionResult {
    pub fn empty() -> Self {
        ExtractionResult::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn rts(&self, i: usize) -> &[f32] {
        let r = &self.results[i];
        &self.rt_buffer[r.rt_offset..r.rt_offset + r.data_point_count]
    }

    pub fn intensities(&self, i: usize) -> &[f32] {
        let r = &self.results[i];
        &self.intensity_buffer[r.intensity_offset..r.intensity_offset + r.data_point_count]
    }
}

pub trait FragmentExtractor: Send {
    fn name(&self) -> &'static str;

    /// Extract every query into `results` and the flat buffers, returning
    /// the number of data points written. `results` must have one slot per
    /// query, and the buffers must hold at least [`required_capacity`] points.
    fn extract_batch(
        &mut self,
        queries: &[FragmentQuery],
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
    ) -> Result<usize, Error>;
}

/// Upper bound on the number of data points a batch can produce: one per
/// scan inside each query's RT window
pub fn required_capacity(index: &ScanIndex, queries: &[FragmentQuery]) -> usize {
    queries
        .iter()
        .map(|q| {
            let (lo, hi) = index.rt_range_in_window(q.window_id, q.rt_min, q.rt_max);
            hi - lo
        })
        .sum()
}

fn check_buffers(
    queries: &[FragmentQuery],
    results: &[FragmentResult],
    rt_buffer: &[f32],
    intensity_buffer: &[f32],
) -> Result<(), Error> {
    if results.len() < queries.len() {
        return Err(Error::BufferTooSmall {
            needed: queries.len(),
            found: results.len(),
        });
    }
    if rt_buffer.len() != intensity_buffer.len() {
        return Err(Error::Extraction(format!(
            "RT buffer ({}) and intensity buffer ({}) differ in length",
            rt_buffer.len(),
            intensity_buffer.len()
        )));
    }
    Ok(())
}

/// Sum the intensity of every peak with `lo <= mz <= hi` in a single scan
#[inline]
fn sum_in_tolerance(mz: &[f32], intensity: &[f32], lo: f32, hi: f32) -> f32 {
    let start = mz.partition_point(|&m| m < lo);
    mz[start..]
        .iter()
        .zip(&intensity[start..])
        .take_while(|(m, _)| **m <= hi)
        .map(|(_, i)| *i)
        .sum()
}

/// Extraction backend, chosen at construction time
pub enum Extractor<'a> {
    Cpu(CpuFragmentExtractor<'a>),
    Batched(BatchedFragmentExtractor<'a>),
}

impl<'a> Extractor<'a> {
    pub fn is_batched(&self) -> bool {
        matches!(self, Extractor::Batched(_))
    }
}

impl<'a> FragmentExtractor for Extractor<'a> {
    fn name(&self) -> &'static str {
        match self {
            Extractor::Cpu(e) => e.name(),
            Extractor::Batched(e) => e.name(),
        }
    }

    fn extract_batch(
        &mut self,
        queries: &[FragmentQuery],
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
    ) -> Result<usize, Error> {
        match self {
            Extractor::Cpu(e) => e.extract_batch(queries, results, rt_buffer, intensity_buffer),
            Extractor::Batched(e) => {
                e.extract_batch(queries, results, rt_buffer, intensity_buffer)
            }
        }
    }
}

pub struct ExtractorFactory;

impl ExtractorFactory {
    /// Build the batched backend when a device is available and the CPU is
    /// not preferred, otherwise the scalar CPU backend
    pub fn create(index: &ScanIndex, prefer_cpu: bool) -> Extractor<'_> {
        if !prefer_cpu {
            match BatchedFragmentExtractor::new(index) {
                Ok(extractor) => return Extractor::Batched(extractor),
                Err(e) => log::debug!("- falling back to CPU extraction: {}", e),
            }
        }
        Extractor::Cpu(CpuFragmentExtractor::new(index))
    }

    pub fn describe_backend(prefer_cpu: bool) -> String {
        match (prefer_cpu, DeviceProbe::detect()) {
            (false, Some(device)) => format!("batched ({})", device),
            (false, None) => "CPU (no accelerator available)".into(),
            (true, _) => "CPU".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::Ms2Scan;

    #[test]
    fn peak_sums() {
        let mz = [99.0, 100.0, 100.0005, 100.5, 101.0];
        let intensity = [1.0, 2.0, 4.0, 8.0, 16.0];
        assert_eq!(sum_in_tolerance(&mz, &intensity, 99.999, 100.001), 6.0);
        assert_eq!(sum_in_tolerance(&mz, &intensity, 98.0, 98.5), 0.0);
        assert_eq!(sum_in_tolerance(&mz, &intensity, 101.0, 102.0), 16.0);
        assert_eq!(sum_in_tolerance(&[], &[], 0.0, 1.0), 0.0);
    }

    #[test]
    fn capacity_and_accessors() {
        let scans = (0..5)
            .map(|i| Ms2Scan::new(i, i as f32, 500.0, 20.0, vec![100.0], vec![1.0]))
            .collect::<Vec<_>>();
        let index = ScanIndex::build(&scans);
        let query = FragmentQuery {
            target_mz: 100.0,
            tolerance_ppm: 10.0,
            rt_min: 1.0,
            rt_max: 3.0,
            window_id: 0,
            query_id: 0,
        };
        assert_eq!(required_capacity(&index, &[query, query]), 6);

        let result = ExtractionResult {
            results: vec![FragmentResult {
                query_id: 0,
                data_point_count: 2,
                rt_offset: 1,
                intensity_offset: 1,
                total_intensity: 5.0,
            }],
            rt_buffer: vec![0.0, 1.0, 2.0],
            intensity_buffer: vec![0.0, 2.0, 3.0],
            total_data_points: 2,
        };
        assert_eq!(result.rts(0), &[1.0, 2.0]);
        assert_eq!(result.intensities(0), &[2.0, 3.0]);
        assert!(ExtractionResult::empty().is_empty());
    }

    #[test]
    fn factory_prefers_cpu() {
        let index = ScanIndex::build(&[]);
        let extractor = ExtractorFactory::create(&index, true);
        assert!(!extractor.is_batched());
        assert_eq!(extractor.name(), "cpu");
        assert_eq!(ExtractorFactory::describe_backend(true), "CPU");
    }
}
