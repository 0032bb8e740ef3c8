use super::{
    required_capacity, CpuFragmentExtractor, Extractor, ExtractionResult, ExtractorFactory,
    FragmentExtractor, FragmentResult,
};
use crate::query::FragmentQuery;
use crate::scan_index::ScanIndex;
use crate::Error;
use rayon::prelude::*;
use std::time::Instant;

/// Output of one window's worth of queries
struct Segment {
    /// Positions of the window's queries in the caller's query slice
    positions: Vec<usize>,
    results: Vec<FragmentResult>,
    rts: Vec<f32>,
    intensities: Vec<f32>,
}

pub struct ExtractionOrchestrator<'a> {
    index: &'a ScanIndex,
    prefer_cpu: bool,
}

impl<'a> ExtractionOrchestrator<'a> {
    pub fn new(index: &'a ScanIndex, prefer_cpu: bool) -> Self {
        ExtractionOrchestrator { index, prefer_cpu }
    }

    /// Extract every query. `results[i]` of the output belongs to
    /// `queries[i]`, independent of the degree of parallelism.
    ///
    /// * `max_degree_of_parallelism`: worker threads, <= 0 uses every core.
    ///   Ignored by the batched backend.
    pub fn extract_all(
        &self,
        queries: &[FragmentQuery],
        max_degree_of_parallelism: i32,
    ) -> Result<ExtractionResult, Error> {
        if queries.is_empty() {
            return Ok(ExtractionResult::empty());
        }
        let start = Instant::now();

        let result = match ExtractorFactory::create(self.index, self.prefer_cpu) {
            Extractor::Batched(mut extractor) => {
                log::debug!("- extracting {} queries in a single batch", queries.len());
                extract_single(&mut extractor, self.index, queries)?
            }
            Extractor::Cpu(_) => self.extract_windows(queries, max_degree_of_parallelism)?,
        };

        log::debug!(
            "- extracted {} data points for {} queries in {}ms",
            result.total_data_points,
            queries.len(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn extract_windows(
        &self,
        queries: &[FragmentQuery],
        max_degree_of_parallelism: i32,
    ) -> Result<ExtractionResult, Error> {
        let threads = match max_degree_of_parallelism {
            n if n <= 0 => num_cpus::get(),
            n => n as usize,
        };

        let mut by_window = vec![Vec::new(); self.index.window_count()];
        for (position, query) in queries.iter().enumerate() {
            match by_window.get_mut(query.window_id) {
                Some(positions) => positions.push(position),
                None => {
                    return Err(Error::Extraction(format!(
                        "query {} references unknown isolation window {}",
                        query.query_id, query.window_id
                    )))
                }
            }
        }
        by_window.retain(|positions| !positions.is_empty());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let index = self.index;
        let segments = pool.install(|| {
            by_window
                .into_par_iter()
                .map(|positions| {
                    let window = positions.iter().map(|&p| queries[p]).collect::<Vec<_>>();
                    let mut extractor = CpuFragmentExtractor::new(index);
                    let segment = extract_single(&mut extractor, index, &window)?;
                    Ok(Segment {
                        positions,
                        results: segment.results,
                        rts: segment.rt_buffer,
                        intensities: segment.intensity_buffer,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()
        })?;

        Ok(merge(queries.len(), segments))
    }
}

fn extract_single<E: FragmentExtractor>(
    extractor: &mut E,
    index: &ScanIndex,
    queries: &[FragmentQuery],
) -> Result<ExtractionResult, Error> {
    let capacity = required_capacity(index, queries);
    let mut results = vec![FragmentResult::default(); queries.len()];
    let mut rt_buffer = vec![0.0f32; capacity];
    let mut intensity_buffer = vec![0.0f32; capacity];

    let n = extractor.extract_batch(queries, &mut results, &mut rt_buffer, &mut intensity_buffer)?;
    rt_buffer.truncate(n);
    intensity_buffer.truncate(n);
    Ok(ExtractionResult {
        results,
        rt_buffer,
        intensity_buffer,
        total_data_points: n,
    })
}

/// Concatenate per-window segments, remapping offsets and restoring the
/// caller's query order
fn merge(len: usize, segments: Vec<Segment>) -> ExtractionResult {
    let total = segments.iter().map(|s| s.rts.len()).sum::<usize>();
    let mut merged = ExtractionResult {
        results: vec![FragmentResult::default(); len],
        rt_buffer: Vec::with_capacity(total),
        intensity_buffer: Vec::with_capacity(total),
        total_data_points: total,
    };

    for segment in segments {
        let base = merged.rt_buffer.len();
        for (&position, result) in segment.positions.iter().zip(segment.results) {
            merged.results[position] = FragmentResult {
                rt_offset: result.rt_offset + base,
                intensity_offset: result.intensity_offset + base,
                ..result
            };
        }
        merged.rt_buffer.extend(segment.rts);
        merged.intensity_buffer.extend(segment.intensities);
    }
    merged
}
