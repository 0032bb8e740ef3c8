use super::{check_buffers, sum_in_tolerance, FragmentExtractor, FragmentResult};
use crate::query::FragmentQuery;
use crate::scan_index::ScanIndex;
use crate::Error;

/// Scalar extraction kernel: one query at a time, binary searching the RT
/// range of the query's window and then the m/z-sorted peaks of each scan
pub struct CpuFragmentExtractor<'a> {
    index: &'a ScanIndex,
}

impl<'a> CpuFragmentExtractor<'a> {
    pub fn new(index: &'a ScanIndex) -> Self {
        CpuFragmentExtractor { index }
    }
}

impl<'a> FragmentExtractor for CpuFragmentExtractor<'a> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn extract_batch(
        &mut self,
        queries: &[FragmentQuery],
        results: &mut [FragmentResult],
        rt_buffer: &mut [f32],
        intensity_buffer: &mut [f32],
    ) -> Result<usize, Error> {
        check_buffers(queries, results, rt_buffer, intensity_buffer)?;

        let mut cursor = 0;
        for (query, result) in queries.iter().zip(results.iter_mut()) {
            let (lo, hi) = query.mz_bounds();
            let (first, last) =
                self.index
                    .rt_range_in_window(query.window_id, query.rt_min, query.rt_max);

            let offset = cursor;
            let mut total = 0.0f32;
            for scan in first..last {
                let (mz, intensity) = self.index.scan_peaks(scan);
                let sum = sum_in_tolerance(mz, intensity, lo, hi);
                if sum <= 0.0 {
                    continue;
                }
                if cursor >= rt_buffer.len() {
                    return Err(Error::BufferTooSmall {
                        needed: cursor + 1,
                        found: rt_buffer.len(),
                    });
                }
                rt_buffer[cursor] = self.index.scan_rt(scan);
                intensity_buffer[cursor] = sum;
                total += sum;
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::extraction::required_capacity;
    use crate::spectrum::Ms2Scan;

    fn query(mz: f32, ppm: f32, rt_min: f32, rt_max: f32, id: usize) -> FragmentQuery {
        FragmentQuery {
            target_mz: mz,
            tolerance_ppm: ppm,
            rt_min,
            rt_max,
            window_id: 0,
            query_id: id,
        }
    }

    fn run(
        index: &ScanIndex,
        queries: &[FragmentQuery],
    ) -> (Vec<FragmentResult>, Vec<f32>, Vec<f32>, usize) {
        let capacity = required_capacity(index, queries);
        let mut results = vec![FragmentResult::default(); queries.len()];
        let mut rts = vec![0.0; capacity];
        let mut ints = vec![0.0; capacity];
        let n = CpuFragmentExtractor::new(index)
            .extract_batch(queries, &mut results, &mut rts, &mut ints)
            .unwrap();
        (results, rts, ints, n)
    }

    /// Ten scans at RT 0..10 in a single window, each with peaks at 500 and 1000
    fn index() -> ScanIndex {
        let scans = (0..10)
            .map(|i| {
                Ms2Scan::new(
                    i,
                    i as f32,
                    600.0,
                    20.0,
                    vec![500.0, 1000.0],
                    vec![10.0 * (i + 1) as f32, 250.0],
                )
            })
            .collect::<Vec<_>>();
        ScanIndex::build(&scans)
    }

    #[test]
    fn single_match() {
        let index = index();
        let (results, rts, ints, n) = run(&index, &[query(1000.0, 10.0, 5.0, 5.0, 0)]);
        assert_eq!(n, 1);
        assert_eq!(results[0].data_point_count, 1);
        assert_eq!(rts[0], 5.0);
        assert_eq!(ints[0], 250.0);
        assert_eq!(results[0].total_intensity, 250.0);
    }

    #[test]
    fn ppm_tolerance() {
        let scans = vec![Ms2Scan::new(
            0,
            1.0,
            600.0,
            20.0,
            vec![1000.005],
            vec![100.0],
        )];
        let index = ScanIndex::build(&scans);
        let (results, _, _, _) = run(&index, &[query(1000.0, 10.0, 0.0, 2.0, 0)]);
        assert_eq!(results[0].data_point_count, 1);

        let scans = vec![Ms2Scan::new(0, 1.0, 600.0, 20.0, vec![1000.02], vec![100.0])];
        let index = ScanIndex::build(&scans);
        let (results, _, _, n) = run(&index, &[query(1000.0, 10.0, 0.0, 2.0, 0)]);
        assert_eq!(results[0].data_point_count, 0);
        assert_eq!(n, 0);
    }

    #[test]
    fn rt_window() {
        let index = index();
        let (results, rts, ints, n) = run(&index, &[query(500.0, 10.0, 2.0, 4.0, 0)]);
        assert_eq!(n, 3);
        assert_eq!(&rts[..3], &[2.0, 3.0, 4.0]);
        assert_eq!(&ints[..3], &[30.0, 40.0, 50.0]);
        assert_eq!(results[0].total_intensity, 120.0);
    }

    #[test]
    fn sequential_offsets() {
        let index = index();
        let queries = [
            query(500.0, 10.0, 0.0, 1.0, 7),
            query(750.0, 10.0, 0.0, 9.0, 8),
            query(1000.0, 10.0, 0.0, 2.0, 9),
        ];
        let (results, _, ints, n) = run(&index, &queries);
        assert_eq!(n, 5);
        assert_eq!((results[0].rt_offset, results[0].data_point_count), (0, 2));
        // No match produces an empty segment
        assert_eq!((results[1].rt_offset, results[1].data_point_count), (2, 0));
        assert_eq!(results[1].total_intensity, 0.0);
        assert_eq!((results[2].rt_offset, results[2].data_point_count), (2, 3));
        assert_eq!(results[2].intensity_offset, 2);
        assert_eq!(results.iter().map(|r| r.query_id).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(&ints[2..5], &[250.0, 250.0, 250.0]);
    }

    #[test]
    fn peaks_within_tolerance_are_summed() {
        let scans = vec![Ms2Scan::new(
            0,
            1.0,
            600.0,
            20.0,
            vec![999.999, 1000.0, 1000.001, 1001.0],
            vec![1.0, 2.0, 3.0, 100.0],
        )];
        let index = ScanIndex::build(&scans);
        let (results, _, ints, _) = run(&index, &[query(1000.0, 10.0, 0.0, 2.0, 0)]);
        assert_eq!(results[0].data_point_count, 1);
        assert_eq!(ints[0], 6.0);
    }

    #[test]
    fn undersized_buffers() {
        let index = index();
        let queries = [query(500.0, 10.0, 0.0, 9.0, 0)];
        let mut results = vec![FragmentResult::default()];
        let mut rts = vec![0.0; 2];
        let mut ints = vec![0.0; 2];
        let err = CpuFragmentExtractor::new(&index).extract_batch(
            &queries,
            &mut results,
            &mut rts,
            &mut ints,
        );
        assert!(matches!(err, Err(Error::BufferTooSmall { .. })));

        let mut empty = vec![];
        let err = CpuFragmentExtractor::new(&index).extract_batch(
            &queries,
            &mut empty,
            &mut rts,
            &mut ints,
        );
        assert!(matches!(err, Err(Error::BufferTooSmall { needed: 1, found: 0 })));
    }
}
