//! Linear scan merger.

use std::path::Path;

use log;

use crate::buffer::{Record, RecordBuffer};
use crate::chunk::Chunk;
use crate::key::KeyExtractor;
use crate::sort::SortError;

/// Chunks still contributing to a merge.
pub struct ChunkSet<'a, X: KeyExtractor> {
    chunks: Vec<Chunk<'a, X>>,
}

impl<'a, X: KeyExtractor> ChunkSet<'a, X> {
    /// Opens every chunk in the given order, prefetching `window_size` records of each. Empty chunk files are
    /// deleted right away.
    pub fn open<P: AsRef<Path>>(
        paths: &[P],
        extractor: &'a X,
        window_size: usize,
        buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let mut chunks = Vec::with_capacity(paths.len());

        for path in paths {
            let chunk = Chunk::open(path.as_ref(), extractor, window_size, buf_size)?;
            if chunk.is_empty() {
                chunk.close().map_err(SortError::IO)?;
            } else {
                chunks.push(chunk);
            }
        }

        return Ok(ChunkSet { chunks });
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the index of the chunk with the smallest head key. On a tie the chunk met first wins.
    pub fn min_index(&self) -> Option<usize> {
        let mut min: Option<(usize, &X::Key)> = None;

        for (idx, chunk) in self.chunks.iter().enumerate() {
            let key = match chunk.head() {
                Some(head) => head.key(),
                None => continue,
            };
            let smaller = match min {
                Some((_, min_key)) => key < min_key,
                None => true,
            };
            if smaller {
                min = Some((idx, key));
            }
        }

        min.map(|(idx, _)| idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Chunk<'a, X>> {
        self.chunks.get_mut(idx)
    }

    /// Removes an exhausted chunk, closing and deleting its file. The last chunk takes its place.
    pub fn retire(&mut self, idx: usize) -> Result<(), SortError> {
        let chunk = self.chunks.swap_remove(idx);
        log::debug!("chunk {} exhausted, {} left", chunk.path().display(), self.chunks.len());
        chunk.close().map_err(SortError::IO)
    }
}

/// Merges multiple sorted chunks into a single sorted output.
/// Every step scans the heads of all active chunks, so the time complexity is *m* \* *n* where *m* is the number
/// of records and *n* is the number of chunks.
pub struct LinearScanMerger<'a, X: KeyExtractor> {
    chunks: ChunkSet<'a, X>,
    window_size: usize,
    failed: bool,
}

impl<'a, X: KeyExtractor> LinearScanMerger<'a, X> {
    /// Creates a merger over the chunks. Chunk records should be sorted in ascending order otherwise the result is
    /// undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged
    /// * `window_size` - Number of records read at once when a chunk window runs dry
    pub fn new(chunks: ChunkSet<'a, X>, window_size: usize) -> Self {
        LinearScanMerger {
            chunks,
            window_size,
            failed: false,
        }
    }

    /// Number of chunks not yet exhausted.
    pub fn active_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Moves the next record in ascending order to the back of `output`. One line allocation from the `output`
    /// free-list is handed to the chunk the record came from, so records released by `output` are read into again.
    /// Returns `false` once every chunk is exhausted.
    pub fn next_into(&mut self, output: &mut RecordBuffer<X::Key>) -> Result<bool, SortError> {
        if self.failed {
            return Ok(false);
        }

        match self.advance(Some(&mut *output)) {
            Ok(Some(record)) => {
                output.push(record);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn advance(&mut self, pool: Option<&mut RecordBuffer<X::Key>>) -> Result<Option<Record<X::Key>>, SortError> {
        let idx = match self.chunks.min_index() {
            Some(idx) => idx,
            None => return Ok(None),
        };

        let chunk = match self.chunks.get_mut(idx) {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        let record = chunk.pop_head();
        if let Some(line) = pool.and_then(RecordBuffer::take_spare) {
            chunk.recycle(line);
        }

        if chunk.is_empty() && chunk.pull(self.window_size)? == 0 {
            self.chunks.retire(idx)?;
        }

        return Ok(record);
    }
}

impl<'a, X: KeyExtractor> Iterator for LinearScanMerger<'a, X> {
    type Item = Result<Record<X::Key>, SortError>;

    /// Returns the next record in ascending order. The merger is done after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.advance(None) {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use rstest::*;

    use super::{ChunkSet, LinearScanMerger};
    use crate::buffer::{Record, RecordBuffer};
    use crate::chunk::chunk_path;
    use crate::key::{IntKey, TsvKey};
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_chunks(dir: &Path, chunks: &[Vec<&str>]) -> Vec<PathBuf> {
        chunks
            .iter()
            .enumerate()
            .map(|(idx, lines)| {
                let path = chunk_path(dir, idx + 1);
                let content: String = lines.iter().map(|line| format!("{}\n", line)).collect();
                fs::write(&path, content).unwrap();
                path
            })
            .collect()
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![
            vec!["4", "5", "7"],
            vec!["1", "6"],
            vec!["3"],
            vec![],
        ],
        vec!["1", "3", "4", "5", "6", "7"],
    )]
    #[case(
        vec![
            vec!["3", "5"],
            vec!["1", "8"],
        ],
        vec!["1", "3", "5", "8"],
    )]
    fn test_merger(
        tmp_dir: tempfile::TempDir,
        #[case] chunks: Vec<Vec<&str>>,
        #[case] expected_result: Vec<&str>,
    ) {
        for window_size in [1, 2, 10] {
            let paths = write_chunks(tmp_dir.path(), &chunks);

            let chunk_set = ChunkSet::open(&paths, &IntKey, window_size, None).unwrap();
            let merger = LinearScanMerger::new(chunk_set, window_size);
            let actual_result: Result<Vec<String>, _> = merger.map(|item| item.map(Record::into_line)).collect();

            assert_eq!(actual_result.unwrap(), expected_result, "window size {}", window_size);
            assert!(paths.iter().all(|path| !path.exists()));
        }
    }

    #[rstest]
    fn test_tie_break_follows_scan_order(tmp_dir: tempfile::TempDir) {
        // once the first chunk is gone the last one takes its place and wins the next tie
        let paths = write_chunks(
            tmp_dir.path(),
            &[vec!["a\t0"], vec!["b\t5", "b\t6"], vec!["c\t5", "c\t6"]],
        );
        let key = TsvKey::new(1);

        let chunk_set = ChunkSet::open(&paths, &key, 1, None).unwrap();
        assert_eq!(chunk_set.min_index(), Some(0));

        let actual_result: Vec<String> = LinearScanMerger::new(chunk_set, 1)
            .map(|item| item.unwrap().into_line())
            .collect();

        assert_eq!(actual_result, vec!["a\t0", "c\t5", "b\t5", "c\t6", "b\t6"]);
    }

    #[rstest]
    fn test_refill_error(tmp_dir: tempfile::TempDir) {
        let paths = write_chunks(tmp_dir.path(), &[vec!["1", "x"], vec!["2"]]);

        let chunk_set = ChunkSet::open(&paths, &IntKey, 1, None).unwrap();
        let mut merger = LinearScanMerger::new(chunk_set, 1);

        assert!(matches!(merger.next(), Some(Err(SortError::KeyExtraction(_)))));
        assert!(merger.next().is_none());
    }

    #[rstest]
    fn test_output_lines_return_to_chunks(tmp_dir: tempfile::TempDir) {
        let paths = write_chunks(tmp_dir.path(), &[vec!["1", "3", "5", "7"], vec!["2", "4", "6", "8"]]);

        let chunk_set = ChunkSet::open(&paths, &IntKey, 2, None).unwrap();
        let mut merger = LinearScanMerger::new(chunk_set, 2);
        let mut output = RecordBuffer::with_capacity(2);
        let mut written = Vec::new();
        let mut flushed = false;

        while merger.next_into(&mut output).unwrap() {
            // each record taken after a flush costs the output one released line
            if flushed {
                assert_eq!(output.spare_len() + output.len(), 2);
            }
            if output.is_full() {
                output.write_to(&mut written).unwrap();
                output.reset();
                assert_eq!(output.spare_len(), 2);
                flushed = true;
            }
        }

        assert!(output.is_empty());
        assert_eq!(written, b"1\n2\n3\n4\n5\n6\n7\n8\n");
        assert!(paths.iter().all(|path| !path.exists()));
    }

    #[rstest]
    fn test_next_into_takes_one_spare_line_per_record(tmp_dir: tempfile::TempDir) {
        let paths = write_chunks(tmp_dir.path(), &[vec!["1", "2"], vec!["3"]]);

        let chunk_set = ChunkSet::open(&paths, &IntKey, 1, None).unwrap();
        let mut merger = LinearScanMerger::new(chunk_set, 1);
        let mut output = RecordBuffer::with_capacity(2);
        output.recycle("spare".to_owned());
        output.recycle("spare".to_owned());

        assert!(merger.next_into(&mut output).unwrap());
        assert_eq!(output.spare_len(), 1);
        assert!(merger.next_into(&mut output).unwrap());
        assert_eq!(output.spare_len(), 0);
        output.reset();

        assert!(merger.next_into(&mut output).unwrap());
        assert!(!merger.next_into(&mut output).unwrap());
        assert_eq!(output.iter().map(Record::line).collect::<Vec<_>>(), vec!["3"]);
    }

    #[rstest]
    fn test_missing_chunk(tmp_dir: tempfile::TempDir) {
        let paths = vec![tmp_dir.path().join("chunk_1.tsv")];
        assert!(matches!(ChunkSet::open(&paths, &IntKey, 1, None), Err(SortError::IO(_))));
    }
}
