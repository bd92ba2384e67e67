//! Chunk files.
//!
//! A chunk is a sorted segment of the input stored as a text file named `chunk_<index>.tsv`. During the merge a
//! chunk is read back through a window holding at most `k` of its not yet emitted records.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::buffer::{Record, RecordBuffer};
use crate::key::KeyExtractor;
use crate::sort::SortError;

const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_SUFFIX: &str = ".tsv";

/// Returns the path of the chunk file with the given index.
pub fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}{}{}", CHUNK_PREFIX, index, CHUNK_SUFFIX))
}

fn is_chunk_file_name(name: &str) -> bool {
    name.strip_prefix(CHUNK_PREFIX)
        .and_then(|rest| rest.strip_suffix(CHUNK_SUFFIX))
        .map_or(false, |index| index.parse::<usize>().is_ok())
}

/// Prepares a directory for a new chunking run: creates it if needed and removes chunk files left by a previous
/// run. Other files are kept.
pub fn clear_chunk_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let stale = entry.file_name().to_str().map_or(false, is_chunk_file_name);
        if stale && entry.file_type()?.is_file() {
            log::debug!("removing stale chunk {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }

    return Ok(());
}

/// Writes buffer lines to a new chunk file.
pub fn dump<K>(buffer: &RecordBuffer<K>, path: &Path, buf_size: Option<usize>) -> io::Result<()> {
    let chunk_file = fs::File::create(path)?;

    let mut chunk_writer = match buf_size {
        Some(buf_size) => io::BufWriter::with_capacity(buf_size, chunk_file),
        None => io::BufWriter::new(chunk_file),
    };

    buffer.write_to(&mut chunk_writer)?;
    chunk_writer.flush()?;

    return Ok(());
}

/// Chunk opened for merging.
pub struct Chunk<'a, X: KeyExtractor> {
    path: PathBuf,
    reader: io::BufReader<fs::File>,
    extractor: &'a X,
    window: RecordBuffer<X::Key>,
    line: String,
}

impl<'a, X: KeyExtractor> Chunk<'a, X> {
    /// Opens a chunk file and prefetches up to `window_size` records.
    pub fn open(
        path: impl Into<PathBuf>,
        extractor: &'a X,
        window_size: usize,
        buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let path = path.into();
        let chunk_file = fs::File::open(&path).map_err(SortError::IO)?;

        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, chunk_file),
            None => io::BufReader::new(chunk_file),
        };

        let mut chunk = Chunk {
            path,
            reader,
            extractor,
            window: RecordBuffer::with_capacity(window_size),
            line: String::new(),
        };
        chunk.pull(window_size)?;

        return Ok(chunk);
    }

    /// Reads up to `count` records into the window. Returns the number of records read, zero means the file is
    /// exhausted.
    pub fn pull(&mut self, count: usize) -> Result<usize, SortError> {
        let mut read = 0;

        while read < count {
            self.line.clear();
            if self.reader.read_line(&mut self.line).map_err(SortError::IO)? == 0 {
                break;
            }

            let line = self.line.strip_suffix('\n').unwrap_or(&self.line);
            self.window
                .push_str(line, self.extractor)
                .map_err(SortError::KeyExtraction)?;
            read += 1;
        }

        return Ok(read);
    }

    /// Returns the smallest not yet emitted record.
    pub fn head(&self) -> Option<&Record<X::Key>> {
        self.window.front()
    }

    /// Removes the head record. An emptied window has to be refilled with [`Chunk::pull`].
    pub fn pop_head(&mut self) -> Option<Record<X::Key>> {
        self.window.pop_front()
    }

    /// Hands a line allocation to the window, the next [`Chunk::pull`] reads into it.
    pub fn recycle(&mut self, line: String) {
        self.window.recycle(line);
    }

    /// Number of records in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the chunk file and deletes it.
    pub fn close(self) -> io::Result<()> {
        let Chunk { path, reader, .. } = self;
        drop(reader);

        log::debug!("removing exhausted chunk {}", path.display());
        fs::remove_file(&path)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::{chunk_path, clear_chunk_dir, dump, Chunk};
    use crate::buffer::RecordBuffer;
    use crate::key::{IntKey, TsvKey};
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_chunk(dir: &Path, index: usize, data: &[&str]) -> std::path::PathBuf {
        let mut buffer = RecordBuffer::with_capacity(data.len());
        for line in data {
            buffer.push_str(line, &IntKey).unwrap();
        }
        let path = chunk_path(dir, index);
        dump(&buffer, &path, None).unwrap();
        path
    }

    #[rstest]
    fn test_dump(tmp_dir: tempfile::TempDir) {
        let path = write_chunk(tmp_dir.path(), 1, &["3", "5"]);

        assert_eq!(path, tmp_dir.path().join("chunk_1.tsv"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "3\n5\n");
    }

    #[rstest]
    fn test_clear_chunk_dir(tmp_dir: tempfile::TempDir) {
        let dir = tmp_dir.path().join("chunks");
        clear_chunk_dir(&dir).unwrap();
        assert!(dir.is_dir());

        write_chunk(&dir, 1, &["1"]);
        write_chunk(&dir, 12, &["2"]);
        fs::write(dir.join("chunk_x.tsv"), "keep").unwrap();
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        clear_chunk_dir(&dir).unwrap();

        let mut left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["chunk_x.tsv", "notes.txt"]);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(10)]
    fn test_chunk_window(tmp_dir: tempfile::TempDir, #[case] window_size: usize) {
        let path = write_chunk(tmp_dir.path(), 1, &["1", "2", "3", "4", "5"]);
        let mut chunk = Chunk::open(&path, &IntKey, window_size, Some(16)).unwrap();
        assert_eq!(chunk.len(), window_size.min(5));

        let mut restored = Vec::new();
        loop {
            let head = chunk.head().cloned();
            match chunk.pop_head() {
                Some(record) => {
                    assert_eq!(Some(&record), head.as_ref());
                    restored.push(record.into_line());
                }
                None => {
                    if chunk.pull(window_size).unwrap() == 0 {
                        break;
                    }
                    assert!(chunk.len() <= window_size);
                }
            }
        }

        assert_eq!(restored, vec!["1", "2", "3", "4", "5"]);
        chunk.close().unwrap();
        assert!(!path.exists());
    }

    #[rstest]
    fn test_carriage_return_is_kept(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("chunk_1.tsv");
        fs::write(&path, "b\r\na\nc").unwrap();

        let key = TsvKey::new(0);
        let mut chunk = Chunk::open(&path, &key, 3, None).unwrap();
        let records: Vec<(String, String)> = std::iter::from_fn(|| chunk.pop_head())
            .map(|record| (record.key().clone(), record.into_line()))
            .collect();

        assert_eq!(
            records,
            vec![
                ("b\r".to_owned(), "b\r".to_owned()),
                ("a".to_owned(), "a".to_owned()),
                ("c".to_owned(), "c".to_owned()),
            ]
        );
    }

    #[rstest]
    fn test_pull_reads_into_recycled_line(tmp_dir: tempfile::TempDir) {
        let path = write_chunk(tmp_dir.path(), 1, &["1", "2"]);
        let mut chunk = Chunk::open(&path, &IntKey, 1, None).unwrap();

        let line = chunk.pop_head().unwrap().into_line();
        let allocation = line.as_ptr();
        chunk.recycle(line);

        assert_eq!(chunk.pull(1).unwrap(), 1);
        let head = chunk.head().unwrap();
        assert_eq!(head.line(), "2");
        assert_eq!(head.line().as_ptr(), allocation);
    }

    #[rstest]
    fn test_bad_line(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("chunk_1.tsv");
        fs::write(&path, "1\ntwo\n").unwrap();

        assert!(matches!(
            Chunk::open(&path, &IntKey, 3, None),
            Err(SortError::KeyExtraction(_))
        ));
    }

    #[rstest]
    fn test_missing_file(tmp_dir: tempfile::TempDir) {
        assert!(matches!(
            Chunk::open(tmp_dir.path().join("chunk_9.tsv"), &IntKey, 3, None),
            Err(SortError::IO(_))
        ));
    }
}
