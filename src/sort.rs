//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::batch::{Batch, BatchStream, Batcher};
use crate::buffer::RecordBuffer;
use crate::chunk;
use crate::key::{KeyError, KeyExtractor};
use crate::merger::{ChunkSet, LinearScanMerger};
use crate::pool::{CancellationToken, WorkerPool};

/// Default number of records in a chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
/// Default number of records read ahead from every chunk during the merge.
pub const DEFAULT_WINDOW_SIZE: usize = 1_000;

const PROGRESS_STEP: u64 = 10;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Missing or invalid configuration.
    Config(String),
    /// A line could not be converted into a key.
    KeyExtraction(KeyError),
    /// Chunk or output file I/O error.
    IO(io::Error),
    /// Input data stream error.
    InputError(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Processing was cancelled.
    Cancelled,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::KeyExtraction(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Config(_) | SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::KeyExtraction(err) => write!(f, "key extraction failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<X: KeyExtractor> {
    /// Key extractor records are ordered by.
    key_extractor: Option<X>,
    /// Directory chunk files are stored in.
    chunk_dir: Option<PathBuf>,
    /// Maximum number of records in a chunk.
    batch_size: usize,
    /// Number of chunks sorted and dumped in parallel.
    workers: Option<usize>,
    /// Number of records read ahead from every chunk while merging, also the output burst size.
    window_size: usize,
    /// Chunk and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// External cancellation signal.
    cancellation: CancellationToken,
}

impl<X: KeyExtractor> ExternalSorterBuilder<X> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<X>, SortError> {
        let key_extractor = self
            .key_extractor
            .ok_or_else(|| SortError::Config("key extractor is not provided".to_owned()))?;
        let chunk_dir = self
            .chunk_dir
            .ok_or_else(|| SortError::Config("chunk directory is not provided".to_owned()))?;

        if self.batch_size == 0 {
            return Err(SortError::Config("batch size must be greater than 0".to_owned()));
        }
        if self.window_size == 0 {
            return Err(SortError::Config("window size must be greater than 0".to_owned()));
        }
        if self.rw_buf_size == Some(0) {
            return Err(SortError::Config("read/write buffer size must be greater than 0".to_owned()));
        }

        return Ok(ExternalSorter {
            key_extractor,
            chunk_dir,
            batch_size: self.batch_size,
            window_size: self.window_size,
            rw_buf_size: self.rw_buf_size,
            cancellation: self.cancellation,
            pool: WorkerPool::new(self.workers)?,
        });
    }

    /// Sets the function records are ordered by.
    pub fn with_key_extractor(mut self, key_extractor: X) -> ExternalSorterBuilder<X> {
        self.key_extractor = Some(key_extractor);
        return self;
    }

    /// Sets directory to be used to store chunk files.
    pub fn with_chunk_dir(mut self, path: &Path) -> ExternalSorterBuilder<X> {
        self.chunk_dir = Some(path.into());
        return self;
    }

    /// Sets maximum number of records in a chunk.
    pub fn with_batch_size(mut self, batch_size: usize) -> ExternalSorterBuilder<X> {
        self.batch_size = batch_size;
        return self;
    }

    /// Sets number of chunks to be sorted and saved in parallel.
    pub fn with_workers(mut self, workers: usize) -> ExternalSorterBuilder<X> {
        self.workers = Some(workers);
        return self;
    }

    /// Sets number of records kept in memory per chunk while merging.
    pub fn with_window_size(mut self, window_size: usize) -> ExternalSorterBuilder<X> {
        self.window_size = window_size;
        return self;
    }

    /// Sets chunk and output read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<X> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets a token cancelling the chunking phase when triggered.
    pub fn with_cancellation(mut self, token: CancellationToken) -> ExternalSorterBuilder<X> {
        self.cancellation = token;
        return self;
    }
}

impl<X: KeyExtractor> Default for ExternalSorterBuilder<X> {
    fn default() -> Self {
        ExternalSorterBuilder {
            key_extractor: None,
            chunk_dir: None,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: None,
            window_size: DEFAULT_WINDOW_SIZE,
            rw_buf_size: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Result of the chunking phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedChunks {
    paths: Vec<PathBuf>,
    rows: u64,
}

impl SortedChunks {
    /// Chunk file paths in the order they were saved.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of input rows.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

#[derive(Default)]
struct ChunkRegistry {
    last_index: usize,
    paths: Vec<PathBuf>,
}

/// External sorter.
pub struct ExternalSorter<X: KeyExtractor> {
    key_extractor: X,
    chunk_dir: PathBuf,
    batch_size: usize,
    window_size: usize,
    rw_buf_size: Option<usize>,
    cancellation: CancellationToken,
    pool: WorkerPool,
}

impl<X: KeyExtractor> ExternalSorter<X> {
    /// Sorts lines from the input and writes them to the output.
    ///
    /// # Arguments
    /// * `input` - Input lines to be sorted
    /// * `output` - Sorted lines destination
    pub fn sort<I, W>(&self, input: I, output: W) -> Result<(), SortError>
    where
        I: IntoIterator<Item = io::Result<String>>,
        W: Write,
    {
        let chunks = self.create_sorted_chunks(input)?;
        self.merge_sorted_chunks(&chunks, output)
    }

    /// Splits the input into sorted chunk files of at most `batch_size` records.
    ///
    /// Chunk files left in the chunk directory by a previous run are removed first. On error the chunks created so
    /// far are left on disk.
    pub fn create_sorted_chunks<I>(&self, input: I) -> Result<SortedChunks, SortError>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        chunk::clear_chunk_dir(&self.chunk_dir).map_err(SortError::IO)?;
        log::info!("creating sorted chunks in {}", self.chunk_dir.display());

        let cancel = self.cancellation.child_token();
        let batcher = Batcher::new(&self.key_extractor, self.batch_size)?;
        let mut batches = BatchStream::new(input.into_iter(), batcher, &cancel);
        let registry = Mutex::new(ChunkRegistry::default());

        self.pool
            .run(&mut batches, &cancel, |batch| self.save_chunk(batch, &registry))?;

        let ChunkRegistry { paths, .. } = registry.into_inner();
        log::info!("{} rows split into {} chunks", batches.rows(), paths.len());

        return Ok(SortedChunks {
            paths,
            rows: batches.rows(),
        });
    }

    fn save_chunk(&self, batch: Batch<X::Key>, registry: &Mutex<ChunkRegistry>) -> Result<(), SortError> {
        let (mut buffer, error) = batch.into_parts();
        if let Some(err) = error {
            return Err(SortError::KeyExtraction(err));
        }

        buffer.sort();

        let path = {
            let mut registry = registry.lock();
            registry.last_index += 1;
            chunk::chunk_path(&self.chunk_dir, registry.last_index)
        };

        log::debug!("saving chunk {} ({} records)", path.display(), buffer.len());
        chunk::dump(&buffer, &path, self.rw_buf_size).map_err(SortError::IO)?;

        registry.lock().paths.push(path);

        return Ok(());
    }

    /// Merges chunks produced by [`ExternalSorter::create_sorted_chunks`] into the output.
    pub fn merge_sorted_chunks<W: Write>(&self, chunks: &SortedChunks, output: W) -> Result<(), SortError> {
        self.merge(chunks.paths(), Some(chunks.rows()), output)
    }

    /// Merges sorted chunk files into the output. Chunks are deleted as soon as they are exhausted.
    ///
    /// # Arguments
    /// * `chunk_paths` - Sorted chunk files; on equal keys a chunk listed earlier is preferred
    /// * `output` - Sorted lines destination
    pub fn merge_chunks<P, W>(&self, chunk_paths: &[P], output: W) -> Result<(), SortError>
    where
        P: AsRef<Path>,
        W: Write,
    {
        self.merge(chunk_paths, None, output)
    }

    fn merge<P, W>(&self, chunk_paths: &[P], total_rows: Option<u64>, output: W) -> Result<(), SortError>
    where
        P: AsRef<Path>,
        W: Write,
    {
        let chunks = ChunkSet::open(chunk_paths, &self.key_extractor, self.window_size, self.rw_buf_size)?;
        let mut merger = LinearScanMerger::new(chunks, self.window_size);
        log::info!(
            "merging {} non-empty chunks of {} (window: {})",
            merger.active_chunks(),
            chunk_paths.len(),
            self.window_size
        );

        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output),
            None => io::BufWriter::new(output),
        };
        let mut output_buf = RecordBuffer::with_capacity(self.window_size);
        let mut progress = Progress::new(total_rows);

        while merger.next_into(&mut output_buf)? {
            progress.inc();
            if output_buf.is_full() {
                output_buf.write_to(&mut writer).map_err(SortError::IO)?;
                output_buf.reset();
            }
        }

        output_buf.write_to(&mut writer).map_err(SortError::IO)?;
        writer.flush().map_err(SortError::IO)?;

        log::info!("{} rows merged", progress.rows);

        return Ok(());
    }
}

/// Logs merge progress every [`PROGRESS_STEP`] percent of the expected rows.
struct Progress {
    rows: u64,
    total: Option<u64>,
    next_report: u64,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Progress {
            rows: 0,
            total,
            next_report: PROGRESS_STEP,
        }
    }

    fn inc(&mut self) {
        self.rows += 1;

        if let Some(total) = self.total.filter(|total| *total > 0) {
            let percent = self.rows * 100 / total;
            if percent >= self.next_report {
                log::debug!("merged {}/{} rows ({}%)", self.rows, total, percent);
                self.next_report = percent - percent % PROGRESS_STEP + PROGRESS_STEP;
            }
        }
    }
}
