//! `line-ext-sort` is an external sort for newline-delimited text records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Pluggable keys:**
//!   lines are ordered by a key extracted from each of them. A whole-line integer key ([`IntKey`]) and a
//!   tab-separated field key ([`TsvKey`]) are provided, any `Fn(&str) -> Result<K, KeyError>` closure works too.
//! * **Bounded parallel chunking:**
//!   batches of `batch_size` lines are sorted and saved by at most `workers` threads at once. Reading the input
//!   waits for a free worker, so about `(workers + 1) * batch_size` records are in memory at any time.
//! * **Bounded merge:**
//!   chunks are merged back reading at most `window_size` records of each chunk at a time.
//! * **Cancellation:**
//!   chunking stops on the first failure or when a [`CancellationToken`] is triggered.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use line_ext_sort::{ExternalSorter, ExternalSorterBuilder, TsvKey};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.tsv").unwrap());
//!     let mut output_writer = io::BufWriter::new(fs::File::create("output.tsv").unwrap());
//!
//!     let sorter: ExternalSorter<TsvKey> = ExternalSorterBuilder::new()
//!         .with_key_extractor(TsvKey::new(1))
//!         .with_chunk_dir(path::Path::new("./chunks"))
//!         .with_batch_size(100_000)
//!         .with_workers(4)
//!         .with_window_size(1_000)
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(input_reader.lines(), &mut output_writer).unwrap();
//!     output_writer.flush().unwrap();
//! }
//! ```

pub mod batch;
pub mod buffer;
pub mod chunk;
pub mod key;
pub mod merger;
pub mod pool;
pub mod sort;

pub use buffer::{Record, RecordBuffer};
pub use chunk::Chunk;
pub use key::{IntKey, KeyError, KeyExtractor, TsvKey};
pub use merger::{ChunkSet, LinearScanMerger};
pub use pool::{CancellationToken, WorkerPool};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortedChunks};
