//! Batching stage.
//!
//! Groups a stream of input lines into buffers of a fixed size. A line whose key can't be extracted is left out of
//! its batch, and the batch carries the first such error to whoever processes it.

use std::io;
use std::mem;

use log;

use crate::buffer::RecordBuffer;
use crate::key::{KeyError, KeyExtractor};
use crate::pool::CancellationToken;
use crate::sort::SortError;

/// A batch of records emitted by the [`Batcher`].
pub struct Batch<K> {
    buffer: RecordBuffer<K>,
    error: Option<KeyError>,
}

impl<K> Batch<K> {
    fn new(size: usize) -> Self {
        Batch {
            buffer: RecordBuffer::with_capacity(size),
            error: None,
        }
    }

    /// Splits the batch into its records and the key extraction error of the first rejected line, if any.
    pub fn into_parts(self) -> (RecordBuffer<K>, Option<KeyError>) {
        (self.buffer, self.error)
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.error.is_none()
    }
}

/// Aggregates lines into batches of `size` records.
pub struct Batcher<'a, X: KeyExtractor> {
    extractor: &'a X,
    size: usize,
    current: Batch<X::Key>,
}

impl<'a, X: KeyExtractor> Batcher<'a, X> {
    pub fn new(extractor: &'a X, size: usize) -> Result<Self, SortError> {
        if size == 0 {
            // an unbuffered batcher gives nothing over processing lines one by one
            return Err(SortError::Config("batch size must be greater than 0".to_owned()));
        }

        return Ok(Batcher {
            extractor,
            size,
            current: Batch::new(size),
        });
    }

    /// Adds a line to the current batch. Returns the batch once it is full.
    pub fn push(&mut self, line: String) -> Option<Batch<X::Key>> {
        if let Err(err) = self.current.buffer.push_line(line, self.extractor) {
            log::warn!("skipping line: {}", err);
            self.current.error.get_or_insert(err);
        }

        if self.current.buffer.len() == self.size {
            return Some(mem::replace(&mut self.current, Batch::new(self.size)));
        }

        None
    }

    /// Returns the last, possibly short, batch. Nothing is returned if no line was added since the last emitted
    /// batch.
    pub fn finish(self) -> Option<Batch<X::Key>> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }
}

/// Iterator turning input lines into batches.
///
/// Cancellation is checked before every line is consumed; once observed the stream ends without emitting the
/// partial batch.
pub struct BatchStream<'a, I, X: KeyExtractor> {
    lines: I,
    batcher: Option<Batcher<'a, X>>,
    cancel: &'a CancellationToken,
    rows: u64,
}

impl<'a, I, X> BatchStream<'a, I, X>
where
    I: Iterator<Item = io::Result<String>>,
    X: KeyExtractor,
{
    pub fn new(lines: I, batcher: Batcher<'a, X>, cancel: &'a CancellationToken) -> Self {
        BatchStream {
            lines,
            batcher: Some(batcher),
            cancel,
            rows: 0,
        }
    }

    /// Number of lines consumed so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl<'a, I, X> Iterator for BatchStream<'a, I, X>
where
    I: Iterator<Item = io::Result<String>>,
    X: KeyExtractor,
{
    type Item = Result<Batch<X::Key>, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let batcher = self.batcher.as_mut()?;

            if self.cancel.is_cancelled() {
                log::debug!("input reading cancelled after {} rows", self.rows);
                self.batcher = None;
                return None;
            }

            match self.lines.next() {
                Some(Ok(line)) => {
                    self.rows += 1;
                    if let Some(batch) = batcher.push(line) {
                        return Some(Ok(batch));
                    }
                }
                Some(Err(err)) => {
                    self.batcher = None;
                    return Some(Err(SortError::InputError(err)));
                }
                None => return self.batcher.take().and_then(Batcher::finish).map(Ok),
            }
        }
    }
}
