//! Record buffer implementation.

use std::collections::VecDeque;
use std::io::{self, prelude::*};

use rayon;
use rayon::slice::ParallelSliceMut;

use crate::key::{KeyError, KeyExtractor};

/// A raw line together with the key derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K> {
    line: String,
    key: K,
}

impl<K> Record<K> {
    pub fn new(line: String, key: K) -> Self {
        Record { line, key }
    }

    /// Returns the line exactly as it was read.
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn into_line(self) -> String {
        self.line
    }
}

/// Ordered record buffer with a target capacity.
///
/// Records are appended to the back and consumed from the front. Line allocations of removed records are kept
/// in a free-list owned by the buffer and reused by the following appends.
pub struct RecordBuffer<K> {
    capacity: usize,
    records: VecDeque<Record<K>>,
    spare: Vec<String>,
}

impl<K> RecordBuffer<K> {
    /// Creates a buffer preallocated for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        RecordBuffer {
            capacity,
            records: VecDeque::with_capacity(capacity),
            spare: Vec::new(),
        }
    }

    /// Adds a record to the back of the buffer.
    pub fn push(&mut self, record: Record<K>) {
        self.records.push_back(record);
    }

    /// Extracts a key from the line and adds the result to the back of the buffer.
    /// The line is not added if key extraction fails.
    pub fn push_line<X>(&mut self, line: String, extractor: &X) -> Result<(), KeyError>
    where
        X: KeyExtractor<Key = K> + ?Sized,
    {
        let key = extractor.extract(&line)?;
        self.records.push_back(Record::new(line, key));
        Ok(())
    }

    /// Same as [`RecordBuffer::push_line`] but copies the line into a recycled allocation.
    pub fn push_str<X>(&mut self, line: &str, extractor: &X) -> Result<(), KeyError>
    where
        X: KeyExtractor<Key = K> + ?Sized,
    {
        let key = extractor.extract(line)?;
        let mut owned = self.spare.pop().unwrap_or_default();
        owned.clear();
        owned.push_str(line);
        self.records.push_back(Record::new(owned, key));
        Ok(())
    }

    pub fn get(&self, idx: usize) -> Option<&Record<K>> {
        self.records.get(idx)
    }

    pub fn front(&self) -> Option<&Record<K>> {
        self.get(0)
    }

    /// Removes the first record.
    pub fn pop_front(&mut self) -> Option<Record<K>> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Checks if the buffer reached its capacity.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Drops all the records keeping their storage for reuse.
    pub fn reset(&mut self) {
        let mut records = std::mem::take(&mut self.records);
        for record in records.drain(..) {
            self.recycle(record.line);
        }
        self.records = records;
    }

    /// Returns a line allocation to the free-list. The free-list holds at most `capacity` lines, extra ones are
    /// dropped.
    pub fn recycle(&mut self, line: String) {
        if self.spare.len() < self.capacity {
            self.spare.push(line);
        }
    }

    /// Takes a line allocation from the free-list.
    pub fn take_spare(&mut self) -> Option<String> {
        self.spare.pop()
    }

    #[cfg(test)]
    pub(crate) fn spare_len(&self) -> usize {
        self.spare.len()
    }

    /// Writes record lines in buffer order, one per line.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for record in self.records.iter() {
            writer.write_all(record.line.as_bytes())?;
            writer.write_all(b"\n")?;
        }

        return Ok(());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record<K>> {
        self.records.iter()
    }
}

impl<K: Ord + Send> RecordBuffer<K> {
    /// Sorts records by key. Records with equal keys may be reordered.
    pub fn sort(&mut self) {
        self.par_sort_unstable_by(|a, b| a.key.cmp(&b.key));
    }
}

impl<K> IntoIterator for RecordBuffer<K> {
    type Item = Record<K>;
    type IntoIter = <VecDeque<Record<K>> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<K: Send> rayon::slice::ParallelSliceMut<Record<K>> for RecordBuffer<K> {
    fn as_parallel_slice_mut(&mut self) -> &mut [Record<K>] {
        self.records.make_contiguous()
    }
}

#[cfg(test)]
mod test {
    use crate::key::{IntKey, KeyError, TsvKey};

    use super::{Record, RecordBuffer};

    fn lines<K>(buffer: &RecordBuffer<K>) -> Vec<&str> {
        buffer.iter().map(Record::line).collect()
    }

    #[test]
    fn test_record_buffer() {
        let mut buffer = RecordBuffer::with_capacity(2);

        buffer.push_line("8".to_owned(), &IntKey).unwrap();
        assert_eq!(buffer.is_full(), false);
        buffer.push_line("-1".to_owned(), &IntKey).unwrap();
        assert_eq!(buffer.is_full(), true);

        assert_eq!(buffer.get(1).map(Record::key), Some(&-1));
        assert_eq!(buffer.get(2), None);

        let data = Vec::from_iter(buffer.into_iter().map(Record::into_line));
        assert_eq!(data, vec!["8", "-1"]);
    }

    #[test]
    fn test_push_rejects_bad_key() {
        let mut buffer = RecordBuffer::with_capacity(4);

        buffer.push_line("1".to_owned(), &IntKey).unwrap();
        let err = buffer.push_line("one".to_owned(), &IntKey).unwrap_err();

        assert!(matches!(err, KeyError::InvalidInteger { .. }));
        assert_eq!(lines(&buffer), vec!["1"]);
    }

    #[test]
    fn test_sort_and_pop_front() {
        let mut buffer = RecordBuffer::with_capacity(4);
        for line in ["b\t3", "a\t1", "c\t2"] {
            buffer.push_str(line, &TsvKey::new(1)).unwrap();
        }

        buffer.sort();
        assert_eq!(lines(&buffer), vec!["a\t1", "c\t2", "b\t3"]);

        assert_eq!(buffer.pop_front().map(Record::into_line), Some("a\t1".to_owned()));
        assert_eq!(buffer.front().map(Record::line), Some("c\t2"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_reset_keeps_storage() {
        let mut buffer = RecordBuffer::with_capacity(2);
        buffer.push_str("1", &IntKey).unwrap();
        buffer.push_str("2", &IntKey).unwrap();

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.spare_len(), 2);

        buffer.push_str("3", &IntKey).unwrap();
        assert_eq!(buffer.spare_len(), 1);
        assert_eq!(lines(&buffer), vec!["3"]);
    }

    #[test]
    fn test_recycled_line_is_reused() {
        let mut donor = RecordBuffer::with_capacity(1);
        donor.push_str("12345678", &IntKey).unwrap();
        let line = donor.pop_front().unwrap().into_line();
        let allocation = line.as_ptr();

        let mut buffer = RecordBuffer::with_capacity(1);
        buffer.recycle(line);
        buffer.recycle("dropped".to_owned());
        assert_eq!(buffer.spare_len(), 1);

        buffer.push_str("42", &IntKey).unwrap();
        assert_eq!(buffer.spare_len(), 0);
        assert_eq!(buffer.front().map(|record| record.line().as_ptr()), Some(allocation));
        assert_eq!(lines(&buffer), vec!["42"]);
    }

    #[test]
    fn test_write_to() {
        let mut buffer = RecordBuffer::with_capacity(3);
        for line in ["3", "1", "2"] {
            buffer.push_str(line, &IntKey).unwrap();
        }

        let mut output = Vec::new();
        buffer.write_to(&mut output).unwrap();
        assert_eq!(output, b"3\n1\n2\n");
    }
}
