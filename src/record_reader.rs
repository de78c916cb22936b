//! Lazy collection: the pipeline's output as a stream of delimiter-separated records.

use crate::common::read_loop;
use crate::error::{PipelineError, Result};
use crate::flog::FLOG;
use crate::launch::LaunchState;
use crate::reap::{ChildProcesses, ProcStatus};
use std::fs::File;
use std::iter::FusedIterator;
use std::num::NonZeroUsize;

/// Reads the output of a pipeline on demand and splits it on a single delimiter byte.
///
/// Records do not include the delimiter. Output that does not end in a delimiter yields one last,
/// partial record; output that does end in one yields no trailing empty record. After the end of
/// the output, or after a read error, the reader is exhausted for good.
///
/// The output descriptor is closed and every stage reaped as soon as the reader is exhausted, or
/// when it is dropped.
#[derive(Debug)]
pub struct RecordReader {
    output: Option<File>,
    children: ChildProcesses,
    /// The whole buffer is allocated; `buf.len()` is its capacity.
    buf: Vec<u8>,
    /// First unconsumed byte.
    cursor: usize,
    /// Number of unconsumed bytes starting at `cursor`.
    len: usize,
    /// Number of unconsumed bytes already known not to contain the delimiter.
    searched: usize,
    delimiter: u8,
    exhausted: bool,
}

impl RecordReader {
    /// Wrap a launched pipeline. The input end is closed if still open.
    pub fn new(state: LaunchState, delimiter: u8, capacity: NonZeroUsize) -> Self {
        let (output, children) = state.into_output();
        RecordReader {
            output: Some(output),
            children,
            buf: vec![0; capacity.get()],
            cursor: 0,
            len: 0,
            searched: 0,
            delimiter,
            exhausted: false,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current size of the read buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Produce the next record, or None once the output is exhausted.
    ///
    /// An I/O error is returned once; the reader is exhausted afterwards.
    pub fn next_record(&mut self) -> Option<Result<Vec<u8>>> {
        if self.exhausted {
            return None;
        }
        loop {
            debug_assert!(self.cursor + self.len <= self.buf.len());
            if let Some(record) = self.find() {
                return Some(Ok(record));
            }

            if self.cursor + self.len == self.buf.len() {
                self.make_room();
            }
            let end = self.cursor + self.len;
            let Some(output) = self.output.as_ref() else {
                self.finish();
                return None;
            };
            match read_loop(output, &mut self.buf[end..]) {
                Ok(0) => {
                    let rest = (self.len > 0).then(|| self.take(self.len, 0));
                    self.finish();
                    return rest.map(Ok);
                }
                Ok(amt) => self.len += amt,
                Err(err) => {
                    FLOG!(pipe_io, "Reading pipeline output failed:", err);
                    self.finish();
                    return Some(Err(PipelineError::IoError(err)));
                }
            }
        }
    }

    /// Look for the delimiter in the unconsumed window and split off the record before it.
    fn find(&mut self) -> Option<Vec<u8>> {
        let window = &self.buf[self.cursor + self.searched..self.cursor + self.len];
        match window.iter().position(|&c| c == self.delimiter) {
            Some(pos) => Some(self.take(self.searched + pos, 1)),
            None => {
                self.searched = self.len;
                None
            }
        }
    }

    /// Remove `amt` bytes plus `skip` delimiter bytes from the front of the window, returning the
    /// `amt` bytes.
    fn take(&mut self, amt: usize, skip: usize) -> Vec<u8> {
        let record = self.buf[self.cursor..self.cursor + amt].to_vec();
        self.cursor += amt + skip;
        self.len -= amt + skip;
        self.searched = 0;
        if self.len == 0 {
            self.cursor = 0;
        }
        record
    }

    /// There is no space after the window. Move the window to the front if it is not already
    /// there; otherwise the window fills the whole buffer, so double it.
    fn make_room(&mut self) {
        if self.cursor > 0 {
            FLOG!(
                record_reader,
                "Shifting",
                self.len,
                "bytes from offset",
                self.cursor
            );
            self.buf.copy_within(self.cursor..self.cursor + self.len, 0);
            self.cursor = 0;
        } else {
            let cap = self.buf.len() * 2;
            FLOG!(record_reader, "Growing buffer to", cap, "bytes");
            self.buf.resize(cap, 0);
        }
    }

    /// Mark exhausted, close the output and reap the stages. Safe to call repeatedly.
    fn finish(&mut self) {
        self.exhausted = true;
        self.len = 0;
        self.cursor = 0;
        // Close before reaping so a stage still writing gets EPIPE instead of blocking.
        self.output = None;
        self.children.reap_all();
    }

    /// Stop reading, release everything, and return the statuses of the stages.
    pub fn close(mut self) -> Vec<ProcStatus> {
        self.finish();
        self.children.statuses()
    }

    /// The stage statuses, once the reader is exhausted. Empty statuses before that.
    pub fn statuses(&self) -> Vec<ProcStatus> {
        self.children.statuses()
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

impl FusedIterator for RecordReader {}

impl Drop for RecordReader {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::RecordReader;
    use crate::common::write_loop;
    use crate::fds::make_autoclose_pipes;
    use crate::launch::LaunchState;
    use crate::reap::ChildProcesses;
    use crate::tests::prelude::*;
    use std::fs::File;
    use std::num::NonZeroUsize;

    fn reader_over(data: &[u8], delimiter: u8, capacity: usize) -> RecordReader {
        let pipes = make_autoclose_pipes().unwrap();
        write_loop(&pipes.write, data).unwrap();
        drop(pipes.write);
        let state = LaunchState::from_parts(None, File::from(pipes.read), ChildProcesses::new());
        RecordReader::new(state, delimiter, NonZeroUsize::new(capacity).unwrap())
    }

    fn records(reader: RecordReader) -> Vec<String> {
        reader
            .map(|r| String::from_utf8(r.unwrap()).unwrap())
            .collect()
    }

    #[test]
    #[serial]
    fn test_trailing_partial_record() {
        test_init();
        let reader = reader_over(b"a\nb\nc", b'\n', 4096);
        assert_eq!(records(reader), ["a", "b", "c"]);
    }

    #[test]
    #[serial]
    fn test_no_trailing_empty_record() {
        test_init();
        let reader = reader_over(b"a\nb\n", b'\n', 4096);
        assert_eq!(records(reader), ["a", "b"]);
    }

    #[test]
    #[serial]
    fn test_empty_records_kept() {
        test_init();
        let reader = reader_over(b"\n\nx\n\n", b'\n', 4096);
        assert_eq!(records(reader), ["", "", "x", ""]);
    }

    #[test]
    #[serial]
    fn test_empty_output() {
        test_init();
        let mut reader = reader_over(b"", b'\n', 16);
        assert!(reader.next_record().is_none());
        assert!(reader.is_exhausted());
    }

    #[test]
    #[serial]
    fn test_exhausted_stays_exhausted() {
        test_init();
        let mut reader = reader_over(b"only", b'\n', 16);
        assert_eq!(reader.next_record().unwrap().unwrap(), b"only");
        for _ in 0..3 {
            assert!(reader.next_record().is_none());
        }
    }

    #[test]
    #[serial]
    fn test_buffer_grows_for_long_record() {
        test_init();
        let long = "x".repeat(100);
        let data = format!("{long},y,{long}");
        let mut reader = reader_over(data.as_bytes(), b',', 2);
        assert_eq!(reader.next_record().unwrap().unwrap(), long.as_bytes());
        assert!(reader.capacity() >= 101);
        let cap = reader.capacity();
        assert_eq!(reader.next_record().unwrap().unwrap(), b"y");
        assert_eq!(reader.next_record().unwrap().unwrap(), long.as_bytes());
        assert!(reader.next_record().is_none());
        // Growth only happens when the window fills the whole buffer.
        assert_eq!(reader.capacity(), cap);
    }

    #[test]
    #[serial]
    fn test_shift_preferred_over_growth() {
        test_init();
        // With a 4 byte buffer, "ab;c" is read in one go, "ab" consumed, and "c" shifted to the
        // front before the next read rather than growing the buffer.
        let mut reader = reader_over(b"ab;cd;ef", b';', 4);
        assert_eq!(reader.next_record().unwrap().unwrap(), b"ab");
        assert_eq!(reader.next_record().unwrap().unwrap(), b"cd");
        assert_eq!(reader.next_record().unwrap().unwrap(), b"ef");
        assert!(reader.next_record().is_none());
        assert_eq!(reader.capacity(), 4);
    }

    #[test]
    #[serial]
    fn test_nul_delimiter() {
        test_init();
        let reader = reader_over(b"one\0two\0", 0, 8);
        assert_eq!(records(reader), ["one", "two"]);
    }

    #[test]
    #[serial]
    fn test_close_early() {
        test_init();
        let mut reader = reader_over(b"1\n2\n3\n", b'\n', 8);
        assert_eq!(reader.next_record().unwrap().unwrap(), b"1");
        assert!(reader.close().is_empty());
    }
}
