//! Per-run execution options.

use crate::common::page_size;
use crate::error::{PipelineError, Result};
use once_cell::sync::Lazy;
use std::num::NonZeroUsize;

/// The initial size of output buffers: one page of virtual memory.
pub fn default_buffer_capacity() -> NonZeroUsize {
    static CAPACITY: Lazy<NonZeroUsize> =
        Lazy::new(|| NonZeroUsize::new(page_size()).unwrap_or(NonZeroUsize::MIN));
    *CAPACITY
}

/// How a pipeline's output is gathered.
///
/// Without a delimiter the output is collected eagerly into one buffer. With one, it is streamed
/// as records split on that byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    delimiter: Option<u8>,
    capacity: NonZeroUsize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            delimiter: None,
            capacity: default_buffer_capacity(),
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream records split on `delimiter`.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Stream records split on `delimiter`, which must fit in one byte.
    pub fn delimiter_char(self, delimiter: char) -> Result<Self> {
        if !delimiter.is_ascii() {
            return Err(PipelineError::InvalidArgument(format!(
                "delimiter {delimiter:?} is not a single byte"
            )));
        }
        Ok(self.delimiter(delimiter as u8))
    }

    /// Collect the whole output eagerly.
    pub fn eager(mut self) -> Self {
        self.delimiter = None;
        self
    }

    /// Set the initial buffer size. The buffer still grows as needed.
    pub fn capacity(mut self, capacity: usize) -> Result<Self> {
        let Some(capacity) = NonZeroUsize::new(capacity) else {
            return Err(PipelineError::InvalidArgument(
                "buffer capacity must be positive".to_owned(),
            ));
        };
        self.capacity = capacity;
        Ok(self)
    }

    pub fn get_delimiter(&self) -> Option<u8> {
        self.delimiter
    }

    pub fn get_capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}
