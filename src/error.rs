//! The error type shared by every pipeline operation.

use nix::errno::Errno;
use std::fmt;
use std::io;

/// Everything that can go wrong while building, launching or draining a pipeline.
///
/// Construction errors ([`InvalidPipeline`](Self::InvalidPipeline) and
/// [`InvalidArgument`](Self::InvalidArgument)) are reported before any process exists. Launch and
/// I/O errors are only reported after every descriptor has been closed and every child reaped.
///
/// A command that fails to exec is not an error here: the child reports it on its own stderr and
/// exits non-zero, which is visible through the statuses collected while reaping.
#[derive(Debug)]
pub enum PipelineError {
    /// The list of stages is malformed, e.g. empty, or one stage has no arguments.
    InvalidPipeline(String),
    /// A supplied value cannot be used as a byte string.
    InvalidArgument(String),
    /// Creating a pipe, forking or duplicating a descriptor failed at launch time.
    SystemCallFailure { call: &'static str, errno: Errno },
    /// Reading from or writing to a pipeline descriptor failed.
    IoError(io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn syscall(call: &'static str, errno: Errno) -> Self {
        PipelineError::SystemCallFailure { call, errno }
    }

    /// The OS error number behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            PipelineError::SystemCallFailure { errno, .. } => Some(*errno as i32),
            PipelineError::IoError(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidPipeline(msg) => write!(f, "invalid pipeline: {msg}"),
            PipelineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            PipelineError::SystemCallFailure { call, errno } => {
                write!(f, "{call}(): [{}] {}", *errno as i32, errno.desc())
            }
            PipelineError::IoError(err) => write!(f, "pipeline I/O failed: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::SystemCallFailure { errno, .. } => Some(errno),
            PipelineError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        PipelineError::IoError(err)
    }
}
