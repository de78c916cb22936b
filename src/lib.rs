//! Run chains of external programs connected by pipes, feeding them from memory and reading their
//! output either all at once or as a stream of delimiter-separated records.
//!
//! Unix only. Every run owns its descriptors and child processes outright: they are closed and
//! reaped exactly once, on success, on error, and when a half-read stream is dropped.

#![cfg(unix)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]
#![allow(clippy::uninlined_format_args)]

pub mod collect;
pub mod command_table;
pub mod common;
pub mod error;
pub mod fds;
pub mod feed;
pub mod flog;
pub mod fork_exec;
pub mod launch;
pub mod null_terminated_array;
pub mod options;
pub mod pipeline;
pub mod reap;
pub mod record_reader;

pub use collect::{collect_output, Output};
pub use command_table::{ArgValue, CommandTable, IntoArg, Stage};
pub use error::{PipelineError, Result};
pub use feed::{feed_input, Payload};
pub use launch::{launch, LaunchState};
pub use options::{default_buffer_capacity, ExecOptions};
pub use pipeline::{OpenPipeline, Pipeline, PipelineOutput};
pub use reap::{ChildProcesses, Pid, ProcStatus};
pub use record_reader::RecordReader;

#[cfg(test)]
mod tests;
