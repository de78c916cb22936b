//! Eager collection: read the pipeline's output to the end, then reap.

use crate::common::read_loop;
use crate::error::Result;
use crate::flog::FLOG;
use crate::launch::LaunchState;
use crate::reap::ProcStatus;
use std::num::NonZeroUsize;

/// Everything a pipeline produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// What the last stage wrote to its stdout.
    pub stdout: Vec<u8>,
    /// One entry per stage, in stage order. A stage that could not be executed shows up here
    /// with a non-zero exit code; it is never reported as an error.
    pub statuses: Vec<ProcStatus>,
}

impl Output {
    /// Whether every stage exited with status 0.
    pub fn success(&self) -> bool {
        self.statuses.iter().all(ProcStatus::is_success)
    }
}

/// Read the output end until end of file into a buffer that starts at `capacity` bytes and
/// doubles whenever a read fills it, then close the output and reap every child.
///
/// The input end is closed first if the caller has not done so. On a read error the children are
/// still reaped before the error is returned.
pub fn collect_output(state: LaunchState, capacity: NonZeroUsize) -> Result<Output> {
    let (output, mut children) = state.into_output();
    let mut buf = vec![0u8; capacity.get()];
    let mut len = 0;
    let result = loop {
        let avail = buf.len() - len;
        match read_loop(&output, &mut buf[len..]) {
            Ok(0) => break Ok(()),
            Ok(amt) => {
                len += amt;
                if amt == avail {
                    let cap = buf.len() * 2;
                    FLOG!(pipe_io, "Growing output buffer to", cap, "bytes");
                    buf.resize(cap, 0);
                }
            }
            Err(err) => break Err(err),
        }
    };

    // Close before reaping: a stage still writing must see the reader go away.
    drop(output);
    children.reap_all();
    result?;

    buf.truncate(len);
    FLOG!(pipe_io, "Collected", len, "bytes from", children.len(), "stages");
    Ok(Output {
        stdout: buf,
        statuses: children.statuses(),
    })
}
