//! Forking one child per stage and wiring them together with pipes.

use crate::command_table::CommandTable;
use crate::error::{PipelineError, Result};
use crate::fds::{make_autoclose_pipes, AutoClosePipes};
use crate::flog::FLOG;
use crate::fork_exec::postfork::{child_exec, execute_fork, StageFds};
use crate::reap::{ChildProcesses, Pid};
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of children forked by this process, for logging.
static FORK_COUNT: AtomicUsize = AtomicUsize::new(0);

/// The resources of one running pipeline: the write end feeding the first stage, the read end
/// draining the last stage, and the children in stage order.
///
/// Dropping it closes both descriptors and then reaps every child.
#[derive(Debug)]
pub struct LaunchState {
    // Field order matters: descriptors close before children are reaped.
    input: Option<File>,
    output: File,
    children: ChildProcesses,
}

impl LaunchState {
    pub(crate) fn from_parts(input: Option<File>, output: File, children: ChildProcesses) -> Self {
        LaunchState {
            input,
            output,
            children,
        }
    }

    /// The pipeline's input descriptor, until it has been taken or closed.
    pub fn input_fd(&self) -> Option<BorrowedFd<'_>> {
        self.input.as_ref().map(AsFd::as_fd)
    }

    pub fn output_fd(&self) -> BorrowedFd<'_> {
        self.output.as_fd()
    }

    /// Take ownership of the input end. Dropping it signals end of input to the first stage.
    pub fn take_input(&mut self) -> Option<File> {
        self.input.take()
    }

    pub fn children(&self) -> &ChildProcesses {
        &self.children
    }

    /// Split into the output end and the children, closing the input end if still open.
    pub fn into_output(self) -> (File, ChildProcesses) {
        let LaunchState {
            input,
            output,
            children,
        } = self;
        drop(input);
        (output, children)
    }
}

/// Launch every stage of `table`.
///
/// On success the caller owns all descriptors and children. On failure nothing survives: every
/// descriptor opened so far is closed and every child forked so far is reaped before the error is
/// returned. A stage whose program cannot be executed is not a launch failure; it shows up as that
/// child's exit status.
pub fn launch(table: &CommandTable) -> Result<LaunchState> {
    // Declared first so it is dropped last on every early return.
    let mut children = ChildProcesses::with_capacity(table.len());

    let first = make_segment()?;
    let input = File::from(first.write);
    let mut current_input = first.read;

    for (index, stage) in table.stages().iter().enumerate() {
        // Carries this stage's output to the next stage, or to the caller.
        let segment = make_segment()?;

        let fds = StageFds {
            input: current_input.as_raw_fd(),
            output: segment.write.as_raw_fd(),
            owned: [
                current_input.as_raw_fd(),
                input.as_raw_fd(),
                segment.read.as_raw_fd(),
                segment.write.as_raw_fd(),
            ],
        };

        #[cfg(test)]
        fault::check(fault::Step::Fork)?;

        let pid = execute_fork().map_err(|errno| PipelineError::syscall("fork", errno))?;
        if pid == 0 {
            child_exec(stage, &fds);
        }

        // We are the parent.
        let Some(pid) = Pid::new(pid) else {
            unreachable!("fork() returned a negative pid without an error")
        };
        children.push(pid);
        let count = FORK_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        FLOG!(
            exec_fork,
            "Fork #",
            count,
            "pid",
            pid,
            "for stage",
            index,
            format!("'{}'", stage.program().to_string_lossy())
        );

        // The child has its own copies now.
        drop(segment.write);
        current_input = segment.read;
    }

    FLOG!(
        exec_pipe,
        "Launched",
        children.len(),
        "stages, input fd",
        input.as_raw_fd(),
        "output fd",
        current_input.as_raw_fd()
    );
    Ok(LaunchState {
        input: Some(input),
        output: File::from(current_input),
        children,
    })
}

fn make_segment() -> Result<AutoClosePipes> {
    #[cfg(test)]
    fault::check(fault::Step::Pipe)?;
    make_autoclose_pipes().map_err(|errno| PipelineError::syscall("pipe", errno))
}

/// Test-only failure injection for the launch loop.
#[cfg(test)]
pub(crate) mod fault {
    use crate::error::{PipelineError, Result};
    use nix::errno::Errno;
    use std::cell::Cell;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Step {
        /// Pipe creation. Index 0 is the pipeline's input pipe, index i + 1 the output pipe of
        /// stage i.
        Pipe,
        /// Forking stage i.
        Fork,
    }

    thread_local! {
        static INJECTED: Cell<Option<(Step, usize)>> = const { Cell::new(None) };
        static SEEN: Cell<usize> = const { Cell::new(0) };
    }

    /// Make the `occurrence`-th call of `step` fail during the next launch on this thread.
    pub fn inject(step: Step, occurrence: usize) {
        INJECTED.with(|f| f.set(Some((step, occurrence))));
        SEEN.with(|s| s.set(0));
    }

    pub fn clear() {
        INJECTED.with(|f| f.set(None));
    }

    pub(crate) fn check(step: Step) -> Result<()> {
        let Some((wanted, occurrence)) = INJECTED.with(Cell::get) else {
            return Ok(());
        };
        if wanted != step {
            return Ok(());
        }
        let seen = SEEN.with(|s| {
            let seen = s.get();
            s.set(seen + 1);
            seen
        });
        if seen != occurrence {
            return Ok(());
        }
        clear();
        Err(match step {
            Step::Pipe => PipelineError::syscall("pipe", Errno::EMFILE),
            Step::Fork => PipelineError::syscall("fork", Errno::EAGAIN),
        })
    }
}
