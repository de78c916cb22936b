//! The pipeline object: a validated command table plus the ways to run it.

use crate::collect::{collect_output, Output};
use crate::command_table::{CommandTable, IntoArg};
use crate::error::Result;
use crate::feed::{feed_input, Payload};
use crate::flog::{self, FLOG};
use crate::launch::{launch, LaunchState};
use crate::options::ExecOptions;
use crate::reap::Pid;
use crate::record_reader::RecordReader;
use std::fmt;
use std::os::fd::BorrowedFd;

/// A chain of external programs, each one's stdout connected to the next one's stdin.
///
/// The command list is fixed at construction. Every run launches fresh processes, and every run
/// closes all of its descriptors and reaps all of its processes before returning an error, or when
/// its output has been consumed or dropped.
///
/// ```no_run
/// use pipelay::Pipeline;
///
/// let upper = Pipeline::new([vec!["cat"], vec!["tr", "a-z", "A-Z"]])?;
/// assert_eq!(upper.capture("abc")?, b"ABC");
/// assert_eq!(upper.to_string(), "cat | tr a-z A-Z");
/// # Ok::<(), pipelay::PipelineError>(())
/// ```
#[derive(Debug)]
pub struct Pipeline {
    table: CommandTable,
}

/// The result of [`Pipeline::run`].
#[derive(Debug)]
pub enum PipelineOutput {
    /// The whole output, when no delimiter was given.
    Captured(Vec<u8>),
    /// The output as a stream of records, when a delimiter was given.
    Records(RecordReader),
}

impl Pipeline {
    /// Build a pipeline from a list of stages, each a list of arguments.
    pub fn new<I, S, A>(stages: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = A>,
        A: IntoArg,
    {
        Ok(Self::from_table(CommandTable::new(stages)?))
    }

    pub fn from_table(table: CommandTable) -> Self {
        Pipeline { table }
    }

    pub fn commands(&self) -> &CommandTable {
        &self.table
    }

    /// Launch the stages and feed them `input`. The input end is closed afterwards either way.
    fn start(&self, input: Payload<'_>) -> Result<LaunchState> {
        flog::init_from_env();
        FLOG!(exec_job, "Running pipeline:", self);
        let mut state = launch(&self.table)?;
        // On error, dropping the state closes the output and reaps the stages.
        feed_input(&mut state, input)?;
        Ok(state)
    }

    /// Run the pipeline once, collecting the output eagerly or streaming it as records depending on
    /// whether `options` carries a delimiter.
    pub fn run<'a>(
        &self,
        input: impl Into<Payload<'a>>,
        options: &ExecOptions,
    ) -> Result<PipelineOutput> {
        let state = self.start(input.into())?;
        Ok(match options.get_delimiter() {
            None => PipelineOutput::Captured(
                collect_output(state, options.get_capacity())?.stdout,
            ),
            Some(delimiter) => PipelineOutput::Records(RecordReader::new(
                state,
                delimiter,
                options.get_capacity(),
            )),
        })
    }

    /// Run the pipeline and return everything the last stage wrote.
    pub fn capture<'a>(&self, input: impl Into<Payload<'a>>) -> Result<Vec<u8>> {
        self.output(input, &ExecOptions::default())
            .map(|out| out.stdout)
    }

    /// Run the pipeline eagerly, keeping the exit status of every stage along with the output.
    /// The delimiter in `options` is ignored.
    pub fn output<'a>(&self, input: impl Into<Payload<'a>>, options: &ExecOptions) -> Result<Output> {
        let state = self.start(input.into())?;
        collect_output(state, options.get_capacity())
    }

    /// Run the pipeline and read its output lazily, one `delimiter`-terminated record at a time.
    pub fn records<'a>(
        &self,
        input: impl Into<Payload<'a>>,
        delimiter: u8,
    ) -> Result<RecordReader> {
        let options = ExecOptions::default().delimiter(delimiter);
        match self.run(input, &options)? {
            PipelineOutput::Records(reader) => Ok(reader),
            PipelineOutput::Captured(_) => unreachable!("a delimiter always selects streaming"),
        }
    }

    /// Launch the pipeline without feeding or reading it.
    ///
    /// The returned handle only exposes the descriptors; it does not read or write them itself.
    pub fn open(&self) -> Result<OpenPipeline> {
        flog::init_from_env();
        FLOG!(exec_job, "Opening pipeline:", self);
        Ok(OpenPipeline {
            state: launch(&self.table)?,
        })
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.table.fmt(f)
    }
}

/// A launched pipeline whose input and output are left to the caller.
///
/// Dropping it closes both ends and reaps every stage.
#[derive(Debug)]
pub struct OpenPipeline {
    state: LaunchState,
}

impl OpenPipeline {
    /// The write end feeding the first stage.
    pub fn input_fd(&self) -> Option<BorrowedFd<'_>> {
        self.state.input_fd()
    }

    /// The read end draining the last stage.
    pub fn output_fd(&self) -> BorrowedFd<'_> {
        self.state.output_fd()
    }

    /// Process ids of the stages, in stage order.
    pub fn pids(&self) -> Vec<Pid> {
        self.state.children().pids().collect()
    }

    /// Hand over the descriptors and children, e.g. to [`collect_output`] or [`RecordReader::new`].
    pub fn into_launch_state(self) -> LaunchState {
        self.state
    }
}
