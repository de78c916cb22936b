//! The validated, immutable list of argument vectors a pipeline is launched from.

use crate::error::{PipelineError, Result};
use crate::null_terminated_array::OwningNullTerminatedArray;
use std::borrow::Cow;
use std::ffi::{c_char, CStr, CString, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// A value that can become one exec argument.
///
/// Both text and raw bytes are accepted. Every conversion produces an independently owned copy;
/// values with an interior NUL byte cannot be passed to exec and are rejected.
pub trait IntoArg {
    fn into_arg(self) -> Result<CString>;
}

fn arg_from_bytes(bytes: Vec<u8>) -> Result<CString> {
    CString::new(bytes).map_err(|err| {
        PipelineError::InvalidArgument(format!(
            "argument contains a NUL byte at offset {}",
            err.nul_position()
        ))
    })
}

impl IntoArg for &str {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self.as_bytes().to_vec())
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Result<CString> {
        self.as_str().into_arg()
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self.into_bytes())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self.to_vec())
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self.to_vec())
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self)
    }
}

impl IntoArg for &OsStr {
    fn into_arg(self) -> Result<CString> {
        self.as_bytes().into_arg()
    }
}

impl IntoArg for OsString {
    fn into_arg(self) -> Result<CString> {
        arg_from_bytes(self.into_vec())
    }
}

impl IntoArg for &Path {
    fn into_arg(self) -> Result<CString> {
        self.as_os_str().into_arg()
    }
}

impl IntoArg for PathBuf {
    fn into_arg(self) -> Result<CString> {
        self.into_os_string().into_arg()
    }
}

impl IntoArg for &CStr {
    fn into_arg(self) -> Result<CString> {
        Ok(self.to_owned())
    }
}

impl IntoArg for CString {
    fn into_arg(self) -> Result<CString> {
        Ok(self)
    }
}

/// A dynamically typed argument, as handed over by a binding layer that does not know its types
/// statically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgValue {
    Text(String),
    Bytes(Vec<u8>),
    /// Anything else; carries the name of its type for the error message.
    Other(String),
}

impl IntoArg for ArgValue {
    fn into_arg(self) -> Result<CString> {
        match self {
            ArgValue::Text(text) => text.into_arg(),
            ArgValue::Bytes(bytes) => bytes.into_arg(),
            ArgValue::Other(type_name) => Err(PipelineError::InvalidArgument(format!(
                "all exec args must be strings, got {type_name}"
            ))),
        }
    }
}

/// One program invocation: its argument vector, argv[0] being the program.
#[derive(Debug)]
pub struct Stage {
    argv: OwningNullTerminatedArray,
}

impl Stage {
    /// Build a stage from its arguments. Fails if there are none.
    pub fn new<I, A>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let argv = args
            .into_iter()
            .map(IntoArg::into_arg)
            .collect::<Result<Vec<_>>>()?;
        if argv.is_empty() {
            return Err(PipelineError::InvalidPipeline(
                "pipe argument with zero values".to_owned(),
            ));
        }
        Ok(Stage {
            argv: OwningNullTerminatedArray::new(argv),
        })
    }

    /// The program to run, as looked up in `$PATH`.
    pub fn program(&self) -> &CStr {
        // Construction guarantees at least one argument.
        self.argv.first().unwrap_or_default()
    }

    /// All arguments, including the program name.
    pub fn args(&self) -> impl Iterator<Item = &CStr> {
        self.argv.iter()
    }

    pub fn len(&self) -> usize {
        self.argv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// The null-terminated argv array for exec.
    pub(crate) fn argv_ptr(&self) -> *const *const c_char {
        self.argv.get()
    }
}

/// An ordered, non-empty list of stages. Immutable once built.
#[derive(Debug)]
pub struct CommandTable {
    stages: Box<[Stage]>,
}

impl CommandTable {
    /// Validate and copy a list of stages.
    ///
    /// Fails with [`PipelineError::InvalidPipeline`] if there are no stages or a stage has no
    /// arguments, and with [`PipelineError::InvalidArgument`] if an argument cannot be converted.
    /// Nothing built so far survives a failure.
    pub fn new<I, S, A>(stages: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(index, args)| {
                Stage::new(args).map_err(|err| match err {
                    PipelineError::InvalidPipeline(msg) => {
                        PipelineError::InvalidPipeline(format!("stage {index}: {msg}"))
                    }
                    PipelineError::InvalidArgument(msg) => {
                        PipelineError::InvalidArgument(format!("stage {index}: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_stages(stages)
    }

    /// Assemble a table from already built stages.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::InvalidPipeline(
                "pipe requires at least 1 stage".to_owned(),
            ));
        }
        Ok(CommandTable {
            stages: stages.into_boxed_slice(),
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Whether an argument must be quoted to read back as one word.
fn needs_quotes(arg: &[u8]) -> bool {
    arg.is_empty() || arg.iter().any(|c| matches!(c, b' ' | b'\t' | b'\n' | b'\r'))
}

/// Renders like a shell command line: stages joined by ` | `, arguments by spaces, and empty or
/// whitespace-containing arguments in single quotes. Embedded quotes are not escaped.
impl fmt::Display for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            for (j, arg) in stage.args().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                let bytes = arg.to_bytes();
                let text: Cow<'_, str> = String::from_utf8_lossy(bytes);
                if needs_quotes(bytes) {
                    write!(f, "'{text}'")?;
                } else {
                    f.write_str(&text)?;
                }
            }
        }
        Ok(())
    }
}
