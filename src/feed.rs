//! Writing the caller's payload into the first stage.

use crate::common::write_loop;
use crate::error::Result;
use crate::flog::FLOG;
use crate::launch::LaunchState;

/// Data to feed to the first stage, if any. Text and bytes are both accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Payload<'a>(Option<&'a [u8]>);

impl<'a> Payload<'a> {
    /// No input: the first stage sees end of file immediately.
    pub fn none() -> Self {
        Payload(None)
    }

    pub fn bytes(&self) -> Option<&'a [u8]> {
        self.0
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Payload(Some(bytes))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Payload<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Payload(Some(bytes))
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Payload(Some(bytes))
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(text: &'a str) -> Self {
        Payload(Some(text.as_bytes()))
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(text: &'a String) -> Self {
        Payload(Some(text.as_bytes()))
    }
}

impl<'a, T> From<Option<T>> for Payload<'a>
where
    T: Into<Payload<'a>>,
{
    fn from(payload: Option<T>) -> Self {
        payload.map_or(Payload(None), Into::into)
    }
}

/// Write the whole payload to the pipeline's input, then close the input, whether or not there
/// was a payload. Short writes are continued until everything is written or a write fails.
///
/// The write blocks while the first stage is not reading; output is not drained concurrently, so
/// a payload larger than the pipe buffers can deadlock against a stage that fills its own output
/// before consuming all of its input.
pub fn feed_input(state: &mut LaunchState, payload: Payload<'_>) -> Result<()> {
    let Some(input) = state.take_input() else {
        return Ok(());
    };
    if let Some(bytes) = payload.bytes().filter(|b| !b.is_empty()) {
        let written = write_loop(&input, bytes).map_err(|err| {
            FLOG!(pipe_io, "Writing", bytes.len(), "bytes of input failed:", err);
            err
        })?;
        FLOG!(pipe_io, "Wrote", written, "bytes of input");
    }
    // Dropping the input sends EOF to the first stage.
    drop(input);
    Ok(())
}
