//! Waiting for pipeline stages, so that no zombie outlives its pipeline.

use crate::flog::{FloggableDebug, FLOG};
use libc::{EXIT_SUCCESS, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WTERMSIG};
use std::num::NonZeroU32;

/// A type-safe equivalent to [`libc::pid_t`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Pid(NonZeroU32);

impl Pid {
    /// Returns None for pids that cannot name a child: zero and negative values.
    #[inline(always)]
    pub fn new(pid: libc::pid_t) -> Option<Self> {
        u32::try_from(pid).ok().and_then(NonZeroU32::new).map(Pid)
    }
    #[inline(always)]
    pub fn get(&self) -> i32 {
        self.0.get() as i32
    }
    #[inline(always)]
    pub fn as_pid_t(&self) -> libc::pid_t {
        #[allow(clippy::useless_conversion)]
        self.get().into()
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.get(), f)
    }
}

/// A ProcStatus is a value type that encapsulates logic around exited vs signaled.
/// It contains the raw status from waitpid(), or None if the status is unknown (the child had
/// already been collected by someone else).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcStatus(Option<i32>);

impl ProcStatus {
    /// Construct from a status returned from a waitpid call.
    pub fn from_waitpid(status: i32) -> ProcStatus {
        ProcStatus(Some(status))
    }

    /// Construct an empty status.
    pub fn empty() -> ProcStatus {
        ProcStatus(None)
    }

    /// Returns the raw `i32` status value, or 0 if empty.
    fn status(&self) -> i32 {
        self.0.unwrap_or(0)
    }

    /// If true, there is no actual status to report.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Return if we exited normally (not a signal).
    pub fn normal_exited(&self) -> bool {
        !self.is_empty() && WIFEXITED(self.status())
    }

    /// Return if we exited because of a signal.
    pub fn signal_exited(&self) -> bool {
        !self.is_empty() && WIFSIGNALED(self.status())
    }

    /// Return the signal code, given that we signal exited.
    pub fn signal_code(&self) -> Option<libc::c_int> {
        self.signal_exited().then(|| WTERMSIG(self.status()))
    }

    /// Return the exit code, given that we normal exited.
    pub fn exit_code(&self) -> Option<u8> {
        // WEXITSTATUS only ever yields the low byte.
        self.normal_exited()
            .then(|| WEXITSTATUS(self.status()) as u8)
    }

    /// Return if this status represents success.
    pub fn is_success(&self) -> bool {
        self.exit_code().map(i32::from) == Some(EXIT_SUCCESS)
    }

    /// Return the value a shell would put in `$?`: the exit code, or 128 plus the signal number.
    pub fn status_value(&self) -> Option<i32> {
        if let Some(sig) = self.signal_code() {
            Some(128 + sig)
        } else {
            self.exit_code().map(i32::from)
        }
    }
}

impl FloggableDebug for ProcStatus {}

#[derive(Debug)]
struct Child {
    pid: Pid,
    /// Set once the child has been waited for.
    status: Option<ProcStatus>,
}

/// The processes of one pipeline, in stage order.
///
/// Every child is waited for exactly once: either explicitly through [`reap_all`](Self::reap_all)
/// or when this is dropped. Close the descriptors that connect to the children before reaping
/// them, or a child blocked on its pipe will never exit.
#[derive(Debug, Default)]
pub struct ChildProcesses {
    children: Vec<Child>,
}

impl ChildProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ChildProcesses {
            children: Vec::with_capacity(capacity),
        }
    }

    /// Take responsibility for reaping `pid`.
    pub fn push(&mut self, pid: Pid) {
        self.children.push(Child { pid, status: None });
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.children.iter().map(|c| c.pid)
    }

    /// Whether every child has been waited for.
    pub fn all_reaped(&self) -> bool {
        self.children.iter().all(|c| c.status.is_some())
    }

    /// Block until every child not yet reaped has terminated. Returns the number of children
    /// reaped by this call; calling again never waits on the same pid twice.
    pub fn reap_all(&mut self) -> usize {
        let mut reaped = 0;
        for child in self.children.iter_mut().filter(|c| c.status.is_none()) {
            let status = wait_for(child.pid);
            FLOG!(
                proc_reap,
                "Reaped pid",
                child.pid,
                "with status",
                status
            );
            child.status = Some(status);
            reaped += 1;
        }
        reaped
    }

    /// The statuses of the children, in stage order. Children not yet reaped report an empty
    /// status.
    pub fn statuses(&self) -> Vec<ProcStatus> {
        self.children
            .iter()
            .map(|c| c.status.unwrap_or_default())
            .collect()
    }
}

impl Drop for ChildProcesses {
    fn drop(&mut self) {
        self.reap_all();
    }
}

/// Blocking waitpid(), repeated on EINTR.
fn wait_for(pid: Pid) -> ProcStatus {
    loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid.as_pid_t(), &mut status, 0) };
        if ret == pid.as_pid_t() {
            return ProcStatus::from_waitpid(status);
        }
        let err = errno::errno().0;
        if ret < 0 && err == libc::EINTR {
            continue;
        }
        // ECHILD: someone else collected it (e.g. SIGCHLD set to SIG_IGN). Nothing left to do.
        FLOG!(
            warning,
            "waitpid() for pid",
            pid,
            "failed:",
            errno::Errno(err)
        );
        return ProcStatus::empty();
    }
}
