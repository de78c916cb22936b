use crate::flog::FLOG;
use libc::{c_int, FD_CLOEXEC, F_GETFD, F_SETFD};
use nix::fcntl::FcntlArg;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// The first "high fd". Pipe segments are moved at or above it so they can never collide with
/// the stdio slots a stage is wired to.
pub const FIRST_HIGH_FD: RawFd = 10;

/// Helper type returned from make_autoclose_pipes.
#[derive(Debug)]
pub struct AutoClosePipes {
    /// Read end of the pipe.
    pub read: OwnedFd,

    /// Write end of the pipe.
    pub write: OwnedFd,
}

/// Construct a pair of connected pipes, set to close-on-exec.
pub fn make_autoclose_pipes() -> nix::Result<AutoClosePipes> {
    #[cfg(have_pipe2)]
    let (pipes, already_cloexec) = match nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC) {
        Ok(pipes) => (pipes, true),
        Err(err) => {
            FLOG!(warning, "An error occurred while setting up pipe:", err);
            return Err(err);
        }
    };
    #[cfg(not(have_pipe2))]
    let (pipes, already_cloexec) = match nix::unistd::pipe() {
        Ok(pipes) => (pipes, false),
        Err(err) => {
            FLOG!(warning, "An error occurred while setting up pipe:", err);
            return Err(err);
        }
    };

    // Ensure our fds are out of the user range.
    let read = heightenize_fd(pipes.0, already_cloexec)?;
    let write = heightenize_fd(pipes.1, already_cloexec)?;

    Ok(AutoClosePipes { read, write })
}

/// If the given fd is in the "user range", move it to a new fd in the "high range".
/// zsh calls this movefd().
/// `input_has_cloexec` describes whether the input has CLOEXEC already set, so we can avoid
/// setting it again.
/// Return the fd, which always has CLOEXEC set. On failure the input fd is closed.
fn heightenize_fd(fd: OwnedFd, input_has_cloexec: bool) -> nix::Result<OwnedFd> {
    let raw_fd = fd.as_raw_fd();

    if raw_fd >= FIRST_HIGH_FD {
        if !input_has_cloexec && set_cloexec(raw_fd, true) < 0 {
            return Err(nix::errno::Errno::last());
        }
        return Ok(fd);
    }

    // Here we are asking the kernel to give us a cloexec fd.
    let newfd = match nix::fcntl::fcntl(&fd, FcntlArg::F_DUPFD_CLOEXEC(FIRST_HIGH_FD)) {
        Ok(newfd) => newfd,
        Err(err) => {
            FLOG!(warning, "fcntl(F_DUPFD_CLOEXEC) failed:", err);
            return Err(err);
        }
    };

    Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}

/// Sets CLO_EXEC on a given fd according to the value of `should_set`.
pub fn set_cloexec(fd: RawFd, should_set: bool) -> c_int {
    // Note we don't want to overwrite existing flags like O_NONBLOCK which may be set. So fetch the
    // existing flags and modify them.
    let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
    if flags < 0 {
        return -1;
    }
    let mut new_flags = flags;
    if should_set {
        new_flags |= FD_CLOEXEC;
    } else {
        new_flags &= !FD_CLOEXEC;
    }
    if flags == new_flags {
        0
    } else {
        unsafe { libc::fcntl(fd, F_SETFD, new_flags) }
    }
}
