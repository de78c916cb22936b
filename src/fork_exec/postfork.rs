// The stuff that happens after fork.
// Everything here that runs in the child must be async-signal safe.
// That means no locking, no allocating, no freeing memory, etc!
use super::flog_safe::{SafeLine, FLOG_SAFE};
use crate::command_table::Stage;
use crate::common::exit_without_destructors;
use crate::flog::{get_flog_file_fd, should_flog, FLOG};
use libc::{pid_t, EACCES, ENOENT, ENOEXEC, ENOTDIR, STDIN_FILENO, STDOUT_FILENO};
use nix::errno::Errno;
use std::ffi::CStr;
use std::os::fd::RawFd;
use std::time::Duration;

/// The number of times to try to call fork() before giving up.
const FORK_LAPS: usize = 5;

/// The number of nanoseconds to sleep between attempts to call fork().
const FORK_SLEEP_TIME: Duration = Duration::from_nanos(1000000);

/// Exit status of a stage whose program could not be found.
pub const STATUS_CMD_UNKNOWN: i32 = 127;

/// Exit status of a stage whose program exists but could not be executed.
pub const STATUS_NOT_EXECUTABLE: i32 = 126;

/// Descriptors a stage's child is wired with.
#[derive(Clone, Copy, Debug)]
pub struct StageFds {
    /// Becomes the child's stdin.
    pub input: RawFd,
    /// Becomes the child's stdout.
    pub output: RawFd,
    /// Every raw descriptor of this launch step, closed in the child once stdio is wired.
    pub owned: [RawFd; 4],
}

/// This function is a wrapper around fork. If the fork calls fails with EAGAIN, it is retried
/// FORK_LAPS times, with a very slight delay between each lap.
/// Returns 0 in the child and the child's pid in the parent.
pub fn execute_fork() -> Result<pid_t, Errno> {
    let mut err = Errno::UnknownErrno;
    for i in 0..FORK_LAPS {
        let pid = unsafe { libc::fork() };
        if pid >= 0 {
            return Ok(pid);
        }
        err = Errno::last();
        if err != Errno::EAGAIN {
            break;
        }
        // Don't sleep on the final lap
        if i != FORK_LAPS - 1 {
            std::thread::sleep(FORK_SLEEP_TIME);
        }
    }

    match err {
        Errno::EAGAIN => FLOG!(error, "fork: Out of resources. Check RLIMIT_NPROC and pid_max."),
        Errno::ENOMEM => FLOG!(error, "fork: Out of memory."),
        _ => FLOG!(error, "fork: Unknown error number", err as i32),
    }
    Err(err)
}

/// Wire stdin and stdout in the child, close the launch step's descriptors, and put SIGPIPE back
/// to its default so a stage whose reader went away terminates like it would under a shell.
/// Return 0 on success, or the errno of the failing dup2().
pub fn child_setup_process(fds: &StageFds) -> i32 {
    for (src, target) in [(fds.input, STDIN_FILENO), (fds.output, STDOUT_FILENO)] {
        if unsafe { libc::dup2(src, target) } < 0 {
            return errno::errno().0;
        }
    }
    // dup2 does not close the originals; the duplicates stay open independently.
    for fd in fds.owned {
        if fd >= 0 {
            unsafe { libc::close(fd) };
        }
    }
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };
    0
}

/// Everything the child does between fork and exec. This never returns: either the stage's
/// program replaces this process image, or the child exits.
pub fn child_exec(stage: &Stage, fds: &StageFds) -> ! {
    let err = child_setup_process(fds);
    if err != 0 {
        FLOG_SAFE!(
            exec,
            "failed to set up file descriptors for '",
            stage.program(),
            "': dup2 error ",
            err
        );
        exit_without_destructors(1);
    }

    unsafe { libc::execvp(stage.program().as_ptr(), stage.argv_ptr()) };
    let err = errno::errno().0;

    if should_flog!(exec) {
        let mut line = SafeLine::new("exec");
        line.push("command:");
        for arg in stage.args() {
            line.push(" '");
            line.push(arg);
            line.push("'");
        }
        line.emit(get_flog_file_fd());
    }
    safe_report_exec_error(err, stage.program());
    exit_without_destructors(exit_code_from_exec_error(err));
}

/// Map an exec() errno to the exit status the child reports it with.
pub fn exit_code_from_exec_error(err: libc::c_int) -> libc::c_int {
    match err {
        // Not found in $PATH, or a path component is missing.
        ENOENT | ENOTDIR => STATUS_CMD_UNKNOWN,
        // The file is not executable for various reasons.
        EACCES | ENOEXEC => STATUS_NOT_EXECUTABLE,
        #[cfg(apple)]
        libc::EBADARCH => STATUS_NOT_EXECUTABLE,
        _ => libc::EXIT_FAILURE,
    }
}

pub(crate) fn safe_report_exec_error(err: i32, actual_cmd: &CStr) {
    match err {
        libc::E2BIG => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': the total size of the argument list exceeds the operating system limit."
            );
        }
        libc::ENOEXEC => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process: '",
                actual_cmd,
                "' the file could not be run by the operating system."
            );
        }
        libc::ENOENT => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': The file does not exist or could not be found in $PATH."
            );
        }
        libc::EACCES => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': The file could not be accessed."
            );
        }
        libc::ENOMEM => {
            FLOG_SAFE!(exec, "Out of memory");
        }
        libc::ETXTBSY => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': File is currently open for writing.",
            );
        }
        libc::ELOOP => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': Too many layers of symbolic links. Maybe a loop?"
            );
        }
        libc::EISDIR => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': File is a directory."
            );
        }
        libc::ENOTDIR => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': A path component is not a directory."
            );
        }
        libc::ENAMETOOLONG => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': Name is too long."
            );
        }
        libc::EPERM => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': No permission. \
                Either suid/sgid is forbidden or you lack capabilities."
            );
        }
        err => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "', unknown error number ",
                err,
            );
        }
    }
}
