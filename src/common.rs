//! Low-level helpers shared by the launcher and the collectors: looping read and write on raw
//! descriptors, leaving a forked child with `_exit`, and the page size.

use std::io;
use std::os::fd::{AsFd, AsRawFd};

/// Exit the process immediately, without running atexit handlers or destructors.
///
/// This is the only safe way to leave a forked child that failed to exec.
pub fn exit_without_destructors(code: libc::c_int) -> ! {
    unsafe { libc::_exit(code) };
}

/// Write all of `buf` to `fd`, retrying short writes and EINTR.
///
/// Returns the number of bytes written, which is always `buf.len()` on success.
pub fn write_loop<Fd: AsFd>(fd: &Fd, buf: &[u8]) -> io::Result<usize> {
    let fd = fd.as_fd().as_raw_fd();
    let mut total = 0;
    while total < buf.len() {
        let remaining = &buf[total..];
        let written =
            unsafe { libc::write(fd, remaining.as_ptr().cast(), remaining.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
                continue;
            }
            return Err(err);
        }
        total += written as usize;
    }
    Ok(total)
}

/// Issue a single read of at most `buf.len()` bytes from `fd`, retrying on EINTR.
///
/// Returns the number of bytes read, 0 meaning end of file.
pub fn read_loop<Fd: AsFd>(fd: &Fd, buf: &mut [u8]) -> io::Result<usize> {
    let fd = fd.as_fd().as_raw_fd();
    loop {
        let amt = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if amt >= 0 {
            return Ok(amt as usize);
        }
        let err = io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
            continue;
        }
        return Err(err);
    }
}

/// Returns the VM page size, or 4096 if it cannot be determined.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
