//! Small helpers shared across the crate.

use errno::errno;
use std::ffi::CStr;
use std::io::Write;
use std::os::fd::RawFd;

/// Exits without invoking destructors. This is used in forked children, where
/// running the parent's destructors would be incorrect.
pub fn exit_without_destructors(code: i32) -> ! {
    unsafe {
        libc::_exit(code);
    }
}

/// Print a message `s` and the strerror() of the current errno to stderr.
pub fn perror(s: &str) {
    let e = errno().0;
    let mut stderr = std::io::stderr().lock();
    if !s.is_empty() {
        let _ = write!(stderr, "{s}: ");
    }
    let slice = unsafe {
        let msg = libc::strerror(e);
        CStr::from_ptr(msg).to_bytes()
    };
    let _ = stderr.write_all(slice);
    let _ = stderr.write_all(b"\n");
}

/// Return whether `fd` refers to a terminal.
pub fn isatty(fd: RawFd) -> bool {
    // Note errno is set on false; we don't care about the reason.
    unsafe { libc::isatty(fd) == 1 }
}

pub const fn assert_send<T: Send>() {}

pub const fn assert_sync<T: Sync>() {}
