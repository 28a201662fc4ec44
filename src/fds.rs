use crate::common::perror;
use crate::flog::FLOG;
use libc::{c_int, EINTR, F_GETFD, F_SETFD, FD_CLOEXEC};
use nix::fcntl::FcntlArg;
use nix::fcntl::OFlag;
use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

pub const PIPE_ERROR: &str = "An error occurred while setting up pipe";

/// The first "high fd", which is considered outside the range of valid user-specified redirections.
pub const FIRST_HIGH_FD: RawFd = 10;

/// Helper type returned from make_autoclose_pipes.
pub struct AutoClosePipes {
    /// Read end of the pipe.
    pub read: OwnedFd,

    /// Write end of the pipe.
    pub write: OwnedFd,
}

/// Construct a pair of connected pipes, set to close-on-exec.
/// Return an error on fd exhaustion.
pub fn make_autoclose_pipes() -> nix::Result<AutoClosePipes> {
    let pipes = match nix::unistd::pipe() {
        Ok(pipes) => pipes,
        Err(err) => {
            FLOG!(warning, PIPE_ERROR);
            perror("pipe");
            return Err(err);
        }
    };

    // Ensure our fds are out of the user range.
    let readp = heightenize_fd(pipes.0)?;
    let writep = heightenize_fd(pipes.1)?;

    Ok(AutoClosePipes {
        read: readp,
        write: writep,
    })
}

/// If the given fd is in the "user range", move it to a new fd in the "high range".
/// zsh calls this movefd().
/// Return the fd, which always has CLOEXEC set; on failure an error will have
/// been printed, and the input fd closed.
fn heightenize_fd(fd: OwnedFd) -> nix::Result<OwnedFd> {
    let raw_fd = fd.as_raw_fd();

    if raw_fd >= FIRST_HIGH_FD {
        set_cloexec(raw_fd, true);
        return Ok(fd);
    }

    // Here we are asking the kernel to give us a cloexec fd.
    let newfd = match nix::fcntl::fcntl(&fd, FcntlArg::F_DUPFD_CLOEXEC(FIRST_HIGH_FD)) {
        Ok(newfd) => newfd,
        Err(err) => {
            perror("fcntl");
            return Err(err);
        }
    };

    Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}

/// Sets CLO_EXEC on a given fd according to the value of `should_set`.
pub fn set_cloexec(fd: RawFd, should_set: bool /* = true */) -> c_int {
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

/// Version of open() that also sets the close-on-exec flag, retrying on EINTR.
/// This is async-signal safe and may be called in a forked child.
pub fn open_cloexec(
    path: &CStr,
    flags: OFlag,
    mode: nix::sys::stat::Mode,
) -> nix::Result<OwnedFd> {
    loop {
        match nix::fcntl::open(path, flags | OFlag::O_CLOEXEC, mode) {
            Ok(fd) => return Ok(fd),
            Err(err) => {
                if err != nix::Error::EINTR {
                    return Err(err);
                }
            }
        }
    }
}

/// Close a file descriptor `fd`, retrying on EINTR. Return false on failure,
/// in which case errno is left set for the caller; nothing is printed here so
/// that this stays safe to call in a forked child.
fn close_retrying(fd: RawFd) -> bool {
    assert!(fd >= 0, "Invalid fd");
    while unsafe { libc::close(fd) } == -1 {
        if errno::errno().0 != EINTR {
            return false;
        }
    }
    true
}

/// The set of pipes backing a pipeline, one pipe per boundary between adjacent
/// stages. Boundary `b` carries data from stage `b` into stage `b + 1`.
///
/// Every endpoint is CLOEXEC and in the high range, so a stage which has dup2'd
/// its endpoints onto stdio can exec without leaking the originals. Explicit
/// close sweeps remain necessary for the paths that exit without exec'ing, and
/// for the parent, which never execs at all.
pub struct PipeFarm {
    pipes: Vec<AutoClosePipes>,
}

impl PipeFarm {
    /// Allocate `count` pipes up front. If any allocation fails, the pipes
    /// already opened are closed before the error is returned, and the caller
    /// must not spawn anything.
    pub fn open(count: usize) -> nix::Result<PipeFarm> {
        let mut pipes = Vec::with_capacity(count);
        for _ in 0..count {
            // On failure, dropping `pipes` closes the earlier boundaries.
            pipes.push(make_autoclose_pipes()?);
        }
        FLOG!(pipe, "Opened", pipes.len(), "pipe(s)");
        Ok(PipeFarm { pipes })
    }

    /// The number of boundaries.
    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Raw read end of the given boundary.
    pub fn read_end(&self, boundary: usize) -> RawFd {
        self.pipes[boundary].read.as_raw_fd()
    }

    /// Raw write end of the given boundary.
    pub fn write_end(&self, boundary: usize) -> RawFd {
        self.pipes[boundary].write.as_raw_fd()
    }

    /// Close every endpoint, consuming the farm. The sweep visits every
    /// endpoint even if some close fails; returns false on any failure.
    pub fn close_all(self) -> bool {
        let mut ok = true;
        for pipe in self.pipes {
            for fd in [pipe.read.into_raw_fd(), pipe.write.into_raw_fd()] {
                if !close_retrying(fd) {
                    perror("close");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Close every endpoint except the read end of `read_boundary` and the
    /// write end of `write_boundary`. The sweep continues past failures and
    /// returns false if any close failed.
    ///
    /// This is for use in a forked child, which must leave through exec or
    /// _exit rather than dropping the farm: the OwnedFds still hold the raw
    /// values closed here.
    pub fn close_except(&self, read_boundary: Option<usize>, write_boundary: Option<usize>) -> bool {
        let mut ok = true;
        for (b, pipe) in self.pipes.iter().enumerate() {
            if read_boundary != Some(b) {
                ok &= close_retrying(pipe.read.as_raw_fd());
            }
            if write_boundary != Some(b) {
                ok &= close_retrying(pipe.write.as_raw_fd());
            }
        }
        ok
    }

    /// Close the read end of `read_boundary` and the write end of
    /// `write_boundary`, if any. Same child-only caveats as close_except.
    pub fn close_designated(
        &self,
        read_boundary: Option<usize>,
        write_boundary: Option<usize>,
    ) -> bool {
        let mut ok = true;
        if let Some(b) = read_boundary {
            ok &= close_retrying(self.pipes[b].read.as_raw_fd());
        }
        if let Some(b) = write_boundary {
            ok &= close_retrying(self.pipes[b].write.as_raw_fd());
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::{make_autoclose_pipes, PipeFarm, FIRST_HIGH_FD};
    use crate::tests::prelude::*;
    use libc::{F_GETFD, FD_CLOEXEC};
    use std::os::fd::AsRawFd;

    #[cfg(target_os = "linux")]
    fn count_open_fds() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    #[test]
    #[serial]
    fn test_pipes() {
        test_init();
        // Here we just test that each pipe has CLOEXEC set and is in the high range.
        // Note pipe creation may fail due to fd exhaustion; don't fail in that case.
        let mut pipes = vec![];
        for _i in 0..10 {
            if let Ok(pipe) = make_autoclose_pipes() {
                pipes.push(pipe);
            }
        }
        for pipe in pipes {
            for fd in [&pipe.read, &pipe.write] {
                let fd = fd.as_raw_fd();
                assert!(fd >= FIRST_HIGH_FD);
                let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
                assert!(flags >= 0);
                assert_ne!(flags & FD_CLOEXEC, 0);
            }
        }
    }

    #[test]
    #[serial]
    fn test_farm_endpoints() {
        test_init();
        let farm = PipeFarm::open(3).unwrap();
        assert_eq!(farm.len(), 3);
        for b in 0..3 {
            assert!(farm.read_end(b) >= FIRST_HIGH_FD);
            assert!(farm.write_end(b) >= FIRST_HIGH_FD);
            assert_ne!(farm.read_end(b), farm.write_end(b));
        }
        assert!(farm.close_all());
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_farm_close_all_releases_fds() {
        test_init();
        let before = count_open_fds();
        let farm = PipeFarm::open(4).unwrap();
        assert_eq!(count_open_fds(), before + 8);
        assert!(farm.close_all());
        assert_eq!(count_open_fds(), before);
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_farm_open_failure_closes_earlier_pipes() {
        test_init();
        // Lower the fd limit so that opening many pipes fails partway, then
        // check that the failure path did not leak the earlier boundaries.
        let mut lim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        unsafe {
            assert_eq!(libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim), 0);
        }
        let before = count_open_fds();
        let lowered = libc::rlimit {
            rlim_cur: (before + 8) as libc::rlim_t,
            rlim_max: lim.rlim_max,
        };
        unsafe {
            assert_eq!(libc::setrlimit(libc::RLIMIT_NOFILE, &lowered), 0);
        }
        let result = PipeFarm::open(64);
        unsafe {
            assert_eq!(libc::setrlimit(libc::RLIMIT_NOFILE, &lim), 0);
        }
        assert!(result.is_err());
        assert_eq!(count_open_fds(), before);
    }
}
