//! Status handling for forked stage processes, and the waiting that turns a
//! running pipeline into a result.

use crate::common::perror;
use libc::{pid_t, EINTR, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WTERMSIG};

/// The status code for a command that was not found.
pub const STATUS_CMD_UNKNOWN: i32 = 127;

/// The status code for a command that was found but could not be executed.
pub const STATUS_NOT_EXECUTABLE: i32 = 126;

/// The status code for a stage that failed before or during exec for some
/// other reason.
pub const STATUS_CMD_ERROR: i32 = 124;

/// A ProcStatus is a value type that encapsulates logic around exited vs
/// signaled process states, wrapping the raw status from waitpid().
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcStatus(i32);

impl ProcStatus {
    /// Encode a return value `ret` and signal `sig` into a status value like waitpid() does.
    const fn w_exitcode(ret: i32, sig: i32) -> i32 {
        // The status is encoded in the upper byte.
        // This should be W_EXITCODE(ret, sig) but that's not available everywhere.
        (ret << 8) | sig
    }

    /// Construct from a status returned from a waitpid call.
    pub fn from_waitpid(status: i32) -> ProcStatus {
        ProcStatus(status)
    }

    /// Construct directly from an exit code.
    pub fn from_exit_code(ret: i32) -> ProcStatus {
        assert!(ret >= 0, "Invalid exit code");
        assert!(ret < 256, "Invalid exit code");

        // Some paranoia.
        const _zerocode: i32 = ProcStatus::w_exitcode(0, 0);
        const _: () = assert!(
            WIFEXITED(_zerocode),
            "Synthetic exit status not reported as exited"
        );

        ProcStatus(Self::w_exitcode(ret, 0 /* sig */))
    }

    /// Return if we exited normally (not a signal).
    pub fn normal_exited(&self) -> bool {
        WIFEXITED(self.0)
    }

    /// Return if we exited because of a signal.
    pub fn signal_exited(&self) -> bool {
        WIFSIGNALED(self.0)
    }

    /// Return the signal code, given that we signal exited.
    pub fn signal_code(&self) -> libc::c_int {
        assert!(self.signal_exited(), "Process is not signal exited");
        WTERMSIG(self.0)
    }

    /// Return the exit code, given that we normal exited.
    pub fn exit_code(&self) -> u8 {
        assert!(self.normal_exited(), "Process is not normal exited");
        u8::try_from(WEXITSTATUS(self.0)).unwrap()
    }

    /// Return if this status represents success.
    pub fn is_success(&self) -> bool {
        self.normal_exited() && self.exit_code() == 0
    }

    /// Return the value a shell would report for this status.
    pub fn status_value(&self) -> i32 {
        if self.signal_exited() {
            128 + self.signal_code()
        } else if self.normal_exited() {
            i32::from(self.exit_code())
        } else {
            panic!("Process is not exited")
        }
    }
}

/// Wait for the given stage process to exit, retrying on EINTR. A waitpid
/// failure is reported and mapped to a generic failure status so that the
/// remaining stages still get waited on.
pub fn wait_for_stage(pid: pid_t) -> ProcStatus {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret >= 0 {
            return ProcStatus::from_waitpid(status);
        }
        if errno::errno().0 != EINTR {
            perror("waitpid");
            return ProcStatus::from_exit_code(STATUS_CMD_ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProcStatus;

    #[test]
    fn test_exit_code_round_trip() {
        for code in [0, 1, 7, 126, 127, 255] {
            let status = ProcStatus::from_exit_code(code);
            assert!(status.normal_exited());
            assert!(!status.signal_exited());
            assert_eq!(i32::from(status.exit_code()), code);
            assert_eq!(status.status_value(), code);
        }
        assert!(ProcStatus::from_exit_code(0).is_success());
        assert!(!ProcStatus::from_exit_code(1).is_success());
    }

    #[test]
    fn test_signal_status() {
        let status = ProcStatus::from_waitpid(ProcStatus::w_exitcode(0, libc::SIGKILL));
        assert!(status.signal_exited());
        assert!(!status.normal_exited());
        assert!(!status.is_success());
        assert_eq!(status.signal_code(), libc::SIGKILL);
        assert_eq!(status.status_value(), 128 + libc::SIGKILL);
    }
}
