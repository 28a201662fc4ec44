// The stuff that happens after fork.
// Everything in this module must be async-signal safe.
// That means no locking, no allocating, no freeing memory, etc!
use super::flog_safe::FLOG_SAFE;
use crate::fds::set_cloexec;
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::redirection::Dup2List;
use libc::pid_t;
use std::ffi::CStr;
use std::time::Duration;

/// The number of times to try to call fork() before giving up.
const FORK_LAPS: usize = 5;

/// The number of nanoseconds to sleep between attempts to call fork().
const FORK_SLEEP_TIME: Duration = Duration::from_nanos(1000000);

/// This function is a wrapper around fork. If the fork call fails with EAGAIN,
/// it is retried FORK_LAPS times, with a very slight delay between each lap.
/// On failure the error is reported and its errno returned, rather than
/// exiting: the caller may have already launched part of a pipeline, and those
/// children still need to be collected.
pub fn execute_fork() -> Result<pid_t, i32> {
    let mut err = 0;
    for i in 0..FORK_LAPS {
        let pid = unsafe { libc::fork() };
        if pid >= 0 {
            return Ok(pid);
        }
        err = errno::errno().0;
        if err != libc::EAGAIN {
            break;
        }
        // Don't sleep on the final lap
        if i != FORK_LAPS - 1 {
            std::thread::sleep(FORK_SLEEP_TIME);
        }
    }

    match err {
        libc::EAGAIN => {
            FLOG_SAFE!(
                error,
                "fork: Out of resources. Check RLIMIT_NPROC and pid_max."
            );
        }
        libc::ENOMEM => {
            FLOG_SAFE!(error, "fork: Out of memory.");
        }
        _ => {
            FLOG_SAFE!(error, "fork: Unknown error number ", err);
        }
    }
    Err(err)
}

/// Apply a list of fd redirections in a forked child. Returns 0 on success, or
/// the errno of the first failing action; the caller still owns its designated
/// pipe endpoints and is responsible for closing them before exiting.
pub fn child_setup_process(dup2s: &Dup2List) -> i32 {
    // Note we are called in a forked child.
    for act in dup2s.get_actions() {
        let err = if act.target != act.src {
            // Normal redirection.
            unsafe { libc::dup2(act.src, act.target) }
        } else {
            // An opened file (which is CLOEXEC) wants to be dup2'd to its own fd.
            // We need to unset the CLOEXEC flag.
            set_cloexec(act.src, false)
        };
        if err < 0 {
            let errcode = errno::errno().0;
            FLOG_SAFE!(
                warning,
                "failed to set up file descriptors in child_setup_process"
            );
            return errcode;
        }
    }
    0
}

/// Call execvp on the given command and argument list, searching PATH. On
/// success this does not return. On failure, report the error and return the
/// errno value for the caller to turn into an exit code.
pub fn safe_execvp(actual_cmd: &CStr, argv: &OwningNullTerminatedArray) -> i32 {
    unsafe {
        libc::execvp(actual_cmd.as_ptr(), argv.get());
    }
    let err = errno::errno().0;
    safe_report_exec_error(err, actual_cmd);
    err
}

/// Report an exec failure for `actual_cmd`, with a message keyed on errno.
pub(crate) fn safe_report_exec_error(err: i32, actual_cmd: &CStr) {
    match err {
        libc::E2BIG => {
            FLOG_SAFE!(
                exec,
                "Failed to execute process '",
                actual_cmd,
                "': the argument list exceeds the OS limit."
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

        libc::EACCES | libc::ENOENT => {
            if unsafe { libc::access(actual_cmd.as_ptr(), libc::X_OK) } == 0 {
                FLOG_SAFE!(
                    exec,
                    "Failed to execute process '",
                    actual_cmd,
                    "': The file exists and is executable. Check the interpreter or linker?"
                );
            } else if err == libc::ENOENT {
                FLOG_SAFE!(
                    exec,
                    "Failed to execute process '",
                    actual_cmd,
                    "': The file does not exist or could not be executed."
                );
            } else {
                FLOG_SAFE!(
                    exec,
                    "Failed to execute process '",
                    actual_cmd,
                    "': The file could not be accessed."
                );
            }
        }

        libc::ENOMEM => {
            FLOG_SAFE!(exec, "Out of memory");
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
