//! Pipeline execution.
//!
//! A pipeline of N+1 stages is backed by N pipes, all allocated before any
//! stage is forked. Each forked stage closes every pipe endpoint it does not
//! use, wires its designated endpoints onto stdio, applies its own file
//! redirections and then execs. The parent closes all of its endpoints as soon
//! as the last fork has happened, then waits for every launched stage.

use crate::common::exit_without_destructors;
use crate::fds::{open_cloexec, PipeFarm};
use crate::flog::FLOG;
use crate::fork_exec::flog_safe::FLOG_SAFE;
use crate::fork_exec::postfork::{child_setup_process, execute_fork, safe_execvp};
use crate::fork_exec::FORK_COUNT;
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::proc::{
    wait_for_stage, STATUS_CMD_ERROR, STATUS_CMD_UNKNOWN, STATUS_NOT_EXECUTABLE,
};
use crate::redirection::{redirection_for_token, Dup2List};
use crate::tokens::{pipeline_stage_count, stage_bounds, stage_endpoints};
use libc::{pid_t, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::stat::Mode;
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::Ordering;

/// Execute a pipeline given as a list of tokens: one or more commands
/// separated by '|' tokens. Blocks until every launched stage has exited.
/// Returns true if every stage exited with status 0.
pub fn exec_pipeline(tokens: &[String]) -> bool {
    let n_stages = match pipeline_stage_count(tokens) {
        Ok(n) => n,
        Err(err) => {
            FLOG!(error, "Invalid pipeline:", err);
            return false;
        }
    };

    // Allocate every pipe before anything is forked, so that a failure here
    // leaves no child behind.
    let farm = match PipeFarm::open(n_stages - 1) {
        Ok(farm) => farm,
        // make_autoclose_pipes printed the error.
        Err(_) => return false,
    };

    // Fork the last stage first, so every consumer exists before its producer
    // starts writing.
    let mut pids: Vec<pid_t> = Vec::with_capacity(n_stages);
    let mut aborted_pipeline = false;
    for stage in (0..n_stages).rev() {
        match fork_stage(tokens, stage, n_stages, &farm) {
            Ok(pid) => pids.push(pid),
            Err(()) => {
                // Do not fork the remaining stages. The ones already running
                // are still collected below.
                aborted_pipeline = true;
                break;
            }
        }
    }

    // The parent gives up its pipe endpoints before waiting. A write end kept
    // open here would deny a reading stage its EOF and hang the pipeline.
    let mut result = farm.close_all();
    if aborted_pipeline {
        result = false;
    }

    for pid in pids {
        let status = wait_for_stage(pid);
        FLOG!(
            proc_reap,
            format!("Reaped stage process {pid} with status {}", status.status_value())
        );
        if !status.is_success() {
            result = false;
        }
    }
    result
}

/// Fork one pipeline stage. On success returns the child's pid; the child
/// never returns from here. On fork failure the error has been reported and
/// Err is returned so the caller can stop launching.
fn fork_stage(
    tokens: &[String],
    stage: usize,
    n_stages: usize,
    farm: &PipeFarm,
) -> Result<pid_t, ()> {
    let (read_boundary, write_boundary) = stage_endpoints(stage, n_stages);

    // Resolve the pipe wiring before forking; the child may not allocate
    // until it has finished its fd work.
    let mut dup2s = Dup2List::new();
    if let Some(b) = read_boundary {
        dup2s.add_dup2(farm.read_end(b), STDIN_FILENO);
    }
    if let Some(b) = write_boundary {
        dup2s.add_dup2(farm.write_end(b), STDOUT_FILENO);
    }

    let pid = execute_fork().map_err(|_| ())?;
    if pid == 0 {
        // We are the child.
        exit_without_destructors(run_stage(
            tokens,
            stage,
            n_stages,
            farm,
            &dup2s,
            read_boundary,
            write_boundary,
        ));
    }

    // We are the parent.
    let count = FORK_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    FLOG!(
        exec_fork,
        format!("Fork #{count}, pid {pid}: pipeline stage {stage} of {n_stages}")
    );
    Ok(pid)
}

/// The body of a forked stage: fd hygiene, pipe wiring, then the executor.
/// Returns the exit code to _exit with if the stage could not be run.
fn run_stage(
    tokens: &[String],
    stage: usize,
    n_stages: usize,
    farm: &PipeFarm,
    dup2s: &Dup2List,
    read_boundary: Option<usize>,
    write_boundary: Option<usize>,
) -> i32 {
    // First close every pipe endpoint this stage does not use. An endpoint
    // that survives in this process would deny some sibling its EOF, so a
    // failed sweep is fatal for the stage; the sweep itself keeps going so
    // that one bad endpoint doesn't preserve the rest.
    if !farm.close_except(read_boundary, write_boundary) {
        FLOG_SAFE!(warning, "failed to close unused pipe fds in stage");
        farm.close_designated(read_boundary, write_boundary);
        return STATUS_CMD_ERROR;
    }

    let range = match stage_bounds(tokens, stage, n_stages) {
        Ok(range) => range,
        Err(_) => {
            // Unreachable for a token list that passed validation.
            FLOG_SAFE!(error, "could not locate the stage's tokens");
            farm.close_designated(read_boundary, write_boundary);
            return STATUS_CMD_ERROR;
        }
    };

    // Wire the designated endpoints onto stdin/stdout.
    if child_setup_process(dup2s) != 0 {
        farm.close_designated(read_boundary, write_boundary);
        return STATUS_CMD_ERROR;
    }

    // The stdio copies carry the data now; the high-fd originals are done.
    farm.close_designated(read_boundary, write_boundary);

    run_single_command(&tokens[range])
}

/// Executor for one stage: apply the stage's file redirections, build argv and
/// exec it. Runs in the forked child after all pipe fds are in their final
/// state, so only a failure returns, yielding the stage's exit code.
///
/// The parent is single threaded at fork time, so unlike the code above this
/// may allocate.
fn run_single_command(tokens: &[String]) -> i32 {
    // Split the tokens into the command's argv and its redirections, opening
    // the redirection targets as we find them.
    let mut argv: Vec<CString> = Vec::with_capacity(tokens.len());
    let mut file_dup2s = Dup2List::new();
    let mut opened_files: Vec<OwnedFd> = Vec::new();
    let mut iter = tokens.iter();
    while let Some(tok) = iter.next() {
        let Some((mode, target_fd)) = redirection_for_token(tok) else {
            match CString::new(tok.as_str()) {
                Ok(arg) => argv.push(arg),
                Err(_) => {
                    FLOG_SAFE!(error, "command argument contains an embedded nul byte");
                    return STATUS_CMD_ERROR;
                }
            }
            continue;
        };
        let Some(filename) = iter.next() else {
            FLOG_SAFE!(error, "redirection '", tok.as_str(), "' is missing a file name");
            return STATUS_CMD_ERROR;
        };
        let Ok(path) = CString::new(filename.as_str()) else {
            FLOG_SAFE!(error, "redirection file name contains an embedded nul byte");
            return STATUS_CMD_ERROR;
        };
        match open_cloexec(&path, mode.oflags(), Mode::from_bits_truncate(0o666)) {
            Ok(fd) => {
                file_dup2s.add_dup2(fd.as_raw_fd(), target_fd);
                opened_files.push(fd);
            }
            Err(err) => {
                FLOG_SAFE!(
                    error,
                    "could not open '",
                    filename.as_str(),
                    "' for redirection: error ",
                    err as i32,
                );
                return STATUS_CMD_ERROR;
            }
        }
    }

    if argv.is_empty() {
        FLOG_SAFE!(error, "pipeline stage has no command");
        return STATUS_CMD_UNKNOWN;
    }

    // Wire the opened files onto their stdio fds. The CLOEXEC originals clean
    // themselves up at exec.
    if child_setup_process(&file_dup2s) != 0 {
        return STATUS_CMD_ERROR;
    }

    let argv = OwningNullTerminatedArray::new(argv);
    let actual_cmd = argv.iter().next().unwrap();
    let err = safe_execvp(actual_cmd, &argv);
    exit_code_from_exec_error(err)
}

/// Given that we failed to execute a process, figure out the appropriate exit
/// code from errno, following the usual shell convention: 127 for a missing
/// command, 126 for a command that exists but cannot be run.
fn exit_code_from_exec_error(err: i32) -> i32 {
    debug_assert!(err != 0, "Zero is success, not an error");
    match err {
        libc::ENOENT | libc::ENOTDIR => STATUS_CMD_UNKNOWN,
        libc::EACCES | libc::ENOEXEC => STATUS_NOT_EXECUTABLE,
        _ => STATUS_CMD_ERROR,
    }
}
