//! Wrappers around fork, and the code that runs between fork and exec.

pub mod flog_safe;
pub mod postfork;

use std::sync::atomic::AtomicUsize;

/// Number of calls to fork(), kept for logging.
pub static FORK_COUNT: AtomicUsize = AtomicUsize::new(0);
