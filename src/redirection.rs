use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::fcntl::OFlag;
use std::os::fd::RawFd;

/// The different types of input and output redirections a stage can carry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RedirectionMode {
    /// > typical redirection
    overwrite,
    /// >> appending
    append,
    /// < typical input
    input,
}

impl RedirectionMode {
    /// The open flags for this redirection mode.
    pub fn oflags(self) -> OFlag {
        match self {
            RedirectionMode::append => OFlag::O_CREAT | OFlag::O_APPEND | OFlag::O_WRONLY,
            RedirectionMode::overwrite => OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
            RedirectionMode::input => OFlag::O_RDONLY,
        }
    }
}

/// Parse a redirection operator token. Returns the mode and the stdio fd it
/// applies to, or None if the token is not a redirection operator.
pub fn redirection_for_token(tok: &str) -> Option<(RedirectionMode, RawFd)> {
    match tok {
        "<" => Some((RedirectionMode::input, STDIN_FILENO)),
        ">" => Some((RedirectionMode::overwrite, STDOUT_FILENO)),
        ">>" => Some((RedirectionMode::append, STDOUT_FILENO)),
        _ => None,
    }
}

/// A type that represents the action dup2(src, target).
/// Note none of the fds here are considered 'owned'.
#[derive(Debug, Copy, Clone)]
pub struct Dup2Action {
    pub src: RawFd,
    pub target: RawFd,
}

/// A sequence of dup2 actions to be applied in a forked child, in order.
#[derive(Debug, Default, Clone)]
pub struct Dup2List {
    /// The list of actions.
    actions: Vec<Dup2Action>,
}

impl Dup2List {
    pub fn new() -> Dup2List {
        Default::default()
    }

    /// Append a dup2 action. The action is recorded even if src equals target;
    /// the child uses that case to clear the CLOEXEC flag instead.
    pub fn add_dup2(&mut self, src: RawFd, target: RawFd) {
        assert!(src >= 0 && target >= 0, "Invalid fd");
        self.actions.push(Dup2Action { src, target });
    }

    /// The list of dup2 actions.
    pub fn get_actions(&self) -> &[Dup2Action] {
        &self.actions
    }
}
