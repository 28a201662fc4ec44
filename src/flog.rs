use libc::c_int;
use std::sync::atomic::{AtomicI32, Ordering};

#[rustfmt::skip::macros(category)]
pub mod categories {
    use std::sync::atomic::AtomicBool;

    pub struct category_t {
        pub name: &'static str,
        pub description: &'static str,
        pub enabled: AtomicBool,
    }

    /// Macro to declare a static variable identified by $var,
    /// with the given name and description, and optionally enabled by default.
    macro_rules! declare_category {
        (
            ($var:ident, $name:literal, $description:literal, $enabled:expr)
        ) => {
            pub static $var: category_t = category_t {
                name: $name,
                description: $description,
                enabled: AtomicBool::new($enabled),
            };
        };
        (
            ($var:ident, $name:expr, $description:expr)
        ) => {
            declare_category!(($var, $name, $description, false));
        };
    }

    /// Macro to extract the variable name for a category.
    macro_rules! category_name {
        (($var:ident, $name:literal, $description:literal, $enabled:expr)) => {
            $var
        };
        (($var:ident, $name:literal, $description:literal)) => {
            $var
        };
    }

    macro_rules! categories {
        (
            // A repetition of categories, separated by semicolons.
            $($cats:tt);*

            // Allow trailing semicolon.
            $(;)?
        ) => {
            // Declare each category.
            $(
                declare_category!($cats);
            )*

            // Define a function which gives you a Vector of all categories.
            pub fn all_categories() -> Vec<&'static category_t> {
                vec![
                    $(
                        & category_name!($cats),
                    )*
                ]
            }
        };
    }

    categories!(
        (error, "error", "Serious unexpected errors (on by default)", true);

        (warning, "warning", "Warnings (on by default)", true);

        (exec, "exec", "Errors reported by exec (on by default)", true);

        (exec_fork, "exec-fork", "Calls to fork()");

        (pipe, "pipe", "Pipe creation and cleanup");

        (proc_reap, "proc-reap", "Reaping forked processes");
    );
}

/// FLOG formats values. By default we would like to use Display, and fall back to Debug.
/// However that would require specialization. So instead we make two "separate" traits, bring them both in scope,
/// and let Rust figure it out.
/// Clients can opt a Debug type into Floggable by implementing FloggableDebug:
///    impl FloggableDebug for MyType {}
pub trait FloggableDisplay {
    /// Return a string representation of this thing.
    fn to_flog_str(&self) -> String;
}

impl<T: std::fmt::Display> FloggableDisplay for T {
    fn to_flog_str(&self) -> String {
        self.to_string()
    }
}

pub trait FloggableDebug: std::fmt::Debug {
    fn to_flog_str(&self) -> String {
        format!("{:?}", self)
    }
}

/// Write to our FLOG file.
pub fn flog_impl(s: &str) {
    let fd = get_flog_file_fd();
    if fd < 0 {
        return;
    }
    let mut bytes = s.as_bytes();
    while !bytes.is_empty() {
        let amt = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if amt < 0 {
            if errno::errno().0 == libc::EINTR {
                continue;
            }
            return;
        }
        bytes = &bytes[amt as usize..];
    }
}

/// The entry point for flogging.
#[macro_export]
macro_rules! FLOG {
    ($category:ident, $($elem:expr),+ $(,)*) => {
        if $crate::flog::categories::$category.enabled.load(std::sync::atomic::Ordering::Relaxed) {
            #[allow(unused_imports)]
            use $crate::flog::{FloggableDisplay, FloggableDebug};
            let mut vs = vec![format!("{}:", $crate::flog::categories::$category.name)];
            $(
                {
                   vs.push($elem.to_flog_str())
                }
            )+
            // We don't use locking here so we have to append our own newline to avoid multiple writes.
            let mut v = vs.join(" ");
            v.push('\n');
            $crate::flog::flog_impl(&v);
        }
    };
}

pub use FLOG;

/// For each category, if its name matches `name`, set its enabled to the given sense.
fn apply_one_category(name: &str, sense: bool) {
    let mut match_found = false;
    for cat in categories::all_categories() {
        if cat.name == name {
            cat.enabled.store(sense, Ordering::Relaxed);
            match_found = true;
        }
    }
    if !match_found {
        FLOG!(warning, "Failed to match debug category:", name);
    }
}

/// Set the active flog categories according to the given comma-separated list.
/// An entry prefixed with '-' disables the category.
pub fn activate_flog_categories(spec: &str) {
    // Normalize underscores to dashes, allowing the user to be sloppy.
    let spec = spec.replace('_', "-");
    for s in spec.split(',') {
        if let Some(name) = s.strip_prefix('-') {
            apply_one_category(name, false);
        } else {
            apply_one_category(s, true);
        }
    }
}

/// The flog output fd. Defaults to stderr. A value < 0 disables flog.
static FLOG_FD: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);

pub fn set_flog_file_fd(fd: c_int) {
    FLOG_FD.store(fd, Ordering::Relaxed);
}

#[inline]
pub fn get_flog_file_fd() -> c_int {
    FLOG_FD.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::categories;
    use crate::tests::prelude::*;
    use std::sync::atomic::Ordering;

    #[test]
    #[serial]
    fn test_activate_categories() {
        let exec_was_enabled = categories::exec.enabled.load(Ordering::Relaxed);
        super::activate_flog_categories("exec-fork,-exec");
        assert!(categories::exec_fork.enabled.load(Ordering::Relaxed));
        assert!(!categories::exec.enabled.load(Ordering::Relaxed));
        // Underscores are accepted in place of dashes.
        super::activate_flog_categories("-exec_fork");
        assert!(!categories::exec_fork.enabled.load(Ordering::Relaxed));
        categories::exec
            .enabled
            .store(exec_was_enabled, Ordering::Relaxed);
    }
}
