use once_cell::sync::OnceCell;

pub use serial_test::serial;

/// One-time initialization for tests that fork or exec. Quiets the exec
/// category, since exec failures are provoked deliberately all over these
/// tests and would otherwise spam stderr.
pub fn test_init() {
    static DONE: OnceCell<()> = OnceCell::new();
    DONE.get_or_init(|| {
        crate::flog::activate_flog_categories("-exec");
    });
}
