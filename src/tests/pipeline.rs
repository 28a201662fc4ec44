use crate::exec::exec_pipeline;
use crate::tests::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

fn tokens_of(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn toks(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

/// A path in the temp dir that no other test (or concurrent test run) will use.
fn temp_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("swash-test-{}-{tag}-{n}", std::process::id()))
}

#[cfg(target_os = "linux")]
fn count_open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
#[serial]
fn test_single_command_status() {
    test_init();
    assert!(exec_pipeline(&toks("true")));
    assert!(!exec_pipeline(&toks("false")));
    assert!(!exec_pipeline(&tokens_of(&["sh", "-c", "exit 7"])));
}

#[test]
#[serial]
fn test_trivial_pipelines() {
    test_init();
    for n in 1..=5 {
        let mut parts = vec!["true"; n];
        for i in (1..n).rev() {
            parts.insert(i, "|");
        }
        assert!(exec_pipeline(&tokens_of(&parts)), "{n} stage(s) of true");
    }
}

#[test]
#[serial]
fn test_failing_stage_fails_pipeline() {
    test_init();
    assert!(!exec_pipeline(&toks("false | true | true")));
    assert!(!exec_pipeline(&toks("true | false | true")));
    assert!(!exec_pipeline(&toks("true | true | false")));
}

#[test]
#[serial]
fn test_data_integrity_through_cat_chains() {
    test_init();
    for chain_len in [0, 1, 5] {
        let out = temp_path("out");
        let mut parts = vec!["echo".to_owned(), "hello".to_owned()];
        for _ in 0..chain_len {
            parts.push("|".to_owned());
            parts.push("cat".to_owned());
        }
        parts.push(">".to_owned());
        parts.push(out.display().to_string());
        assert!(exec_pipeline(&parts), "{chain_len} cat(s)");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
        let _ = std::fs::remove_file(&out);
    }
}

#[test]
#[serial]
fn test_input_redirection() {
    test_init();
    let input = temp_path("in");
    let out = temp_path("out");
    std::fs::write(&input, "one two\nthree\n").unwrap();
    let tokens = tokens_of(&[
        "cat",
        "<",
        &input.display().to_string(),
        "|",
        "cat",
        ">",
        &out.display().to_string(),
    ]);
    assert!(exec_pipeline(&tokens));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "one two\nthree\n");
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&out);
}

#[test]
#[serial]
fn test_append_redirection() {
    test_init();
    let out = temp_path("out");
    let tokens = tokens_of(&["echo", "x", ">>", &out.display().to_string()]);
    assert!(exec_pipeline(&tokens));
    assert!(exec_pipeline(&tokens));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "x\nx\n");
    let _ = std::fs::remove_file(&out);
}

#[test]
#[serial]
fn test_malformed_pipelines_rejected() {
    test_init();
    #[cfg(target_os = "linux")]
    let fds_before = count_open_fds();

    assert!(!exec_pipeline(&[]));
    assert!(!exec_pipeline(&toks("|")));
    assert!(!exec_pipeline(&toks("| ls")));
    assert!(!exec_pipeline(&toks("ls |")));
    assert!(!exec_pipeline(&toks("ls | | wc")));

    // Nothing was spawned, so nothing may have been opened either.
    #[cfg(target_os = "linux")]
    assert_eq!(count_open_fds(), fds_before);
}

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn test_pipeline_leaves_no_fds_behind() {
    test_init();
    // Warm up anything the first exec might lazily open.
    assert!(exec_pipeline(&toks("true | true")));
    let fds_before = count_open_fds();
    assert!(exec_pipeline(&toks("true | true | true")));
    assert!(!exec_pipeline(&toks("swash-no-such-command | true")));
    assert_eq!(count_open_fds(), fds_before);
}

#[test]
#[serial]
fn test_missing_command() {
    test_init();
    assert!(!exec_pipeline(&toks("swash-no-such-command")));
    assert!(!exec_pipeline(&toks("swash-no-such-command | cat")));
}

#[test]
#[serial]
fn test_siblings_complete_when_one_stage_fails() {
    test_init();
    // The first stage fails to exec; the second must still run to completion.
    let marker = temp_path("marker");
    let script = format!("cat >/dev/null; echo ok > {}", marker.display());
    let tokens = tokens_of(&["swash-no-such-command", "|", "sh", "-c", &script]);
    assert!(!exec_pipeline(&tokens));
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "ok\n");
    let _ = std::fs::remove_file(&marker);
}

#[test]
#[serial]
fn test_signal_death_fails_pipeline() {
    test_init();
    assert!(!exec_pipeline(&tokens_of(&["sh", "-c", "kill -KILL $$"])));
}

#[test]
#[serial]
fn test_redirection_without_filename_fails() {
    test_init();
    assert!(!exec_pipeline(&toks("echo hi >")));
}

#[test]
#[serial]
fn test_stage_with_no_command_fails() {
    test_init();
    let input = temp_path("in");
    std::fs::write(&input, "data\n").unwrap();
    // A stage that is only a redirection has nothing to exec.
    let tokens = tokens_of(&["<", &input.display().to_string()]);
    assert!(!exec_pipeline(&tokens));
    let _ = std::fs::remove_file(&input);
}
