use super::*;

fn quiet_request(command: &str, shell: bool) -> CommandRequest {
    let mut request = CommandRequest::new(command, std::env::temp_dir());
    request.shell = shell;
    request.stream_mode = StreamMode::BufferOnly;
    request
}

#[tokio::test]
async fn test_shell_command_captures_stdout() {
    let request = quiet_request("echo hello", true);
    let outcome = run(&request).await;
    assert!(outcome.success);
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.stdout.trim(), "hello");
    assert!(!outcome.dry_run);
}

#[tokio::test]
async fn test_argv_command_with_quotes() {
    let request = quiet_request("echo 'two words'", false);
    let outcome = run(&request).await;
    assert!(outcome.success);
    assert_eq!(outcome.stdout.trim(), "two words");
}

#[tokio::test]
async fn test_environment_is_exactly_the_request_env() {
    let mut request = quiet_request("echo \"$MARKER:$PATH\"", true);
    request.env.insert("MARKER".into(), "present".into());
    request.env.insert("PATH".into(), "/usr/bin:/bin".into());
    let outcome = run(&request).await;
    assert!(outcome.success);
    assert_eq!(outcome.stdout.trim(), "present:/usr/bin:/bin");
}

#[tokio::test]
async fn test_nonzero_exit_fails() {
    let request = quiet_request("exit 3", true);
    let outcome = run(&request).await;
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, 3);
    assert!(!outcome.timed_out);
}

#[tokio::test]
async fn test_spawn_failure_is_an_outcome_not_an_err() {
    let request = quiet_request("definitely-not-a-real-binary-4821", false);
    let outcome = run(&request).await;
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, 127);
    assert!(outcome.error.as_deref().unwrap_or("").contains("spawn"));
}

#[tokio::test]
async fn test_timeout_kills_and_marks() {
    let mut request = quiet_request("sleep 30", true);
    request.timeout_ms = Some(200);
    let started = std::time::Instant::now();
    let outcome = run(&request).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!outcome.success);
    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_code, 124);
}

#[tokio::test]
async fn test_warn_after_zero_marks_long_running_immediately() {
    let mut request = quiet_request("echo quick", true);
    request.warn_after_ms = Some(0);
    let outcome = run(&request).await;
    assert!(outcome.success);
    assert!(outcome.long_running);
}

#[tokio::test]
async fn test_warn_after_does_not_kill() {
    let mut request = quiet_request("sleep 0.3 && echo done", true);
    request.warn_after_ms = Some(50);
    let outcome = run(&request).await;
    assert!(outcome.success);
    assert!(outcome.long_running);
    assert_eq!(outcome.stdout.trim(), "done");
}

#[tokio::test]
async fn test_cancellation_terminates_child() {
    let (tx, rx) = watch::channel(false);
    let mut request = quiet_request("sleep 30", true);
    request.stream_mode = StreamMode::BufferOnly;
    let handle = tokio::spawn(async move { run_with_cancel(&request, Some(rx)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    let outcome = handle.await.unwrap();
    assert!(outcome.cancelled);
    assert!(!outcome.success);
}

#[tokio::test]
async fn test_dry_run_synthesis() {
    let request = quiet_request("rm -rf /important", true);
    let outcome = synthesize_dry_run(&request);
    assert!(outcome.success);
    assert!(outcome.dry_run);
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.stdout.is_empty());
    assert!(outcome.stderr.is_empty());
}

#[tokio::test]
async fn test_stderr_is_captured_separately() {
    let request = quiet_request("echo out; echo err 1>&2", true);
    let outcome = run(&request).await;
    assert_eq!(outcome.stdout.trim(), "out");
    assert_eq!(outcome.stderr.trim(), "err");
}

#[tokio::test]
async fn test_outcome_timings_extraction() {
    let request = quiet_request(
        "echo '[integration][timing]{\"task\":\"build\",\"profile\":\"ci\",\"durationMs\":7,\"status\":\"ok\"}'",
        true,
    );
    let outcome = run(&request).await;
    let timings = outcome.timings();
    assert_eq!(timings.len(), 1);
    assert_eq!(timings[0].task, "build");
    assert_eq!(timings[0].duration_ms, 7);
}

#[test]
fn test_split_command_line_basic() {
    assert_eq!(split_command_line("a b c"), vec!["a", "b", "c"]);
}

#[test]
fn test_split_command_line_quotes() {
    assert_eq!(
        split_command_line("echo 'one two' \"three four\""),
        vec!["echo", "one two", "three four"]
    );
}

#[test]
fn test_split_command_line_escapes() {
    assert_eq!(
        split_command_line(r"echo one\ two"),
        vec!["echo", "one two"]
    );
}

#[test]
fn test_split_command_line_empty_quoted_arg() {
    assert_eq!(split_command_line("cmd ''"), vec!["cmd", ""]);
}

#[test]
fn test_split_command_line_empty() {
    assert!(split_command_line("   ").is_empty());
}
