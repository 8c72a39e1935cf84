//! End-to-end tests driving the pipekern binary over its standard streams.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;

fn kernel_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pipekern"));
    cmd.env("DEV", "true").env_remove("PIPEKERN_LOG");
    cmd
}

/// Feed `input` to a kernel on its stdin and collect everything it wrote.
fn run_kernel(input: &str) -> (String, String, Output) {
    let mut child = kernel_command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pipekern");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("failed to write tasks");
    let output = child.wait_with_output().expect("failed to wait for pipekern");
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (stdout, stderr, output)
}

/// Wait until `path` holds at least `count` READY lines.
fn wait_for_ready(path: &Path, count: usize) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let contents = fs::read_to_string(path).unwrap_or_default();
        if contents.lines().filter(|l| *l == "READY").count() >= count {
            return contents;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} READY lines in {}: {contents:?}",
            path.display()
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn scenario_set_eval_list_remove_get() {
    let (stdout, stderr, output) = run_kernel(
        "SET|x|5\nEVAL|x+1\nSET|y|[1,2,3]\nREMOVE|x\nLIST\nREMOVE|x\nGET|x\n",
    );
    assert!(output.status.success());

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "READY",
            "READY",
            "6",
            "READY",
            "READY",
            "READY",
            r#"{"type":"Variable","name":"y","programmingLanguage":"Kern","nativeType":"array","nodeType":"Array","valueHint":3}END"#,
            "READY",
            "READY",
            "READY",
        ]
    );
    assert_eq!(stderr, "READY\n".repeat(8));
}

#[rstest]
#[case::empty("", 1)]
#[case::one_task("LIST\n", 2)]
#[case::failing_tasks("NOPE\nEVAL|1 / 0\nEXEC|missing\n", 4)]
#[case::blank_lines_skipped("\n\n  \nGET|x\n\n", 2)]
fn one_ready_pair_per_task(#[case] input: &str, #[case] expected: usize) {
    let (stdout, stderr, output) = run_kernel(input);
    assert!(output.status.success());
    let ready = |s: &str| s.lines().filter(|l| *l == "READY").count();
    assert_eq!(ready(&stdout), expected, "stdout: {stdout:?}");
    assert_eq!(ready(&stderr), expected, "stderr: {stderr:?}");
}

#[test]
fn unrecognized_task_recovers() {
    let (stdout, stderr, _) = run_kernel("FROB|1\nEVAL|'ok'\n");
    assert_eq!(stdout, "READY\nREADY\n\"ok\"\nREADY\n");
    let records: Vec<&str> = stderr.lines().filter(|l| *l != "READY").collect();
    assert_eq!(
        records,
        vec![r#"{"type":"ExecutionError","errorType":"UnrecognizedTask","errorMessage":"unrecognized task: \"FROB\""}"#]
    );
}

#[test]
fn integers_above_i64_round_trip() {
    let (stdout, stderr, _) = run_kernel(
        "SET|n|18446744073709551615\nGET|n\nEVAL|n > 9223372036854775807\nSET|m|[9223372036854775808]\nGET|m\nLIST\n",
    );
    assert!(!stderr.contains("ExecutionError"), "{stderr}");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        [
            "READY",
            "READY",
            "18446744073709551615",
            "READY",
            "true",
            "READY",
            "READY",
            "[9223372036854775808]",
            "READY",
            r#"{"type":"Variable","name":"m","programmingLanguage":"Kern","nativeType":"array","nodeType":"Array","valueHint":1}END"#,
            r#"{"type":"Variable","name":"n","programmingLanguage":"Kern","nativeType":"int","nodeType":"Number","valueHint":18446744073709551615}END"#,
            "READY",
        ]
    );
}

#[rstest]
#[case::array_repetition("EVAL|[1] * 9223372036854775807", "ArithmeticError")]
#[case::string_repetition("EVAL|'ab' * 9223372036854775807", "ArithmeticError")]
#[case::huge_range("EVAL|len(range(9223372036854775807))", "ArgumentError")]
#[case::long_chain(format!("EVAL|{}", vec!["1"; 200_000].join("+")), "SyntaxError")]
#[case::long_index_chain(format!("EXEC|x = [0]; x{}", "[0]".repeat(200_000)), "SyntaxError")]
fn oversized_work_fails_the_task_only(#[case] task: String, #[case] error_type: &str) {
    let (stdout, stderr, output) = run_kernel(&format!("{task}\nEVAL|1\n"));
    assert!(output.status.success(), "kernel died: {stderr}");
    assert_eq!(stdout, "READY\nREADY\n1\nREADY\n");
    assert!(stderr.contains(&format!("\"errorType\":\"{error_type}\"")), "{stderr}");
}

/// Lines the kernel writes to stdout, read on a background thread.
fn stdout_lines(child: &mut Child) -> Receiver<String> {
    let stdout = child.stdout.take().expect("stdout is piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn send_sigint(child: &Child) {
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());
}

fn next_line(lines: &Receiver<String>) -> String {
    lines.recv_timeout(Duration::from_secs(10)).expect("kernel output")
}

#[test]
fn sigint_abandons_only_the_running_task() {
    let mut child = kernel_command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pipekern");
    let mut stdin = child.stdin.take().expect("stdin is piped");
    let lines = stdout_lines(&mut child);
    assert_eq!(next_line(&lines), "READY");

    // Idle: the kernel is blocked reading its next task.
    send_sigint(&child);
    thread::sleep(Duration::from_millis(100));
    writeln!(stdin, "EVAL|7").expect("write");
    assert_eq!(next_line(&lines), "7");
    assert_eq!(next_line(&lines), "READY");

    // Busy: keep signalling until the sleep gives up its READY.
    writeln!(stdin, "EVAL|sleep(30)").expect("write");
    let started = Instant::now();
    let ready = loop {
        send_sigint(&child);
        if let Ok(line) = lines.recv_timeout(Duration::from_millis(200)) {
            break line;
        }
        assert!(started.elapsed() < Duration::from_secs(10), "sleep was not interrupted");
    };
    assert_eq!(ready, "READY");
    assert!(started.elapsed() < Duration::from_secs(10));

    writeln!(stdin, "EVAL|7").expect("write");
    assert_eq!(next_line(&lines), "7");
    assert_eq!(next_line(&lines), "READY");

    drop(stdin);
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr, "READY\n".repeat(4), "interrupts leave no error record");
}

#[test]
fn production_vocabulary_by_default() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pipekern"))
        .env_remove("DEV")
        .env_remove("PIPEKERN_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pipekern");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all("\u{1010CC}\u{10ABBA}7 * 6\n".as_bytes())
        .expect("write");
    let output = child.wait_with_output().expect("wait");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "\u{10ACDC}\n42\n\u{10ACDC}\n");
}

#[test]
fn redirected_streams_with_initial_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    let err = dir.path().join("err");
    fs::write(&input, "{\"x\": 5, \"name\": \"kern\"}\nEVAL|x * 2\nGET|name\nEVAL|nope\n").expect("write");
    fs::write(&out, "earlier\n").expect("write");

    let status = kernel_command()
        .args([&input, &out, &err])
        .stdin(Stdio::null())
        .status()
        .expect("run pipekern");
    assert!(status.success());

    let stdout = fs::read_to_string(&out).expect("read out");
    assert_eq!(stdout, "earlier\nREADY\n10\nREADY\n\"kern\"\nREADY\nREADY\n");
    let stderr = fs::read_to_string(&err).expect("read err");
    assert_eq!(stderr.lines().filter(|l| *l == "READY").count(), 4);
    assert!(stderr.contains("\"errorType\":\"NameError\""), "{stderr}");
}

#[test]
fn redirected_input_of_only_the_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    fs::write(&input, "{\"x\": 5}").expect("write");

    let status = kernel_command()
        .args([&input, &out, &dir.path().join("err")])
        .stdin(Stdio::null())
        .status()
        .expect("run pipekern");
    assert!(status.success());
    assert_eq!(fs::read_to_string(&out).expect("read out"), "READY\n");
}

#[test]
fn help_describes_the_redirected_input() {
    let output = kernel_command().arg("--help").output().expect("run pipekern");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("Only that object is decoded as context"), "{help}");
    assert!(help.contains("served as tasks"), "{help}");
}

#[test]
fn bad_initial_context_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("in");
    fs::write(&input, "[1, 2]\nLIST\n").expect("write");

    let status = kernel_command()
        .args([&input, &dir.path().join("out"), &dir.path().join("err")])
        .stdin(Stdio::null())
        .status()
        .expect("run pipekern");
    assert!(!status.success());
}

#[test]
fn wrong_argument_count_fails() {
    let output = kernel_command()
        .args(["only-one", "two"])
        .stdin(Stdio::null())
        .output()
        .expect("run pipekern");
    assert!(!output.status.success());
}

#[test]
fn fork_runs_an_independent_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    let child_in = dir.path().join("child.in");
    let child_out = dir.path().join("child.out");
    let child_err = dir.path().join("child.err");
    fs::write(&child_in, "GET|y\nGET|x\nSET|z|true\nLIST\n").expect("write");

    let fork = format!(
        "FORK|{}|{}|{}|{{\"y\": [1, 2]}}",
        child_in.display(),
        child_out.display(),
        child_err.display()
    );
    let (stdout, stderr, output) = run_kernel(&format!("SET|x|1\n{fork}\nGET|x\nGET|z\nLIST\n"));
    assert!(output.status.success());
    assert!(!stderr.contains("ExecutionError"), "{stderr}");

    // Parent: the pid, then its own context, untouched by the child.
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[..2], ["READY", "READY"]);
    let pid: u32 = lines[2].parse().expect("fork prints the child pid");
    assert!(pid > 0);
    assert_eq!(
        lines[3..],
        [
            "READY",
            "1",
            "READY",
            "READY",
            r#"{"type":"Variable","name":"x","programmingLanguage":"Kern","nativeType":"int","nodeType":"Number","valueHint":1}END"#,
            "READY",
        ]
    );

    // Child: initial readiness, then four tasks against the seeded context.
    let child_stdout = wait_for_ready(&child_out, 5);
    let child_lines: Vec<&str> = child_stdout.lines().collect();
    assert_eq!(
        child_lines,
        [
            "READY",
            "[1,2]",
            "READY",
            "READY",
            "READY",
            r#"{"type":"Variable","name":"y","programmingLanguage":"Kern","nativeType":"array","nodeType":"Array","valueHint":2}END"#,
            r#"{"type":"Variable","name":"z","programmingLanguage":"Kern","nativeType":"bool","nodeType":"Boolean","valueHint":true}END"#,
            "READY",
        ]
    );
    let child_stderr = wait_for_ready(&child_err, 5);
    assert!(!child_stderr.contains("ExecutionError"), "{child_stderr}");
}
