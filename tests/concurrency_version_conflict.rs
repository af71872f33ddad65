use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn full_actor() -> serde_json::Value {
    json!({ "id": "principal-1", "canApprove": true, "canPublish": true })
}

fn enter_params(exam: f64) -> serde_json::Value {
    json!({
        "studentId": "stu-1",
        "classId": "ss1a",
        "subjectId": "math",
        "session": "2025/2026",
        "term": 1,
        "level": "senior_secondary",
        "scores": { "test1": 8.0, "test2": 9.0, "test3": 7.0, "exam": exam },
        "enteredBy": "teacher-1",
    })
}

#[test]
fn stale_version_on_edit_is_a_concurrency_conflict() {
    let workspace = temp_dir("resultd-conc-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(&mut stdin, &mut reader, "2", "results.enter", enter_params(50.0));
    assert_eq!(first.get("version").and_then(|v| v.as_i64()), Some(1));

    // An edit pinned to version 1 succeeds and moves the record to 2.
    let mut pinned = enter_params(55.0);
    pinned["expectedVersion"] = json!(1);
    let second = request_ok(&mut stdin, &mut reader, "3", "results.enter", pinned);
    assert_eq!(second.get("version").and_then(|v| v.as_i64()), Some(2));

    // Replaying the same pinned edit loses: the record is at 2 now.
    let mut stale = enter_params(60.0);
    stale["expectedVersion"] = json!(1);
    let raw = request(&mut stdin, &mut reader, "4", "results.enter", stale);
    assert_eq!(error_code(&raw), Some("concurrency_conflict"));
    let details = raw
        .get("error")
        .and_then(|e| e.get("details"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    assert_eq!(
        details.get("expectedVersion").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        details.get("currentVersion").and_then(|v| v.as_i64()),
        Some(2)
    );

    // The losing write changed nothing.
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.get",
        json!({ "resultId": second.get("resultId").and_then(|v| v.as_str()) }),
    );
    assert_eq!(row.get("grandTotal").and_then(|v| v.as_f64()), Some(79.0));
    assert_eq!(row.get("version").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn stale_version_on_transition_is_a_concurrency_conflict() {
    let workspace = temp_dir("resultd-conc-transition");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let entered = request_ok(&mut stdin, &mut reader, "2", "results.enter", enter_params(50.0));
    let result_id = entered
        .get("resultId")
        .and_then(|v| v.as_str())
        .expect("resultId")
        .to_string();

    // A sibling edit bumps the version to 2 behind the approver's back.
    let _ = request_ok(&mut stdin, &mut reader, "3", "results.enter", enter_params(55.0));

    let raw = request(
        &mut stdin,
        &mut reader,
        "4",
        "results.approve",
        json!({ "resultId": result_id, "actor": full_actor(), "expectedVersion": 1 }),
    );
    assert_eq!(error_code(&raw), Some("concurrency_conflict"));

    // Retrying against the current version succeeds.
    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.approve",
        json!({ "resultId": result_id, "actor": full_actor(), "expectedVersion": 2 }),
    );
    assert_eq!(
        approved.get("status").and_then(|v| v.as_str()),
        Some("approved")
    );

    // Losing an already-decided race resolves to workflow_violation, not
    // another conflict: the status itself has moved on.
    let replay = request(
        &mut stdin,
        &mut reader,
        "6",
        "results.approve",
        json!({ "resultId": result_id, "actor": full_actor() }),
    );
    assert_eq!(error_code(&replay), Some("workflow_violation"));
    let details = replay
        .get("error")
        .and_then(|e| e.get("details"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    assert_eq!(
        details.get("currentStatus").and_then(|v| v.as_str()),
        Some("approved")
    );
}
