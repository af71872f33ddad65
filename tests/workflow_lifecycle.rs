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

fn seed_draft(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "results.enter",
        json!({
            "studentId": "stu-1",
            "classId": "ss1a",
            "subjectId": subject,
            "session": "2025/2026",
            "term": 1,
            "level": "senior_secondary",
            "scores": { "test1": 8.0, "test2": 9.0, "test3": 7.0, "exam": 60.0 },
            "enteredBy": "teacher-1",
        }),
    );
    result
        .get("resultId")
        .and_then(|v| v.as_str())
        .expect("resultId")
        .to_string()
}

#[test]
fn draft_cannot_be_published_directly() {
    let workspace = temp_dir("resultd-wf-direct-publish");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result_id = seed_draft(&mut stdin, &mut reader, "2", "math");

    let raw = request(
        &mut stdin,
        &mut reader,
        "3",
        "results.publish",
        json!({ "resultId": result_id, "actor": full_actor() }),
    );
    assert_eq!(error_code(&raw), Some("workflow_violation"));
    let details = raw
        .get("error")
        .and_then(|e| e.get("details"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    assert_eq!(
        details.get("currentStatus").and_then(|v| v.as_str()),
        Some("draft")
    );
    assert_eq!(
        details.get("action").and_then(|v| v.as_str()),
        Some("publish")
    );

    // The record did not move.
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.get",
        json!({ "resultId": result_id }),
    );
    assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("draft"));
}

#[test]
fn capability_is_required_for_each_transition() {
    let workspace = temp_dir("resultd-wf-capability");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result_id = seed_draft(&mut stdin, &mut reader, "2", "math");

    let raw = request(
        &mut stdin,
        &mut reader,
        "3",
        "results.approve",
        json!({
            "resultId": result_id,
            "actor": { "id": "teacher-1", "canApprove": false, "canPublish": false },
        }),
    );
    assert_eq!(error_code(&raw), Some("workflow_violation"));
}

#[test]
fn full_lifecycle_stamps_audit_fields_and_freezes_scores() {
    let workspace = temp_dir("resultd-wf-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result_id = seed_draft(&mut stdin, &mut reader, "2", "math");

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.approve",
        json!({ "resultId": result_id, "actor": full_actor() }),
    );
    assert_eq!(
        approved.get("status").and_then(|v| v.as_str()),
        Some("approved")
    );
    assert_eq!(
        approved.get("approvedBy").and_then(|v| v.as_str()),
        Some("principal-1")
    );
    assert!(approved
        .get("approvedAt")
        .and_then(|v| v.as_str())
        .is_some());

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.publish",
        json!({ "resultId": result_id, "actor": full_actor() }),
    );
    assert_eq!(
        published.get("status").and_then(|v| v.as_str()),
        Some("published")
    );
    assert_eq!(
        published.get("publishedBy").and_then(|v| v.as_str()),
        Some("principal-1")
    );
    assert!(published
        .get("publishedAt")
        .and_then(|v| v.as_str())
        .is_some());

    // Published scores are frozen.
    let edit = request(
        &mut stdin,
        &mut reader,
        "5",
        "results.enter",
        json!({
            "studentId": "stu-1",
            "classId": "ss1a",
            "subjectId": "math",
            "session": "2025/2026",
            "term": 1,
            "level": "senior_secondary",
            "scores": { "test1": 10.0, "test2": 10.0, "test3": 10.0, "exam": 70.0 },
            "enteredBy": "teacher-1",
        }),
    );
    assert_eq!(error_code(&edit), Some("workflow_violation"));

    // Published rows may not be deleted either.
    let delete = request(
        &mut stdin,
        &mut reader,
        "6",
        "results.delete",
        json!({ "resultId": result_id }),
    );
    assert_eq!(error_code(&delete), Some("workflow_violation"));

    // Remarks remain editable after publication.
    let remarked = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "results.updateRemark",
        json!({ "resultId": result_id, "remark": "Excellent work." }),
    );
    assert_eq!(
        remarked.get("teacherRemark").and_then(|v| v.as_str()),
        Some("Excellent work.")
    );

    // Reopen clears both audit pairs and unfreezes the scores.
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "results.reopen",
        json!({ "resultId": result_id, "actor": full_actor() }),
    );
    assert_eq!(
        reopened.get("status").and_then(|v| v.as_str()),
        Some("draft")
    );
    assert!(reopened.get("approvedBy").map(|v| v.is_null()).unwrap_or(false));
    assert!(reopened.get("publishedBy").map(|v| v.is_null()).unwrap_or(false));

    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "results.enter",
        json!({
            "studentId": "stu-1",
            "classId": "ss1a",
            "subjectId": "math",
            "session": "2025/2026",
            "term": 1,
            "level": "senior_secondary",
            "scores": { "test1": 10.0, "test2": 9.0, "test3": 8.0, "exam": 65.0 },
            "enteredBy": "teacher-1",
        }),
    );
    assert_eq!(
        edited.get("grandTotal").and_then(|v| v.as_f64()),
        Some(92.0)
    );

    // The full history is attached to the record.
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "results.get",
        json!({ "resultId": result_id }),
    );
    let actions: Vec<String> = row
        .get("transitions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|t| t.get("action").and_then(|v| v.as_str()).map(String::from))
        .collect();
    assert_eq!(actions, vec!["create", "approve", "publish", "reopen"]);
}

#[test]
fn draft_deletion_is_allowed() {
    let workspace = temp_dir("resultd-wf-delete-draft");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result_id = seed_draft(&mut stdin, &mut reader, "2", "biology");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.delete",
        json!({ "resultId": result_id }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_bool()), Some(true));

    let raw = request(
        &mut stdin,
        &mut reader,
        "4",
        "results.get",
        json!({ "resultId": result_id }),
    );
    assert_eq!(error_code(&raw), Some("not_found"));
}
