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

fn enter_params(scores: serde_json::Value) -> serde_json::Value {
    json!({
        "studentId": "stu-1",
        "classId": "jss2a",
        "subjectId": "math",
        "session": "2025/2026",
        "term": 1,
        "level": "primary",
        "scores": scores,
        "enteredBy": "teacher-1",
    })
}

#[test]
fn rejects_every_out_of_range_component_at_once() {
    let workspace = temp_dir("resultd-entry-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let raw = request(
        &mut stdin,
        &mut reader,
        "2",
        "results.enter",
        enter_params(json!({
            "practical": 7.0,
            "exam": -3.0,
            "quiz": 2.0,
            "continuous_assessment": 12.0
        })),
    );

    assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = raw.get("error").cloned().unwrap_or_else(|| json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    let violations = error
        .get("details")
        .and_then(|d| d.get("violations"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(violations.len(), 3, "violations: {:?}", violations);

    let has = |component: &str, kind: &str| {
        violations.iter().any(|v| {
            v.get("component").and_then(|c| c.as_str()) == Some(component)
                && v.get("kind").and_then(|k| k.as_str()) == Some(kind)
        })
    };
    assert!(has("practical", "above_max"));
    assert!(has("exam", "below_min"));
    assert!(has("quiz", "unknown_component"));

    // Nothing was persisted for the rejected submission.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.list",
        json!({ "studentId": "stu-1" }),
    );
    assert_eq!(listing.get("count").and_then(|v| v.as_u64()), Some(0));
}

#[test]
fn valid_entry_computes_derived_fields_and_missing_components_default_to_zero() {
    let workspace = temp_dir("resultd-entry-compute");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // take_home_test, appearance, project, note_copying left unentered.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.enter",
        enter_params(json!({
            "continuous_assessment": 13.0,
            "practical": 4.0,
            "exam": 50.0
        })),
    );

    assert_eq!(result.get("caTotal").and_then(|v| v.as_f64()), Some(17.0));
    assert_eq!(
        result.get("grandTotal").and_then(|v| v.as_f64()),
        Some(67.0)
    );
    assert_eq!(
        result.get("percentage").and_then(|v| v.as_f64()),
        Some(67.0)
    );
    assert_eq!(result.get("grade").and_then(|v| v.as_str()), Some("B"));
    assert_eq!(result.get("isPassed").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(result.get("status").and_then(|v| v.as_str()), Some("draft"));
    assert_eq!(result.get("version").and_then(|v| v.as_i64()), Some(1));
    assert!(result.get("classPosition").map(|v| v.is_null()).unwrap_or(false));

    // Re-entering scores on the same draft recomputes and bumps the version.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.enter",
        enter_params(json!({
            "continuous_assessment": 13.0,
            "practical": 4.0,
            "exam": 55.0
        })),
    );
    assert_eq!(
        updated.get("resultId").and_then(|v| v.as_str()),
        result.get("resultId").and_then(|v| v.as_str())
    );
    assert_eq!(
        updated.get("grandTotal").and_then(|v| v.as_f64()),
        Some(72.0)
    );
    assert_eq!(updated.get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(updated.get("version").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn education_level_is_immutable_per_result() {
    let workspace = temp_dir("resultd-entry-level");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.enter",
        enter_params(json!({ "exam": 40.0 })),
    );

    let mut params = enter_params(json!({ "test1": 5.0, "exam": 40.0 }));
    params["level"] = json!("senior_secondary");
    let raw = request(&mut stdin, &mut reader, "3", "results.enter", params);
    assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        raw.get("error").and_then(|e| e.get("code")).and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
