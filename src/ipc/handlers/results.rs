use crate::calc::compute_result;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    load_result, now_rfc3339, opt_i64, opt_str, parse_scores, record_transition, require_i64,
    require_level, require_str, result_json, row_to_result, HandlerErr, ResultRow, RESULT_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use crate::schema::schema_for;
use crate::validate::validate_scores;
use crate::workflow::ResultStatus;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_result_by_key(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    session: &str,
    term: i64,
) -> Result<Option<ResultRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM results
         WHERE student_id = ? AND subject_id = ? AND session = ? AND term = ?",
        RESULT_COLUMNS
    );
    conn.query_row(&sql, (student_id, subject_id, session, term), |r| {
        row_to_result(r)
    })
    .optional()
    .map_err(HandlerErr::db)
}

fn enter_result(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(&req.params, "studentId")?;
    let class_id = require_str(&req.params, "classId")?;
    let subject_id = require_str(&req.params, "subjectId")?;
    let session = require_str(&req.params, "session")?;
    let term = require_i64(&req.params, "term")?;
    let level = require_level(&req.params, "level")?;
    let entered_by = require_str(&req.params, "enteredBy")?;
    let remark = opt_str(&req.params, "remark");
    let expected_version = opt_i64(&req.params, "expectedVersion");

    let Some(scores_raw) = req.params.get("scores") else {
        return Err(HandlerErr::new("bad_params", "missing scores"));
    };
    let scores = parse_scores(scores_raw)?;

    let config = db::load_grading_config(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let schema = schema_for(level, config.nursery_max_marks);

    let violations = validate_scores(&schema, &scores);
    if !violations.is_empty() {
        return Err(HandlerErr::with_details(
            "validation_failed",
            format!("{} component score(s) rejected", violations.len()),
            json!({ "violations": violations }),
        ));
    }

    let computed = compute_result(level, &schema, &scores, &config);
    let scores_text = serde_json::to_string(&scores)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    let now = now_rfc3339();

    let existing = load_result_by_key(conn, &student_id, &subject_id, &session, term)?;
    let result_id = match existing {
        Some(row) => {
            if row.education_level != level {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "educationLevel is immutable for an existing result",
                    json!({
                        "storedLevel": row.education_level.as_str(),
                        "requestedLevel": level.as_str(),
                    }),
                ));
            }
            if row.status != ResultStatus::Draft {
                return Err(HandlerErr::with_details(
                    "workflow_violation",
                    "scores are frozen once a result leaves draft; reopen it first",
                    json!({
                        "currentStatus": row.status.as_str(),
                        "action": "edit_scores",
                    }),
                ));
            }
            if let Some(expected) = expected_version {
                if expected != row.version {
                    return Err(HandlerErr::with_details(
                        "concurrency_conflict",
                        "result was modified by another caller; reload and retry",
                        json!({ "expectedVersion": expected, "currentVersion": row.version }),
                    ));
                }
            }

            let affected = conn
                .execute(
                    "UPDATE results SET
                        class_id = ?, raw_scores = ?, ca_total = ?, grand_total = ?,
                        percentage = ?, grade = ?, is_passed = ?,
                        teacher_remark = COALESCE(?, teacher_remark),
                        entered_by = ?, updated_at = ?, version = version + 1
                     WHERE id = ? AND status = 'draft' AND version = ?",
                    (
                        &class_id,
                        &scores_text,
                        computed.ca_total,
                        computed.grand_total,
                        computed.percentage,
                        &computed.grade,
                        computed.is_passed as i64,
                        &remark,
                        &entered_by,
                        &now,
                        &row.id,
                        row.version,
                    ),
                )
                .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            if affected == 0 {
                // Lost the race: someone else edited or transitioned this row
                // between our read and write.
                let current = load_result(conn, &row.id)?;
                if current.status != ResultStatus::Draft {
                    return Err(HandlerErr::with_details(
                        "workflow_violation",
                        "scores are frozen once a result leaves draft; reopen it first",
                        json!({
                            "currentStatus": current.status.as_str(),
                            "action": "edit_scores",
                        }),
                    ));
                }
                return Err(HandlerErr::with_details(
                    "concurrency_conflict",
                    "result was modified by another caller; reload and retry",
                    json!({ "currentVersion": current.version }),
                ));
            }
            row.id
        }
        None => {
            let result_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO results(
                    id, student_id, class_id, subject_id, session, term,
                    education_level, raw_scores, ca_total, grand_total, percentage,
                    grade, is_passed, class_position, status, teacher_remark,
                    entered_by, created_at, updated_at, version
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 'draft', ?, ?, ?, ?, 1)",
                rusqlite::params![
                    result_id,
                    student_id,
                    class_id,
                    subject_id,
                    session,
                    term,
                    level.as_str(),
                    scores_text,
                    computed.ca_total,
                    computed.grand_total,
                    computed.percentage,
                    computed.grade,
                    computed.is_passed as i64,
                    remark,
                    entered_by,
                    now,
                    now,
                ],
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            record_transition(conn, &result_id, "draft", "draft", "create", &entered_by)?;
            result_id
        }
    };

    let row = load_result(conn, &result_id)?;
    Ok(result_json(&row))
}

fn handle_results_enter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match enter_result(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match require_str(&req.params, "resultId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let row = match load_result(conn, &result_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT from_status, to_status, action, actor, at
         FROM result_transitions WHERE result_id = ? ORDER BY at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let transitions: Result<Vec<serde_json::Value>, _> = stmt
        .query_map([&result_id], |r| {
            Ok(json!({
                "fromStatus": r.get::<_, String>(0)?,
                "toStatus": r.get::<_, String>(1)?,
                "action": r.get::<_, String>(2)?,
                "actor": r.get::<_, String>(3)?,
                "at": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect());
    let transitions = match transitions {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut result = result_json(&row);
    result["transitions"] = json!(transitions);
    ok(&req.id, result)
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    for (key, clause) in [
        ("classId", "class_id = ?"),
        ("subjectId", "subject_id = ?"),
        ("session", "session = ?"),
        ("studentId", "student_id = ?"),
        ("status", "status = ?"),
    ] {
        if let Some(v) = opt_str(&req.params, key) {
            clauses.push(clause);
            binds.push(Value::Text(v));
        }
    }
    if let Some(term) = opt_i64(&req.params, "term") {
        clauses.push("term = ?");
        binds.push(Value::Integer(term));
    }

    let mut sql = format!("SELECT {} FROM results", RESULT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY subject_id, student_id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<ResultRow>, _> = stmt
        .query_map(params_from_iter(binds), |r| row_to_result(r))
        .and_then(|it| it.collect());
    match rows {
        Ok(rows) => {
            let out: Vec<serde_json::Value> = rows.iter().map(result_json).collect();
            ok(&req.id, json!({ "results": out, "count": out.len() }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

// Remarks stay editable in every status; publication freezes scores only.
fn handle_results_update_remark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match require_str(&req.params, "resultId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let remark = req.params.get("remark").and_then(|v| v.as_str());

    let row = match load_result(conn, &result_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = conn.execute(
        "UPDATE results SET teacher_remark = ?, updated_at = ? WHERE id = ?",
        (remark, now_rfc3339(), &row.id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    match load_result(conn, &result_id) {
        Ok(row) => ok(&req.id, result_json(&row)),
        Err(e) => e.response(&req.id),
    }
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match require_str(&req.params, "resultId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let row = match load_result(conn, &result_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // Only unfinalized drafts may be removed; approved and published rows
    // must go back through reopen.
    if row.status != ResultStatus::Draft {
        return err(
            &req.id,
            "workflow_violation",
            format!("cannot delete a {} result", row.status.as_str()),
            Some(json!({
                "currentStatus": row.status.as_str(),
                "action": "delete",
            })),
        );
    }
    if let Err(e) = conn.execute(
        "DELETE FROM result_transitions WHERE result_id = ?",
        [&row.id],
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM results WHERE id = ?", [&row.id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": true, "resultId": row.id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.enter" => Some(handle_results_enter(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.updateRemark" => Some(handle_results_update_remark(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        _ => None,
    }
}
