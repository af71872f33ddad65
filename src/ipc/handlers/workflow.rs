use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    load_result, now_rfc3339, opt_i64, require_actor, require_str, result_json, HandlerErr,
    ResultRow,
};
use crate::ipc::types::{AppState, Request};
use crate::schema::schema_for;
use crate::validate::validate_scores;
use crate::workflow::{check_transition, Actor, WorkflowAction};
use rusqlite::Connection;
use serde_json::json;

fn stale_version_err(expected: i64, current: i64) -> HandlerErr {
    HandlerErr::with_details(
        "concurrency_conflict",
        "result was modified by another caller; reload and retry",
        json!({ "expectedVersion": expected, "currentVersion": current }),
    )
}

fn race_lost_err(current: &ResultRow, action: WorkflowAction) -> HandlerErr {
    HandlerErr::with_details(
        "workflow_violation",
        format!(
            "result is already {}; {} is not legal from there",
            current.status.as_str(),
            action.as_str()
        ),
        json!({
            "currentStatus": current.status.as_str(),
            "action": action.as_str(),
        }),
    )
}

/// Single-record transition under the optimistic guard. The UPDATE re-checks
/// status and version, so of two concurrent callers exactly one wins; the
/// loser resolves to workflow_violation (status moved) or
/// concurrency_conflict (same status, newer version).
fn apply_transition(
    conn: &Connection,
    result_id: &str,
    action: WorkflowAction,
    actor: &Actor,
    expected_version: Option<i64>,
) -> Result<ResultRow, HandlerErr> {
    let row = load_result(conn, result_id)?;

    if let Some(expected) = expected_version {
        if expected != row.version {
            return Err(stale_version_err(expected, row.version));
        }
    }

    let target = check_transition(row.status, action, actor)?;

    if action == WorkflowAction::Approve {
        // A draft that drifted out of line with the current schema or
        // grading config must not be approved as-is.
        let config = db::load_grading_config(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let schema = schema_for(row.education_level, config.nursery_max_marks);
        let violations = validate_scores(&schema, &row.raw_scores);
        if !violations.is_empty() {
            return Err(HandlerErr::with_details(
                "workflow_violation",
                "cannot approve a result with outstanding validation violations",
                json!({
                    "currentStatus": row.status.as_str(),
                    "action": action.as_str(),
                    "violations": violations,
                }),
            ));
        }
    }

    let now = now_rfc3339();
    let affected = match action {
        WorkflowAction::Approve => conn.execute(
            "UPDATE results SET status = 'approved', approved_by = ?, approved_at = ?,
                updated_at = ?, version = version + 1
             WHERE id = ? AND status = 'draft' AND version = ?",
            (&actor.id, &now, &now, &row.id, row.version),
        ),
        WorkflowAction::Publish => conn.execute(
            "UPDATE results SET status = 'published', published_by = ?, published_at = ?,
                updated_at = ?, version = version + 1
             WHERE id = ? AND status = 'approved' AND version = ?",
            (&actor.id, &now, &now, &row.id, row.version),
        ),
        // Reopen clears both audit pairs and the stale position; the row
        // re-enters ranking only after it is approved again.
        WorkflowAction::Reopen => conn.execute(
            "UPDATE results SET status = 'draft', approved_by = NULL, approved_at = NULL,
                published_by = NULL, published_at = NULL, class_position = NULL,
                updated_at = ?, version = version + 1
             WHERE id = ? AND status = ? AND version = ?",
            (&now, &row.id, row.status.as_str(), row.version),
        ),
    }
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    if affected == 0 {
        let current = load_result(conn, &row.id)?;
        if current.status != row.status {
            return Err(race_lost_err(&current, action));
        }
        return Err(stale_version_err(row.version, current.version));
    }

    crate::ipc::helpers::record_transition(
        conn,
        &row.id,
        row.status.as_str(),
        target.as_str(),
        action.as_str(),
        &actor.id,
    )?;

    load_result(conn, &row.id)
}

fn handle_single(
    state: &mut AppState,
    req: &Request,
    action: WorkflowAction,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match require_str(&req.params, "resultId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let actor = match require_actor(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let expected_version = opt_i64(&req.params, "expectedVersion");

    match apply_transition(conn, &result_id, action, &actor, expected_version) {
        Ok(row) => ok(&req.id, result_json(&row)),
        Err(e) => e.response(&req.id),
    }
}

fn handle_bulk_transition(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let action_raw = match require_str(&req.params, "action") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(action) = WorkflowAction::parse(&action_raw) else {
        return err(
            &req.id,
            "bad_params",
            "action must be one of: approve, publish, reopen",
            Some(json!({ "action": action_raw })),
        );
    };
    let actor = match require_actor(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(ids) = req.params.get("resultIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing resultIds[]", None);
    };

    // Each record gets the full single-record guard; one failure never
    // aborts the rest of the batch.
    let mut outcomes: Vec<serde_json::Value> = Vec::with_capacity(ids.len());
    let mut transitioned = 0_usize;
    for (i, id_value) in ids.iter().enumerate() {
        let Some(result_id) = id_value.as_str() else {
            outcomes.push(json!({
                "resultId": null,
                "ok": false,
                "error": {
                    "code": "bad_params",
                    "message": format!("resultIds[{}] must be a string", i),
                }
            }));
            continue;
        };
        match apply_transition(conn, result_id, action, &actor, None) {
            Ok(row) => {
                transitioned += 1;
                outcomes.push(json!({
                    "resultId": result_id,
                    "ok": true,
                    "status": row.status.as_str(),
                }));
            }
            Err(e) => outcomes.push(json!({
                "resultId": result_id,
                "ok": false,
                "error": e.to_outcome(),
            })),
        }
    }

    ok(
        &req.id,
        json!({
            "action": action.as_str(),
            "transitioned": transitioned,
            "failed": outcomes.len() - transitioned,
            "outcomes": outcomes,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.approve" => Some(handle_single(state, req, WorkflowAction::Approve)),
        "results.publish" => Some(handle_single(state, req, WorkflowAction::Publish)),
        "results.reopen" => Some(handle_single(state, req, WorkflowAction::Reopen)),
        "results.bulkTransition" => Some(handle_bulk_transition(state, req)),
        _ => None,
    }
}
