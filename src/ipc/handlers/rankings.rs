use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    now_rfc3339, require_i64, require_str, row_to_result, HandlerErr, ResultRow, RESULT_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use crate::rank::{rank_results, RankInput};
use crate::schema::schema_for;
use crate::validate::{validate_scores, ViolationKind};
use crate::workflow::ResultStatus;
use rusqlite::Connection;
use serde_json::json;

/// Rows whose stored component set no longer matches their level's schema are
/// a data-integrity fault: abort instead of ranking over garbage.
pub fn check_component_consistency(
    conn: &Connection,
    rows: &[ResultRow],
) -> Result<(), HandlerErr> {
    let config = db::load_grading_config(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    for row in rows {
        let schema = schema_for(row.education_level, config.nursery_max_marks);
        let unknown: Vec<String> = validate_scores(&schema, &row.raw_scores)
            .into_iter()
            .filter(|v| v.kind == ViolationKind::UnknownComponent)
            .map(|v| v.component)
            .collect();
        if !unknown.is_empty() {
            return Err(HandlerErr::with_details(
                "consistency_error",
                format!(
                    "result {} stores components not in the {} schema",
                    row.id,
                    row.education_level.as_str()
                ),
                json!({
                    "resultId": row.id,
                    "educationLevel": row.education_level.as_str(),
                    "unknownComponents": unknown,
                }),
            ));
        }
    }
    Ok(())
}

fn rank_class(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let class_id = require_str(&req.params, "classId")?;
    let subject_id = require_str(&req.params, "subjectId")?;
    let session = require_str(&req.params, "session")?;
    let term = require_i64(&req.params, "term")?;

    let sql = format!(
        "SELECT {} FROM results
         WHERE class_id = ? AND subject_id = ? AND session = ? AND term = ?
         ORDER BY student_id",
        RESULT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows: Vec<ResultRow> = stmt
        .query_map((&class_id, &subject_id, &session, term), |r| {
            row_to_result(r)
        })
        .and_then(|it| it.collect())
        .map_err(HandlerErr::db)?;

    check_component_consistency(conn, &rows)?;

    let inputs: Vec<RankInput> = rows
        .iter()
        .map(|r| RankInput {
            id: r.id.clone(),
            grand_total: r.grand_total,
            status: r.status,
        })
        .collect();
    let (ranked, stats) = rank_results(&inputs);

    // Write positions back; drafts carry no position. Idempotent: re-running
    // over an unchanged sibling set rewrites the same values.
    let now = now_rfc3339();
    for row in &rows {
        if row.status == ResultStatus::Draft && row.class_position.is_some() {
            conn.execute(
                "UPDATE results SET class_position = NULL, updated_at = ? WHERE id = ?",
                (&now, &row.id),
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        }
    }
    for entry in &ranked {
        conn.execute(
            "UPDATE results SET class_position = ?, updated_at = ? WHERE id = ?",
            (entry.position, &now, &entry.id),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    let by_id = |id: &str| rows.iter().find(|r| r.id == id);
    let positions: Vec<serde_json::Value> = ranked
        .iter()
        .map(|entry| {
            let student_id = by_id(&entry.id).map(|r| r.student_id.clone());
            json!({
                "resultId": entry.id,
                "studentId": student_id,
                "grandTotal": entry.grand_total,
                "position": entry.position,
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "subjectId": subject_id,
        "session": session,
        "term": term,
        "positions": positions,
        "classAverage": stats.class_average,
        "highest": stats.highest,
        "lowest": stats.lowest,
        "rankedCount": stats.ranked_count,
        "draftCount": rows.len() - stats.ranked_count,
    }))
}

fn handle_rank_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match rank_class(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankings.class" => Some(handle_rank_class(state, req)),
        _ => None,
    }
}
