use crate::aggregate::{aggregate_rows, SubjectRow};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::rankings::check_component_consistency;
use crate::ipc::helpers::{
    now_rfc3339, opt_i64, opt_str, require_actor, require_i64, require_str, row_to_result,
    HandlerErr, ResultRow, RESULT_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use crate::rank::competition_positions;
use crate::workflow::{check_transition, ResultStatus, WorkflowAction};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn load_student_term_rows(
    conn: &Connection,
    student_id: &str,
    session: &str,
    term: i64,
) -> Result<Vec<ResultRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM results
         WHERE student_id = ? AND session = ? AND term = ?
         ORDER BY subject_id",
        RESULT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    stmt.query_map((student_id, session, term), |r| row_to_result(r))
        .and_then(|it| it.collect())
        .map_err(HandlerErr::db)
}

/// Position of each student in the class by mean grand total across their
/// subjects, same competition tie-break as subject ranking. Unrounded means
/// are compared so display rounding cannot manufacture ties.
fn class_position_by_average(
    conn: &Connection,
    class_id: &str,
    session: &str,
    term: i64,
    student_id: &str,
) -> Result<Option<i64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, grand_total FROM results
             WHERE class_id = ? AND session = ? AND term = ?",
        )
        .map_err(HandlerErr::db)?;
    let pairs: Vec<(String, f64)> = stmt
        .query_map((class_id, session, term), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect())
        .map_err(HandlerErr::db)?;

    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for (sid, total) in pairs {
        let entry = sums.entry(sid).or_insert((0.0, 0));
        entry.0 += total;
        entry.1 += 1;
    }
    let averages: Vec<(String, f64)> = sums
        .into_iter()
        .map(|(sid, (sum, count))| (sid, sum / count as f64))
        .collect();

    Ok(competition_positions(&averages)
        .into_iter()
        .find(|(sid, _)| sid == student_id)
        .map(|(_, pos)| pos))
}

fn term_report_status(
    conn: &Connection,
    student_id: &str,
    session: &str,
    term: i64,
) -> Result<Option<(String, ResultStatus, i64)>, HandlerErr> {
    conn.query_row(
        "SELECT id, status, version FROM term_reports
         WHERE student_id = ? AND session = ? AND term = ?",
        (student_id, session, term),
        |r| {
            let status_raw: String = r.get(1)?;
            let status = ResultStatus::parse(&status_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("unknown term report status: {}", status_raw).into(),
                )
            })?;
            Ok((r.get::<_, String>(0)?, status, r.get::<_, i64>(2)?))
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn build_term_report(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(&req.params, "studentId")?;
    let session = require_str(&req.params, "session")?;
    let term = require_i64(&req.params, "term")?;

    let rows = load_student_term_rows(conn, &student_id, &session, term)?;
    check_component_consistency(conn, &rows)?;

    let config = db::load_grading_config(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let subject_rows: Vec<SubjectRow> = rows
        .iter()
        .map(|r| SubjectRow {
            subject_id: r.subject_id.clone(),
            grand_total: r.grand_total,
            percentage: r.percentage,
            grade: r.grade.clone(),
            is_passed: r.is_passed,
            status: r.status,
        })
        .collect();
    let totals = aggregate_rows(&subject_rows, &config)
        .map_err(|e| HandlerErr::new("consistency_error", e.message))?;

    let class_id = rows.first().map(|r| r.class_id.clone());
    let class_position = match &class_id {
        Some(cid) => class_position_by_average(conn, cid, &session, term, &student_id)?,
        None => None,
    };

    let status = term_report_status(conn, &student_id, &session, term)?
        .map(|(_, status, _)| status)
        .unwrap_or(ResultStatus::Draft);

    let subjects: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "resultId": r.id,
                "subjectId": r.subject_id,
                "grandTotal": r.grand_total,
                "percentage": r.percentage,
                "grade": r.grade,
                "isPassed": r.is_passed,
                "status": r.status.as_str(),
                "classPosition": r.class_position,
            })
        })
        .collect();

    Ok(json!({
        "studentId": student_id,
        "classId": class_id,
        "session": session,
        "term": term,
        "status": status.as_str(),
        "totalSubjects": totals.total_subjects,
        "subjectsPassed": totals.subjects_passed,
        "subjectsFailed": totals.subjects_failed,
        "totalScore": totals.total_score,
        "averageScore": totals.average_score,
        "gpa": totals.gpa,
        "classPosition": class_position,
        "subjects": subjects,
    }))
}

fn handle_term_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match build_term_report(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn set_term_status(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(&req.params, "studentId")?;
    let session = require_str(&req.params, "session")?;
    let term = require_i64(&req.params, "term")?;
    let action_raw = require_str(&req.params, "action")?;
    let Some(action) = WorkflowAction::parse(&action_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "action must be one of: approve, publish, reopen",
            json!({ "action": action_raw }),
        ));
    };
    let actor = require_actor(&req.params)?;
    let expected_version = opt_i64(&req.params, "expectedVersion");

    // A term without a status row is an implicit draft. Check the transition
    // against that state before anything is written, so an illegal first
    // action leaves no row behind.
    let existing = term_report_status(conn, &student_id, &session, term)?;
    let (current, version) = existing
        .as_ref()
        .map(|(_, status, version)| (*status, *version))
        .unwrap_or((ResultStatus::Draft, 1));

    if let Some(expected) = expected_version {
        if expected != version {
            return Err(HandlerErr::with_details(
                "concurrency_conflict",
                "term report was modified by another caller; reload and retry",
                json!({ "expectedVersion": expected, "currentVersion": version }),
            ));
        }
    }

    let target = check_transition(current, action, &actor)?;

    let report_id = match existing {
        Some((id, _, _)) => id,
        None => {
            // First legal transition materializes the status row. The class
            // comes from the subject rows (or an explicit param when none
            // exist yet).
            let rows = load_student_term_rows(conn, &student_id, &session, term)?;
            let class_id = rows
                .first()
                .map(|r| r.class_id.clone())
                .or_else(|| opt_str(&req.params, "classId"))
                .ok_or_else(|| {
                    HandlerErr::new(
                        "bad_params",
                        "no subject results for this term; supply classId to create the report",
                    )
                })?;
            let report_id = Uuid::new_v4().to_string();
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO term_reports(
                    id, student_id, class_id, session, term, status,
                    created_at, updated_at, version
                 ) VALUES(?, ?, ?, ?, ?, 'draft', ?, ?, 1)",
                (&report_id, &student_id, &class_id, &session, term, &now, &now),
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            report_id
        }
    };

    let now = now_rfc3339();
    let affected = match action {
        WorkflowAction::Approve => conn.execute(
            "UPDATE term_reports SET status = 'approved', approved_by = ?, approved_at = ?,
                updated_at = ?, version = version + 1
             WHERE id = ? AND status = 'draft' AND version = ?",
            (&actor.id, &now, &now, &report_id, version),
        ),
        WorkflowAction::Publish => conn.execute(
            "UPDATE term_reports SET status = 'published', published_by = ?, published_at = ?,
                updated_at = ?, version = version + 1
             WHERE id = ? AND status = 'approved' AND version = ?",
            (&actor.id, &now, &now, &report_id, version),
        ),
        WorkflowAction::Reopen => conn.execute(
            "UPDATE term_reports SET status = 'draft', approved_by = NULL, approved_at = NULL,
                published_by = NULL, published_at = NULL, updated_at = ?, version = version + 1
             WHERE id = ? AND status = ? AND version = ?",
            (&now, &report_id, current.as_str(), version),
        ),
    }
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    if affected == 0 {
        let current_now = term_report_status(conn, &student_id, &session, term)?
            .map(|(_, status, _)| status)
            .unwrap_or(ResultStatus::Draft);
        if current_now != current {
            return Err(HandlerErr::with_details(
                "workflow_violation",
                format!(
                    "term report is already {}; {} is not legal from there",
                    current_now.as_str(),
                    action.as_str()
                ),
                json!({
                    "currentStatus": current_now.as_str(),
                    "action": action.as_str(),
                }),
            ));
        }
        return Err(HandlerErr::with_details(
            "concurrency_conflict",
            "term report was modified by another caller; reload and retry",
            json!({ "currentVersion": version }),
        ));
    }

    Ok(json!({
        "studentId": student_id,
        "session": session,
        "term": term,
        "status": target.as_str(),
    }))
}

fn handle_term_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match set_term_status(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "term.report" => Some(handle_term_report(state, req)),
        "term.setStatus" => Some(handle_term_set_status(state, req)),
        _ => None,
    }
}
