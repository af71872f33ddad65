use crate::ipc::error::err;
use crate::schema::EducationLevel;
use crate::workflow::{Actor, ResultStatus, WorkflowViolation};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn to_outcome(&self) -> serde_json::Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(d) = &self.details {
            error["details"] = d.clone();
        }
        error
    }
}

impl From<WorkflowViolation> for HandlerErr {
    fn from(v: WorkflowViolation) -> Self {
        HandlerErr::with_details("workflow_violation", v.message.clone(), v.details())
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn require_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing/invalid {}", key)))
}

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn require_level(params: &serde_json::Value, key: &str) -> Result<EducationLevel, HandlerErr> {
    let raw = require_str(params, key)?;
    EducationLevel::parse(&raw).ok_or_else(|| {
        HandlerErr::with_details(
            "bad_params",
            "level must be one of: nursery, primary, junior_secondary, senior_secondary",
            json!({ "level": raw }),
        )
    })
}

pub fn require_actor(params: &serde_json::Value) -> Result<Actor, HandlerErr> {
    let Some(raw) = params.get("actor") else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::with_details(
            "bad_params",
            format!("invalid actor: {}", e),
            json!({ "actor": raw }),
        )
    })
}

/// Score maps ride through the IPC boundary as JSON objects of numbers.
pub fn parse_scores(raw: &serde_json::Value) -> Result<HashMap<String, f64>, HandlerErr> {
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new(
            "bad_params",
            "scores must be an object of component -> number",
        ));
    };
    let mut scores = HashMap::with_capacity(obj.len());
    for (name, value) in obj {
        let Some(n) = value.as_f64() else {
            return Err(HandlerErr::with_details(
                "bad_params",
                format!("score for {} must be a number", name),
                json!({ "component": name, "value": value }),
            ));
        };
        scores.insert(name.clone(), n);
    }
    Ok(scores)
}

#[derive(Debug, Clone)]
pub struct ResultRow {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub session: String,
    pub term: i64,
    pub education_level: EducationLevel,
    pub raw_scores: HashMap<String, f64>,
    pub ca_total: f64,
    pub grand_total: f64,
    pub percentage: f64,
    pub grade: String,
    pub is_passed: bool,
    pub class_position: Option<i64>,
    pub status: ResultStatus,
    pub teacher_remark: Option<String>,
    pub entered_by: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub published_by: Option<String>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

pub const RESULT_COLUMNS: &str = "id, student_id, class_id, subject_id, session, term,
     education_level, raw_scores, ca_total, grand_total, percentage, grade,
     is_passed, class_position, status, teacher_remark, entered_by,
     approved_by, approved_at, published_by, published_at, created_at,
     updated_at, version";

pub fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    use rusqlite::types::Type;

    let level_raw: String = row.get(6)?;
    let scores_raw: String = row.get(7)?;
    let status_raw: String = row.get(14)?;
    let education_level = EducationLevel::parse(&level_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown education level: {}", level_raw).into(),
        )
    })?;
    let raw_scores: HashMap<String, f64> = serde_json::from_str(&scores_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            format!("stored scores are not a JSON number map: {}", e).into(),
        )
    })?;
    let status = ResultStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            14,
            Type::Text,
            format!("unknown result status: {}", status_raw).into(),
        )
    })?;
    Ok(ResultRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        class_id: row.get(2)?,
        subject_id: row.get(3)?,
        session: row.get(4)?,
        term: row.get(5)?,
        education_level,
        raw_scores,
        ca_total: row.get(8)?,
        grand_total: row.get(9)?,
        percentage: row.get(10)?,
        grade: row.get(11)?,
        is_passed: row.get::<_, i64>(12)? != 0,
        class_position: row.get(13)?,
        status,
        teacher_remark: row.get(15)?,
        entered_by: row.get(16)?,
        approved_by: row.get(17)?,
        approved_at: row.get(18)?,
        published_by: row.get(19)?,
        published_at: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
        version: row.get(23)?,
    })
}

pub fn load_result(conn: &Connection, result_id: &str) -> Result<ResultRow, HandlerErr> {
    let sql = format!("SELECT {} FROM results WHERE id = ?", RESULT_COLUMNS);
    let row = conn
        .query_row(&sql, [result_id], |r| row_to_result(r))
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| {
        HandlerErr::with_details(
            "not_found",
            "result not found",
            json!({ "resultId": result_id }),
        )
    })
}

pub fn result_json(row: &ResultRow) -> serde_json::Value {
    json!({
        "resultId": row.id,
        "studentId": row.student_id,
        "classId": row.class_id,
        "subjectId": row.subject_id,
        "session": row.session,
        "term": row.term,
        "educationLevel": row.education_level.as_str(),
        "scores": row.raw_scores,
        "caTotal": row.ca_total,
        "grandTotal": row.grand_total,
        "percentage": row.percentage,
        "grade": row.grade,
        "isPassed": row.is_passed,
        "classPosition": row.class_position,
        "status": row.status.as_str(),
        "teacherRemark": row.teacher_remark,
        "enteredBy": row.entered_by,
        "approvedBy": row.approved_by,
        "approvedAt": row.approved_at,
        "publishedBy": row.published_by,
        "publishedAt": row.published_at,
        "createdAt": row.created_at,
        "updatedAt": row.updated_at,
        "version": row.version,
    })
}

pub fn record_transition(
    conn: &Connection,
    result_id: &str,
    from: &str,
    to: &str,
    action: &str,
    actor: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO result_transitions(id, result_id, from_status, to_status, action, actor, at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            uuid::Uuid::new_v4().to_string(),
            result_id,
            from,
            to,
            action,
            actor,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(())
}
