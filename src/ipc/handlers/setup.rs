use crate::calc::{GradeBreakpoint, GradingConfig};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_level, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schema::schema_for;
use serde_json::json;

fn config_json(config: &GradingConfig) -> serde_json::Value {
    serde_json::to_value(config).unwrap_or_else(|_| json!({}))
}

fn handle_grading_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::load_grading_config(conn) {
        Ok(config) => ok(&req.id, config_json(&config)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_breakpoints(raw: &serde_json::Value) -> Result<Vec<GradeBreakpoint>, HandlerErr> {
    let parsed: Vec<GradeBreakpoint> = serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::new(
            "bad_params",
            format!("gradeBreakpoints must be [{{minPercentage, letter, points}}]: {}", e),
        )
    })?;
    if parsed.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "gradeBreakpoints must not be empty",
        ));
    }
    for bp in &parsed {
        if bp.letter.trim().is_empty() {
            return Err(HandlerErr::new(
                "bad_params",
                "gradeBreakpoints letters must be non-empty",
            ));
        }
        if !(0.0..=100.0).contains(&bp.min_percentage) {
            return Err(HandlerErr::with_details(
                "bad_params",
                "gradeBreakpoints minPercentage must be within 0..=100",
                json!({ "minPercentage": bp.min_percentage }),
            ));
        }
    }
    Ok(parsed)
}

fn handle_grading_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut config = match db::load_grading_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(v) = req.params.get("passThreshold") {
        match v.as_f64() {
            Some(t) if (0.0..=100.0).contains(&t) => config.pass_threshold = t,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "passThreshold must be a number within 0..=100",
                    Some(json!({ "passThreshold": v })),
                )
            }
        }
    }
    if let Some(v) = req.params.get("nurseryMaxMarks") {
        match v.as_f64() {
            Some(m) if m > 0.0 => config.nursery_max_marks = m,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "nurseryMaxMarks must be a positive number",
                    Some(json!({ "nurseryMaxMarks": v })),
                )
            }
        }
    }
    if let Some(v) = req.params.get("gradeBreakpoints") {
        match parse_breakpoints(v) {
            Ok(bps) => config.grade_breakpoints = bps,
            Err(e) => return e.response(&req.id),
        }
    }

    let stored = config_json(&config);
    if let Err(e) = db::settings_set_json(conn, db::GRADING_SETTINGS_KEY, &stored) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, stored)
}

/// UI contract: which components (and bounds) to render for a level.
fn handle_schema_components(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let level = match require_level(&req.params, "level") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let config = match db::load_grading_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let components = schema_for(level, config.nursery_max_marks);
    ok(
        &req.id,
        json!({
            "level": level.as_str(),
            "components": components,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.gradingGet" => Some(handle_grading_get(state, req)),
        "setup.gradingUpdate" => Some(handle_grading_update(state, req)),
        "schema.components" => Some(handle_schema_components(state, req)),
        _ => None,
    }
}
