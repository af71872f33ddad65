use crate::calc::{round_off_1_decimal, GradingConfig};
use crate::workflow::ResultStatus;
use serde::Serialize;

/// Data-integrity fault found while aggregating: a stored row no longer
/// lines up with the configuration that must interpret it (e.g. a grade
/// letter absent from the breakpoint table). Fatal to the operation, never
/// coerced.
#[derive(Debug, Clone)]
pub struct ConsistencyError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub subject_id: String,
    pub grand_total: f64,
    pub percentage: f64,
    pub grade: String,
    pub is_passed: bool,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermTotals {
    pub total_subjects: usize,
    pub subjects_passed: usize,
    pub subjects_failed: usize,
    pub total_score: f64,
    pub average_score: f64,
    pub gpa: f64,
}

/// Rolls subject rows up into term totals. Every row participates regardless
/// of status (a term report may show mixed-status subjects; its own status is
/// tracked separately). Empty input yields all-zero totals rather than a
/// divide-by-zero. Recomputation over unchanged rows yields identical output.
pub fn aggregate_rows(
    rows: &[SubjectRow],
    config: &GradingConfig,
) -> Result<TermTotals, ConsistencyError> {
    if rows.is_empty() {
        return Ok(TermTotals {
            total_subjects: 0,
            subjects_passed: 0,
            subjects_failed: 0,
            total_score: 0.0,
            average_score: 0.0,
            gpa: 0.0,
        });
    }

    let mut total_score = 0.0_f64;
    let mut subjects_passed = 0_usize;
    let mut points_sum = 0.0_f64;

    for row in rows {
        total_score += row.grand_total;
        if row.is_passed {
            subjects_passed += 1;
        }
        let Some(points) = config.points_for(&row.grade) else {
            return Err(ConsistencyError {
                message: format!(
                    "subject {} has grade '{}' not present in the configured breakpoint table",
                    row.subject_id, row.grade
                ),
            });
        };
        points_sum += points;
    }

    let n = rows.len() as f64;
    let gpa_exact = points_sum / n;
    Ok(TermTotals {
        total_subjects: rows.len(),
        subjects_passed,
        subjects_failed: rows.len() - subjects_passed,
        total_score,
        average_score: round_off_1_decimal(total_score / n),
        // Two decimals for GPA display; same Int(x+0.5) scheme as marks.
        gpa: ((100.0 * gpa_exact) + 0.5).floor() / 100.0,
    })
}
