use crate::schema::{ComponentRole, EducationLevel, ScoreComponent, DEFAULT_NURSERY_MAX_MARKS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// VB6-compatible 1-decimal rounding kept for display values:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub const DEFAULT_PASS_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBreakpoint {
    pub min_percentage: f64,
    pub letter: String,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    pub pass_threshold: f64,
    pub nursery_max_marks: f64,
    pub grade_breakpoints: Vec<GradeBreakpoint>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        let bp = |min: f64, letter: &str, points: f64| GradeBreakpoint {
            min_percentage: min,
            letter: letter.to_string(),
            points,
        };
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            nursery_max_marks: DEFAULT_NURSERY_MAX_MARKS,
            grade_breakpoints: vec![
                bp(70.0, "A", 4.0),
                bp(60.0, "B", 3.0),
                bp(50.0, "C", 2.0),
                bp(45.0, "D", 1.0),
                bp(39.0, "E", 0.5),
                bp(0.0, "F", 0.0),
            ],
        }
    }
}

impl GradingConfig {
    /// Letter for an (unrounded) percentage. Breakpoints are inclusive lower
    /// bounds, consulted highest-first; the lowest entry is the floor grade.
    pub fn grade_for(&self, percentage: f64) -> &str {
        let mut ordered: Vec<&GradeBreakpoint> = self.grade_breakpoints.iter().collect();
        ordered.sort_by(|a, b| {
            b.min_percentage
                .partial_cmp(&a.min_percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for bp in &ordered {
            if percentage >= bp.min_percentage {
                return &bp.letter;
            }
        }
        ordered.last().map(|bp| bp.letter.as_str()).unwrap_or("F")
    }

    pub fn points_for(&self, letter: &str) -> Option<f64> {
        self.grade_breakpoints
            .iter()
            .find(|bp| bp.letter == letter)
            .map(|bp| bp.points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedResult {
    pub ca_total: f64,
    pub grand_total: f64,
    pub percentage: f64,
    pub grade: String,
    pub is_passed: bool,
}

/// Derives totals, percentage, grade and pass flag from raw component scores.
/// Precondition: `raw` has already passed `validate_scores` for this schema;
/// this function only sums. Missing components count as 0.
///
/// Grade and pass comparisons use the unrounded percentage so a 69.96 does
/// not round its way across a breakpoint; the stored percentage is rounded
/// to one decimal for display.
pub fn compute_result(
    level: EducationLevel,
    schema: &[ScoreComponent],
    raw: &HashMap<String, f64>,
    config: &GradingConfig,
) -> ComputedResult {
    let mut ca_total = 0.0_f64;
    let mut exam_value = 0.0_f64;
    let mut single_value = 0.0_f64;

    for comp in schema {
        let value = raw.get(comp.name).copied().unwrap_or(0.0);
        match comp.role {
            ComponentRole::Ca => ca_total += value,
            ComponentRole::Exam => exam_value += value,
            ComponentRole::Single => single_value += value,
        }
    }

    let grand_total = match level {
        EducationLevel::Nursery => single_value,
        _ => ca_total + exam_value,
    };

    let percentage_exact = match level {
        EducationLevel::Nursery => {
            if config.nursery_max_marks > 0.0 {
                100.0 * grand_total / config.nursery_max_marks
            } else {
                0.0
            }
        }
        // CA + exam maxima sum to 100 by construction, so the grand total is
        // already the percentage.
        _ => grand_total,
    };

    let grade = config.grade_for(percentage_exact).to_string();
    let is_passed = percentage_exact >= config.pass_threshold;

    ComputedResult {
        ca_total,
        grand_total,
        percentage: round_off_1_decimal(percentage_exact),
        grade,
        is_passed,
    }
}
