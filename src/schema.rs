use serde::{Deserialize, Serialize};

pub const DEFAULT_NURSERY_MAX_MARKS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    Nursery,
    Primary,
    JuniorSecondary,
    SeniorSecondary,
}

impl EducationLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "nursery" => Some(Self::Nursery),
            "primary" => Some(Self::Primary),
            "junior_secondary" => Some(Self::JuniorSecondary),
            "senior_secondary" => Some(Self::SeniorSecondary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nursery => "nursery",
            Self::Primary => "primary",
            Self::JuniorSecondary => "junior_secondary",
            Self::SeniorSecondary => "senior_secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Ca,
    Exam,
    Single,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponent {
    pub name: &'static str,
    pub role: ComponentRole,
    pub max_score: f64,
}

const fn component(name: &'static str, role: ComponentRole, max_score: f64) -> ScoreComponent {
    ScoreComponent {
        name,
        role,
        max_score,
    }
}

/// Ordered scoring components for an education level. Total function: every
/// level has a schema. For non-Nursery levels the maxima sum to exactly 100,
/// so the grand total doubles as the percentage. Nursery's single component
/// takes its maximum from configuration and that maximum is the percentage
/// denominator.
pub fn schema_for(level: EducationLevel, nursery_max_marks: f64) -> Vec<ScoreComponent> {
    match level {
        EducationLevel::Nursery => {
            vec![component(
                "mark_obtained",
                ComponentRole::Single,
                nursery_max_marks,
            )]
        }
        // Primary and junior secondary share the six-part CA block (ceiling 40)
        // plus a 60-mark exam.
        EducationLevel::Primary | EducationLevel::JuniorSecondary => vec![
            component("continuous_assessment", ComponentRole::Ca, 15.0),
            component("take_home_test", ComponentRole::Ca, 5.0),
            component("practical", ComponentRole::Ca, 5.0),
            component("appearance", ComponentRole::Ca, 5.0),
            component("project", ComponentRole::Ca, 5.0),
            component("note_copying", ComponentRole::Ca, 5.0),
            component("exam", ComponentRole::Exam, 60.0),
        ],
        EducationLevel::SeniorSecondary => vec![
            component("test1", ComponentRole::Ca, 10.0),
            component("test2", ComponentRole::Ca, 10.0),
            component("test3", ComponentRole::Ca, 10.0),
            component("exam", ComponentRole::Exam, 70.0),
        ],
    }
}
