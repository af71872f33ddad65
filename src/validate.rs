use crate::schema::ScoreComponent;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BelowMin,
    AboveMax,
    UnknownComponent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub component: String,
    pub kind: ViolationKind,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
}

/// Checks a candidate score map against a level's schema. All violations are
/// collected so the caller can surface every bad component at once; an empty
/// list means the scores are ready for computation.
///
/// A component absent from `raw` defaults to 0 ("not yet entered") and is
/// never a violation. Components not in the schema at all are rejected.
pub fn validate_scores(schema: &[ScoreComponent], raw: &HashMap<String, f64>) -> Vec<Violation> {
    let mut violations = Vec::new();

    for comp in schema {
        let Some(&value) = raw.get(comp.name) else {
            continue;
        };
        if value < 0.0 {
            violations.push(Violation {
                component: comp.name.to_string(),
                kind: ViolationKind::BelowMin,
                value,
                max_score: Some(comp.max_score),
            });
        } else if value > comp.max_score {
            violations.push(Violation {
                component: comp.name.to_string(),
                kind: ViolationKind::AboveMax,
                value,
                max_score: Some(comp.max_score),
            });
        }
    }

    let mut unknown: Vec<(&String, f64)> = raw
        .iter()
        .filter(|(name, _)| !schema.iter().any(|c| c.name == name.as_str()))
        .map(|(name, &value)| (name, value))
        .collect();
    unknown.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in unknown {
        violations.push(Violation {
            component: name.clone(),
            kind: ViolationKind::UnknownComponent,
            value,
            max_score: None,
        });
    }

    violations
}
