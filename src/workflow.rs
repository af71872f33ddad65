use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Draft,
    Approved,
    Published,
}

impl ResultStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Published => "published",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Approve,
    Publish,
    Reopen,
}

impl WorkflowAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "publish" => Some(Self::Publish),
            "reopen" => Some(Self::Reopen),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Publish => "publish",
            Self::Reopen => "reopen",
        }
    }
}

/// Capability flags supplied by the caller's authorization layer with each
/// request. The engine never authenticates; it only consults these guards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub can_approve: bool,
    #[serde(default)]
    pub can_publish: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowViolation {
    pub current: ResultStatus,
    pub action: WorkflowAction,
    pub message: String,
}

impl WorkflowViolation {
    fn new(current: ResultStatus, action: WorkflowAction, message: impl Into<String>) -> Self {
        Self {
            current,
            action,
            message: message.into(),
        }
    }

    pub fn details(&self) -> serde_json::Value {
        json!({
            "currentStatus": self.current.as_str(),
            "action": self.action.as_str(),
        })
    }
}

/// Legal transitions: draft -> approved -> published, plus reopen back to
/// draft from either finalized state. Publishing straight from draft is
/// rejected. Returns the target status without mutating anything; callers
/// apply the change under their own concurrency guard.
pub fn check_transition(
    current: ResultStatus,
    action: WorkflowAction,
    actor: &Actor,
) -> Result<ResultStatus, WorkflowViolation> {
    match action {
        WorkflowAction::Approve => {
            if current != ResultStatus::Draft {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    format!("cannot approve a {} result", current.as_str()),
                ));
            }
            if !actor.can_approve {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    format!("actor {} lacks approval capability", actor.id),
                ));
            }
            Ok(ResultStatus::Approved)
        }
        WorkflowAction::Publish => {
            if current != ResultStatus::Approved {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    format!(
                        "cannot publish a {} result; approval is required first",
                        current.as_str()
                    ),
                ));
            }
            if !actor.can_publish {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    format!("actor {} lacks publish capability", actor.id),
                ));
            }
            Ok(ResultStatus::Published)
        }
        WorkflowAction::Reopen => {
            if current == ResultStatus::Draft {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    "result is already a draft",
                ));
            }
            // Reopen undoes an approval or a publication, so it demands the
            // elevated publish capability.
            if !actor.can_publish {
                return Err(WorkflowViolation::new(
                    current,
                    action,
                    format!("actor {} lacks publish capability", actor.id),
                ));
            }
            Ok(ResultStatus::Draft)
        }
    }
}
