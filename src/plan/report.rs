use crate::error::{BusError, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub attempts: u32,
}

impl StepReport {
    pub fn new(index: usize, name: String, outcome: StepOutcome, attempts: u32) -> Self {
        Self {
            index,
            name,
            outcome,
            error: None,
            message: None,
            attempts,
        }
    }

    pub fn failed(index: usize, name: String, err: &BusError, attempts: u32) -> Self {
        Self {
            error: Some(err.kind()),
            message: Some(err.to_string()),
            ..Self::new(index, name, StepOutcome::Failed, attempts)
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanStatus {
    Succeeded,
    Failed { index: usize, kind: ErrorKind },
    /// Cancelled before the step at `index` started
    Cancelled { index: usize },
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    Applied,
    Skipped,
    Failed,
    /// Not needed after a successful run
    Released,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RollbackRecord {
    /// Step the compensation belongs to
    pub origin: String,
    pub name: String,
    pub outcome: RollbackOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Inspectable result of a plan run
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PlanReport {
    pub run_id: Uuid,
    pub plan: String,
    pub status: PlanStatus,
    pub steps: Vec<StepReport>,
    pub rollback: Vec<RollbackRecord>,
}

impl PlanReport {
    pub fn is_success(&self) -> bool {
        self.status == PlanStatus::Succeeded
    }

    /// Index and kind of the step that halted the plan
    pub fn failure(&self) -> Option<(usize, ErrorKind)> {
        match self.status {
            PlanStatus::Failed { index, kind } => Some((index, kind)),
            _ => None,
        }
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn rollback_failures(&self) -> usize {
        self.rollback
            .iter()
            .filter(|r| r.outcome == RollbackOutcome::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(status: PlanStatus) -> PlanReport {
        PlanReport {
            run_id: Uuid::nil(),
            plan: "demo".to_string(),
            status,
            steps: vec![
                StepReport::new(0, "enable radio".to_string(), StepOutcome::Applied, 1),
                StepReport::failed(
                    1,
                    "set ssid".to_string(),
                    &BusError::InvalidParameter("SSID".to_string()),
                    1,
                ),
            ],
            rollback: vec![RollbackRecord {
                origin: "enable radio".to_string(),
                name: "disable radio".to_string(),
                outcome: RollbackOutcome::Failed,
                error: Some(ErrorKind::RpcError),
                message: None,
            }],
        }
    }

    #[test]
    fn failure_reports_index_and_kind() {
        let report = report(PlanStatus::Failed {
            index: 1,
            kind: ErrorKind::InvalidParameter,
        });

        assert!(!report.is_success());
        assert_eq!(report.failure(), Some((1, ErrorKind::InvalidParameter)));
        assert_eq!(report.count(StepOutcome::Applied), 1);
        assert_eq!(report.count(StepOutcome::Failed), 1);
        assert_eq!(report.rollback_failures(), 1);
    }

    #[test]
    fn status_serializes_tagged() {
        let value = serde_json::to_value(PlanStatus::Failed {
            index: 1,
            kind: ErrorKind::InvalidParameter,
        })
        .unwrap();

        assert_eq!(
            value,
            json!({"status": "failed", "index": 1, "kind": "InvalidParameter"})
        );
    }

    #[test]
    fn failed_step_carries_message() {
        let report = report(PlanStatus::Succeeded);
        let failed = &report.steps[1];

        assert_eq!(failed.error, Some(ErrorKind::InvalidParameter));
        assert_eq!(
            failed.message.as_deref(),
            Some("invalid parameter: SSID")
        );
    }
}
