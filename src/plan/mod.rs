//! Declarative plan model: ordered steps with preconditions, readiness waits,
//! retry policies and compensations.

pub mod loader;
pub mod report;

use crate::{bus_client::Params, path::BusPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_valid::Validate;
use std::time::Duration;

/// What a step does to the device
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Set {
        target: BusPath,
        #[serde(default)]
        params: Params,
    },
    Add {
        target: BusPath,
        #[serde(default)]
        params: Params,
    },
    WaitFor {
        target: BusPath,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    Invoke {
        target: BusPath,
        #[serde(default)]
        args: Params,
    },
    Shell {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::Set { target, .. } => format!("set {target}"),
            Action::Add { target, .. } => format!("add {target}"),
            Action::WaitFor { target, .. } => format!("wait for {target}"),
            Action::Invoke { target, .. } => format!("invoke {target}"),
            Action::Shell { program, args } => {
                format!("shell {program} {}", args.join(" ")).trim_end().to_string()
            }
        }
    }
}

/// Predicate over the current bus state, evaluated right before a step runs
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    Exists(BusPath),
    Missing(BusPath),
    Equals { path: BusPath, value: Value },
    NotEquals { path: BusPath, value: Value },
    All(Vec<Precondition>),
    Any(Vec<Precondition>),
    Not(Box<Precondition>),
}

/// Path that has to resolve before a step is applied
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WaitTarget {
    pub path: BusPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    #[validate(maximum = 10)]
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based), doubling up to `max_backoff_ms`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// When a pushed compensation runs
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Only if the run aborts; released after a successful run
    #[default]
    OnAbort,
    /// At the end of the maintenance window, whether it aborted or completed
    Always,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(flatten)]
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    precondition: Option<Precondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wait_for: Option<WaitTarget>,
    #[serde(default)]
    #[validate]
    retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollback: Option<Box<Step>>,
    #[serde(default)]
    rollback_scope: RollbackScope,
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self {
            name: None,
            action,
            precondition: None,
            wait_for: None,
            retry: RetryPolicy::default(),
            rollback: None,
            rollback_scope: RollbackScope::default(),
        }
    }

    pub fn set(target: impl Into<BusPath>, params: Params) -> Self {
        Self::new(Action::Set {
            target: target.into(),
            params,
        })
    }

    pub fn add(target: impl Into<BusPath>, params: Params) -> Self {
        Self::new(Action::Add {
            target: target.into(),
            params,
        })
    }

    pub fn wait_for(target: impl Into<BusPath>, timeout_secs: Option<u64>) -> Self {
        Self::new(Action::WaitFor {
            target: target.into(),
            timeout_secs,
        })
    }

    pub fn invoke(target: impl Into<BusPath>, args: Params) -> Self {
        Self::new(Action::Invoke {
            target: target.into(),
            args,
        })
    }

    pub fn shell(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(Action::Shell {
            program: program.into(),
            args,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn when(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    pub fn after_ready(mut self, path: impl Into<BusPath>, timeout_secs: Option<u64>) -> Self {
        self.wait_for = Some(WaitTarget {
            path: path.into(),
            timeout_secs,
        });
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rollback(mut self, compensation: Step) -> Self {
        self.rollback = Some(Box::new(compensation));
        self
    }

    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.rollback_scope = scope;
        self
    }

    /// Explicit name or a description derived from the action
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.action.describe())
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn precondition(&self) -> Option<&Precondition> {
        self.precondition.as_ref()
    }

    pub fn wait_target(&self) -> Option<&WaitTarget> {
        self.wait_for.as_ref()
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn rollback(&self) -> Option<&Step> {
        self.rollback.as_deref()
    }

    pub fn rollback_scope(&self) -> RollbackScope {
        self.rollback_scope
    }
}

/// Ordered steps; declaration order is execution order
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
pub struct Plan {
    #[serde(default = "Plan::default_name")]
    name: String,
    #[validate(min_items = 1)]
    #[validate]
    steps: Vec<Step>,
}

impl Plan {
    fn default_name() -> String {
        "unnamed".to_string()
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build `Params` from a JSON object literal; anything else yields empty params
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod retry_policy {
        use super::*;

        #[test]
        fn backoff_doubles_until_capped() {
            let policy = RetryPolicy {
                max_retries: 8,
                initial_backoff_ms: 500,
                max_backoff_ms: 3_000,
            };

            assert_eq!(policy.backoff(0), Duration::from_millis(500));
            assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
            assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
            assert_eq!(policy.backoff(3), Duration::from_millis(3_000));
            assert_eq!(policy.backoff(200), Duration::from_millis(3_000));
        }

        #[test]
        fn default_does_not_retry() {
            assert_eq!(RetryPolicy::default().max_retries, 0);
        }

        #[test]
        fn more_than_ten_retries_is_rejected() {
            assert!(RetryPolicy::retries(10).validate().is_ok());
            assert!(RetryPolicy::retries(11).validate().is_err());
        }
    }

    mod step {
        use super::*;

        #[test]
        fn name_defaults_to_action_description() {
            let step = Step::set("Device.WiFi.Radio.1.", params(json!({"Enable": true})));
            assert_eq!(step.name(), "set Device.WiFi.Radio.1.");
            assert_eq!(step.named("enable radio").name(), "enable radio");
        }

        #[test]
        fn shell_description_joins_arguments() {
            let step = Step::shell("/etc/init.d/dropbear", vec!["restart".to_string()]);
            assert_eq!(step.name(), "shell /etc/init.d/dropbear restart");
        }

        #[test]
        fn deserializes_flattened_action() {
            let step: Step = serde_json::from_value(json!({
                "name": "disable firewall",
                "kind": "set",
                "target": "Device.Firewall.",
                "params": {"Enable": false},
                "precondition": {"equals": {"path": "Device.Firewall.Enable", "value": true}},
                "retry": {"max_retries": 2},
                "rollback": {
                    "kind": "set",
                    "target": "Device.Firewall.",
                    "params": {"Enable": true}
                },
                "rollback_scope": "always"
            }))
            .unwrap();

            assert_eq!(step.name(), "disable firewall");
            assert_eq!(
                step.action(),
                &Action::Set {
                    target: "Device.Firewall.".into(),
                    params: params(json!({"Enable": false})),
                }
            );
            assert_eq!(step.retry().max_retries, 2);
            assert_eq!(step.retry().initial_backoff_ms, 500);
            assert_eq!(step.rollback_scope(), RollbackScope::Always);
            assert_eq!(
                step.rollback().map(Step::name),
                Some("set Device.Firewall.".to_string())
            );
        }

        #[test]
        fn unknown_kind_is_rejected() {
            let result = serde_json::from_value::<Step>(json!({
                "kind": "reboot",
                "target": "Device."
            }));
            assert!(result.is_err());
        }
    }

    mod plan {
        use super::*;

        #[test]
        fn keeps_declaration_order() {
            let plan = Plan::new("order")
                .with_step(Step::wait_for("Device.IP.", None))
                .with_step(Step::add("Device.Bridging.Bridge.", Params::new()));

            let names: Vec<String> = plan.steps().iter().map(Step::name).collect();
            assert_eq!(names, vec!["wait for Device.IP.", "add Device.Bridging.Bridge."]);
        }

        #[test]
        fn empty_plan_fails_validation() {
            assert!(Plan::new("empty").validate().is_err());
            assert!(
                Plan::new("one")
                    .with_step(Step::wait_for("Device.IP.", None))
                    .validate()
                    .is_ok()
            );
        }
    }
}
