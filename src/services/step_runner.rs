use crate::{
    bus_client::BusClient,
    error::BusError,
    path::BusPath,
    plan::{Action, Precondition, Step},
    services::{readiness::ReadinessWaiter, shell::LocalShell},
};
use log::{debug, info, warn};
use serde_json::Value;
use std::{future::Future, pin::Pin, time::Duration};
use tokio::time::sleep;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Disposition {
    Applied,
    Skipped,
}

/// Result of running one step including all retries
#[derive(Debug)]
pub struct StepExecution {
    pub result: Result<Disposition, BusError>,
    pub attempts: u32,
}

/// Runs a single step: precondition, readiness wait, apply, retry
pub struct StepRunner<'a, B> {
    bus: &'a B,
    waiter: ReadinessWaiter<'a, B>,
    shell: LocalShell,
    default_wait_timeout: Duration,
}

impl<'a, B> StepRunner<'a, B>
where
    B: BusClient,
{
    pub fn new(
        bus: &'a B,
        poll_interval: Duration,
        default_wait_timeout: Duration,
        shell: LocalShell,
    ) -> Self {
        Self {
            bus,
            waiter: ReadinessWaiter::new(bus, poll_interval),
            shell,
            default_wait_timeout,
        }
    }

    /// Run `step`, retrying retriable failures with exponential backoff
    pub async fn run(&self, step: &Step) -> StepExecution {
        let name = step.name();
        let retry = step.retry();
        let mut attempts = 0;
        let mut precondition_checked = false;

        loop {
            attempts += 1;
            match self.attempt(step, &mut precondition_checked).await {
                Err(e) if e.is_retriable() && attempts <= retry.max_retries => {
                    let backoff = retry.backoff(attempts - 1);
                    warn!(
                        "{name}: attempt {attempts} failed: {e}; retrying in {}ms",
                        backoff.as_millis()
                    );
                    sleep(backoff).await;
                }
                result => return StepExecution { result, attempts },
            }
        }
    }

    /// The precondition is evaluated until it yields an answer once; retries
    /// after that repeat only the wait and the apply.
    async fn attempt(
        &self,
        step: &Step,
        precondition_checked: &mut bool,
    ) -> Result<Disposition, BusError> {
        if !*precondition_checked {
            if let Some(precondition) = step.precondition() {
                if !self.evaluate(precondition).await? {
                    info!("{}: precondition not met, skipping", step.name());
                    return Ok(Disposition::Skipped);
                }
            }
            *precondition_checked = true;
        }

        if let Some(wait) = step.wait_target() {
            self.waiter
                .wait_for(&wait.path, self.wait_timeout(wait.timeout_secs))
                .await?;
        }

        self.apply(step.action()).await?;
        Ok(Disposition::Applied)
    }

    async fn apply(&self, action: &Action) -> Result<(), BusError> {
        match action {
            Action::Set { target, params } => self.bus.set(target, params).await,
            Action::Add { target, params } => {
                let created = self.bus.add(target, params).await?;
                info!("added {created} below {target}");
                Ok(())
            }
            Action::WaitFor {
                target,
                timeout_secs,
            } => {
                self.waiter
                    .wait_for(target, self.wait_timeout(*timeout_secs))
                    .await
            }
            Action::Invoke { target, args } => {
                let response = self.bus.invoke(target, args).await?;
                debug!("{target} returned {response}");
                Ok(())
            }
            Action::Shell { program, args } => self.shell.run(program, args).await,
        }
    }

    fn wait_timeout(&self, timeout_secs: Option<u64>) -> Duration {
        timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_wait_timeout)
    }

    /// Evaluate a precondition against the current bus state
    pub fn evaluate<'s>(
        &'s self,
        precondition: &'s Precondition,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BusError>> + 's>> {
        Box::pin(async move {
            match precondition {
                Precondition::Exists(path) => self.exists(path).await,
                Precondition::Missing(path) => Ok(!self.exists(path).await?),
                Precondition::Equals { path, value } => {
                    Ok(self.current(path).await?.is_some_and(|v| values_match(&v, value)))
                }
                Precondition::NotEquals { path, value } => {
                    Ok(!self.current(path).await?.is_some_and(|v| values_match(&v, value)))
                }
                Precondition::All(conditions) => {
                    for condition in conditions {
                        if !self.evaluate(condition).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Precondition::Any(conditions) => {
                    for condition in conditions {
                        if self.evaluate(condition).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Precondition::Not(condition) => Ok(!self.evaluate(condition).await?),
            }
        })
    }

    async fn exists(&self, path: &BusPath) -> Result<bool, BusError> {
        Ok(self.current(path).await?.is_some())
    }

    async fn current(&self, path: &BusPath) -> Result<Option<Value>, BusError> {
        match self.bus.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(BusError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The bus reports many scalars as strings (`"1"`, `"true"`), so a string on
/// either side is compared by its textual form.
fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(a), other) | (other, Value::String(a)) if !other.is_string() => {
            match other {
                Value::Bool(_) | Value::Number(_) => a.trim() == other.to_string(),
                _ => false,
            }
        }
        _ => false,
    }
}
