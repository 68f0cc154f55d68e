use crate::{
    bus_client::BusClient,
    plan::{
        Plan,
        report::{PlanReport, PlanStatus, RollbackRecord, StepOutcome, StepReport},
    },
    services::{
        rollback::{Compensation, RollbackRegistry},
        shell::LocalShell,
        step_runner::{Disposition, StepRunner},
    },
};
use anyhow::{Result, bail};
use log::{error, info, warn};
use std::{path::PathBuf, time::Duration};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    pub default_wait_timeout: Duration,
    pub shell_timeout: Duration,
    /// Mirror pending compensations to this file while a plan runs
    pub journal: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            default_wait_timeout: Duration::from_secs(60),
            shell_timeout: Duration::from_secs(120),
            journal: None,
        }
    }
}

/// Drives a plan against one device, strictly one step at a time
pub struct Executor<'a, B> {
    runner: StepRunner<'a, B>,
    journal: Option<PathBuf>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, B> Executor<'a, B>
where
    B: BusClient,
{
    pub fn new(bus: &'a B, config: &ExecutorConfig) -> Self {
        Self {
            runner: StepRunner::new(
                bus,
                config.poll_interval,
                config.default_wait_timeout,
                LocalShell::new(config.shell_timeout),
            ),
            journal: config.journal.clone(),
            cancel: None,
        }
    }

    /// Stop before the next step once `true` is sent on `cancel`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run `plan` to completion, abort or cancellation
    ///
    /// A failed step halts the plan and unwinds every registered
    /// compensation, most recent first. The returned report lists each step
    /// that was attempted and each compensation that was settled.
    ///
    /// Refuses to start while the journal still holds compensations of an
    /// interrupted run, see [`Executor::recover`].
    pub async fn run(&self, plan: &Plan) -> Result<PlanReport> {
        if let Some(journal) = self
            .journal
            .as_ref()
            .filter(|journal| RollbackRegistry::journal_exists(journal))
        {
            bail!("pending rollback found in {journal:?}, recover it before running a plan");
        }

        let run_id = Uuid::new_v4();
        info!("run {run_id}: plan '{}' with {} step(s)", plan.name(), plan.len());

        let mut registry = match &self.journal {
            Some(journal) => RollbackRegistry::with_journal(journal),
            None => RollbackRegistry::new(),
        };
        let mut steps = Vec::with_capacity(plan.len());
        let mut status = PlanStatus::Succeeded;

        for (index, step) in plan.steps().iter().enumerate() {
            if self.cancelled() {
                warn!("run {run_id}: cancelled before step {index}");
                status = PlanStatus::Cancelled { index };
                break;
            }

            let name = step.name();
            info!("step {index}: {name}");

            let execution = self.runner.run(step).await;
            match execution.result {
                Ok(Disposition::Applied) => {
                    if let Some(compensation) = step.rollback() {
                        registry.push(Compensation::new(
                            name.clone(),
                            compensation.clone(),
                            step.rollback_scope(),
                        ));
                    }
                    steps.push(StepReport::new(
                        index,
                        name,
                        StepOutcome::Applied,
                        execution.attempts,
                    ));
                }
                Ok(Disposition::Skipped) => {
                    steps.push(StepReport::new(
                        index,
                        name,
                        StepOutcome::Skipped,
                        execution.attempts,
                    ));
                }
                Err(e) => {
                    error!("step {index} ({name}) failed: {e}");
                    status = PlanStatus::Failed {
                        index,
                        kind: e.kind(),
                    };
                    steps.push(StepReport::failed(index, name, &e, execution.attempts));
                    break;
                }
            }
        }

        let rollback = match status {
            PlanStatus::Succeeded => registry.finish(&self.runner).await,
            _ => registry.unwind(&self.runner).await,
        };

        match status {
            PlanStatus::Succeeded => info!("run {run_id}: plan '{}' succeeded", plan.name()),
            PlanStatus::Failed { index, kind } => {
                error!("run {run_id}: plan '{}' failed at step {index}: {kind}", plan.name())
            }
            PlanStatus::Cancelled { index } => {
                warn!("run {run_id}: plan '{}' cancelled at step {index}", plan.name())
            }
        }

        Ok(PlanReport {
            run_id,
            plan: plan.name().to_string(),
            status,
            steps,
            rollback,
        })
    }

    /// Unwind compensations left in the journal by an interrupted run
    ///
    /// # Returns
    /// `None` if there was nothing to recover
    pub async fn recover(&self) -> Result<Option<Vec<RollbackRecord>>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };

        let Some(mut registry) = RollbackRegistry::recover(journal)? else {
            info!("no pending rollback in {journal:?}");
            return Ok(None);
        };

        Ok(Some(registry.unwind(&self.runner).await))
    }
}
