use crate::{
    bus_client::BusClient,
    plan::{
        RollbackScope, Step,
        report::{RollbackOutcome, RollbackRecord},
    },
    services::step_runner::{Disposition, StepRunner},
};
use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Compensation pushed by a successfully applied step
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Compensation {
    /// Name of the step that registered it
    pub origin: String,
    pub step: Step,
    #[serde(default)]
    pub scope: RollbackScope,
}

impl Compensation {
    pub fn new(origin: String, step: Step, scope: RollbackScope) -> Self {
        Self {
            origin,
            step,
            scope,
        }
    }
}

/// LIFO stack of compensations, optionally mirrored to a journal file so an
/// interrupted run can be unwound later.
#[derive(Debug, Default)]
pub struct RollbackRegistry {
    stack: Vec<Compensation>,
    journal: Option<PathBuf>,
}

impl RollbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: impl Into<PathBuf>) -> Self {
        Self {
            stack: Vec::new(),
            journal: Some(journal.into()),
        }
    }

    /// Load compensations left behind by an interrupted run
    ///
    /// # Returns
    /// `None` if there is no journal at `path`
    pub fn recover(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .context(format!("failed to read rollback journal: {path:?}"))?;
        let stack: Vec<Compensation> = serde_json::from_str(&content)
            .context(format!("failed to parse rollback journal: {path:?}"))?;

        info!("recovered {} pending compensation(s) from {path:?}", stack.len());

        Ok(Some(Self {
            stack,
            journal: Some(path.to_path_buf()),
        }))
    }

    pub fn journal_exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn push(&mut self, compensation: Compensation) {
        info!(
            "register compensation '{}' for '{}'",
            compensation.step.name(),
            compensation.origin
        );
        self.stack.push(compensation);
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Pending compensations in registration order
    pub fn pending(&self) -> &[Compensation] {
        &self.stack
    }

    /// Run every compensation, most recent first
    ///
    /// Failures are recorded and unwinding continues with the next entry.
    pub async fn unwind<B>(&mut self, runner: &StepRunner<'_, B>) -> Vec<RollbackRecord>
    where
        B: BusClient,
    {
        if !self.stack.is_empty() {
            warn!("rolling back {} step(s)", self.stack.len());
        }

        let mut records = Vec::with_capacity(self.stack.len());

        while let Some(compensation) = self.stack.pop() {
            records.push(Self::execute(runner, &compensation).await);
            self.persist();
        }

        self.clear_journal();
        records
    }

    /// Settle the stack after a successful run
    ///
    /// `Always` compensations run, most recent first; `OnAbort` ones are
    /// released without touching the device.
    pub async fn finish<B>(&mut self, runner: &StepRunner<'_, B>) -> Vec<RollbackRecord>
    where
        B: BusClient,
    {
        let mut records = Vec::with_capacity(self.stack.len());

        while let Some(compensation) = self.stack.pop() {
            let record = match compensation.scope {
                RollbackScope::Always => Self::execute(runner, &compensation).await,
                RollbackScope::OnAbort => RollbackRecord {
                    origin: compensation.origin,
                    name: compensation.step.name(),
                    outcome: RollbackOutcome::Released,
                    error: None,
                    message: None,
                },
            };
            records.push(record);
            self.persist();
        }

        self.clear_journal();
        records
    }

    async fn execute<B>(runner: &StepRunner<'_, B>, compensation: &Compensation) -> RollbackRecord
    where
        B: BusClient,
    {
        let name = compensation.step.name();
        info!("compensate '{}': {name}", compensation.origin);

        let execution = runner.run(&compensation.step).await;
        let (outcome, error, message) = match execution.result {
            Ok(Disposition::Applied) => (RollbackOutcome::Applied, None, None),
            Ok(Disposition::Skipped) => (RollbackOutcome::Skipped, None, None),
            Err(e) => {
                error!("failed to compensate '{}': {e}", compensation.origin);
                (RollbackOutcome::Failed, Some(e.kind()), Some(e.to_string()))
            }
        };

        RollbackRecord {
            origin: compensation.origin.clone(),
            name,
            outcome,
            error,
            message,
        }
    }

    fn persist(&self) {
        let Some(journal) = &self.journal else {
            return;
        };

        if let Err(e) = write_journal(journal, &self.stack) {
            error!("failed to persist rollback journal: {e:#}");
        }
    }

    fn clear_journal(&self) {
        if let Some(journal) = &self.journal {
            let _ = fs::remove_file(journal);
        }
    }
}

fn write_journal(path: &Path, stack: &[Compensation]) -> Result<()> {
    let json = serde_json::to_string_pretty(stack).context("failed to serialize rollback")?;
    fs::write(path, json).context(format!("failed to write rollback journal: {path:?}"))
}
