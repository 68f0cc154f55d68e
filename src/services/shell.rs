use crate::error::BusError;
use log::{debug, info, warn};
use std::{io::ErrorKind, process::Stdio, time::Duration};
use tokio::{process::Command, time::timeout};

/// Runs shell-level commands (init scripts, `uci commit`, ...) on the local host
#[derive(Clone, Debug)]
pub struct LocalShell {
    timeout: Duration,
}

impl LocalShell {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` with `args` and wait for it to exit
    ///
    /// # Returns
    /// * `NotFound` - the program could not be spawned
    /// * `RpcError` - the program exited unsuccessfully
    /// * `TimeoutError` - the program did not finish in time; it is killed
    pub async fn run(&self, program: &str, args: &[String]) -> Result<(), BusError> {
        let command_line = format!("{program} {}", args.join(" "));
        let command_line = command_line.trim_end();
        info!("run {command_line}");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BusError::NotFound(program.into()),
                _ => BusError::Rpc(format!("failed to spawn {command_line}: {e}")),
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BusError::Timeout(format!(
                    "{command_line} did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| BusError::Rpc(format!("failed to wait for {command_line}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{command_line}: {}", stdout.trim_end());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{command_line} failed: {}", stderr.trim_end());
            return Err(BusError::Rpc(format!(
                "{command_line} exited with {}: {}",
                output.status,
                stderr.trim_end()
            )));
        }

        Ok(())
    }
}
