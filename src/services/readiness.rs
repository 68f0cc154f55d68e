use crate::{bus_client::BusClient, error::BusError, path::BusPath};
use log::{debug, info};
use std::time::Duration;
use tokio::time::{self, Instant, sleep};

/// Polls the bus until a path becomes resolvable
pub struct ReadinessWaiter<'a, B> {
    bus: &'a B,
    poll_interval: Duration,
}

impl<'a, B> ReadinessWaiter<'a, B>
where
    B: BusClient,
{
    pub fn new(bus: &'a B, poll_interval: Duration) -> Self {
        Self { bus, poll_interval }
    }

    /// Wait until `path` resolves
    ///
    /// `NotFound` and transport errors mean "not there yet" and are polled
    /// again; any other bus error is returned immediately. Returns
    /// `TimeoutError` once `timeout` has elapsed without the path resolving.
    /// A poll that hangs is abandoned one poll interval after the deadline.
    pub async fn wait_for(&self, path: &BusPath, timeout: Duration) -> Result<(), BusError> {
        info!("wait for {path} (timeout {}ms)", timeout.as_millis());

        let deadline = Instant::now() + timeout;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let budget = deadline.saturating_duration_since(Instant::now()) + self.poll_interval;
            match time::timeout(budget, self.bus.get(path)).await {
                Ok(Ok(_)) => {
                    info!("{path} is ready after {polls} poll(s)");
                    return Ok(());
                }
                Ok(Err(e @ (BusError::NotFound(_) | BusError::Rpc(_)))) => {
                    debug!("{path} not ready: {e}");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!("{path} poll got no answer within {}ms", budget.as_millis()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BusError::Timeout(format!(
                    "{path} not available within {}ms",
                    timeout.as_millis()
                )));
            }

            // the last poll happens at the deadline at the latest
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
