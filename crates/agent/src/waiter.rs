//! Synchronous run: start a task and suspend until it settles or a deadline
//! passes.

use std::sync::Arc;
use std::time::Duration;
use taskcell_core::{Error, Result, ToolResponse};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::controller::TaskController;

impl TaskController {
    /// Run `task` and wait for completion, failure or `timeout`.
    ///
    /// The wait is bound to the launched run and the `update_task` restarts
    /// of it. If another caller stops it, the stopped outcome is returned and
    /// anything started afterwards is left alone. On timeout the session
    /// moves to `timeout` and the driver is told to stop. The reply never
    /// reports an active state.
    pub async fn run_task_and_wait(&self, id: &str, task: &str, timeout: Duration) -> Result<ToolResponse> {
        let deadline = Instant::now() + timeout;

        let (session, mut outcome_rx, lineage) = {
            let mut session = self.open(id).await?;
            let state = session.state();
            if state.is_active() {
                return Err(Error::InvalidState {
                    action: "run_task_and_wait",
                    state,
                });
            }
            let ticket = self.launch(&mut session, task.to_string());
            (
                Arc::clone(OwnedMutexGuard::mutex(&session)),
                session.subscribe_outcome(),
                ticket.lineage,
            )
        };

        let settled = match tokio::time::timeout_at(deadline, outcome_rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) | Err(_) => None,
        };

        let mut session = session.lock().await;
        if session.is_closed() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        if let Some(outcome) = settled {
            info!(session_id = %id, status = ?outcome.status, "Wait finished");
            return Ok(outcome);
        }

        if session.active_lineage() == Some(lineage) {
            let error = Error::Timeout(format!("Task did not finish within {:.1}s", timeout.as_secs_f64()));
            warn!(session_id = %id, timeout_secs = timeout.as_secs_f64(), "Task timed out");
            session.log(error.to_string());

            if let Some(ticket) = session.mark_timed_out(error) {
                if let Err(e) = self.driver.stop(session.driver_handle()).await {
                    warn!(session_id = %id, error = %e, "Driver stop failed after timeout");
                    session.log(format!("Driver stop failed: {}", e));
                }
                ticket.cancel.cancel();
            }
        }

        // Settled between the deadline and taking the lock.
        let outcome = outcome_rx.borrow().clone();
        Ok(outcome.unwrap_or_else(|| session.outcome_response()))
    }
}
