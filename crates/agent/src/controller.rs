use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use taskcell_core::config::ControllerConfig;
use taskcell_core::{Action, Error, Result, SessionState, ToolRequest, ToolResponse};
use taskcell_driver::Driver;
use taskcell_tools::SessionControllerOps;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::merger::merge;
use crate::session::{RunTicket, Session};
use crate::store::{SessionRef, SessionStore};

/// Per-session state machine over a shared driver.
///
/// Cheap to clone; clones share the same store and driver.
#[derive(Clone)]
pub struct TaskController {
    pub(crate) store: Arc<SessionStore>,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) config: ControllerConfig,
}

impl TaskController {
    pub fn new(driver: Arc<dyn Driver>, config: ControllerConfig) -> Self {
        Self {
            store: Arc::new(SessionStore::new(config.max_sessions)),
            driver,
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Single entry point. Every failure is returned as a structured error
    /// response.
    pub async fn perform(&self, request: ToolRequest) -> ToolResponse {
        match self.dispatch(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(action = %request.action, error = %e, "Action failed");
                let resp = ToolResponse::from_error(&e);
                match request.session_id.filter(|id| !id.trim().is_empty()) {
                    Some(id) => resp.with_session_id(id),
                    None => resp,
                }
            }
        }
    }

    async fn dispatch(&self, req: &ToolRequest) -> Result<ToolResponse> {
        let action = req.action()?;
        if !action.needs_session() {
            return match action {
                Action::ListSessions => Ok(self.list_sessions().await),
                _ => self.start_session().await,
            };
        }

        let id = req.require_session_id()?;
        match action {
            Action::RunTask => self.run_task(id, req.require_task()?).await,
            Action::RunTaskAndWait => {
                let task = req.require_task()?;
                let timeout = req.timeout(self.config.default_timeout_secs)?;
                self.run_task_and_wait(id, task, timeout).await
            }
            Action::GetStatus => self.get_status(id).await,
            Action::GetResult => self.get_result(id).await,
            Action::Pause => self.pause(id).await,
            Action::Resume => self.resume(id).await,
            Action::AddInstruction => self.add_instruction(id, req.require_instruction()?).await,
            Action::UpdateTask => self.update_task(id, req.require_instruction()?).await,
            Action::Stop => self.stop(id).await,
            Action::StopSession => self.stop_session(id).await,
            Action::GetLogs => self.get_logs(id).await,
            Action::StartSession | Action::ListSessions => Err(Error::InvalidAction(action.to_string())),
        }
    }

    /// Lock a live session. A session torn down while the caller was queued
    /// on its lock counts as gone.
    pub(crate) async fn open(&self, id: &str) -> Result<OwnedMutexGuard<Session>> {
        let session = self.store.get(id)?.lock_owned().await;
        if session.is_closed() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        Ok(session)
    }

    pub async fn start_session(&self) -> Result<ToolResponse> {
        self.reap_expired().await;
        self.store.check_capacity()?;

        let handle = self.driver.start().await?;
        let (id, session) = match self.store.create(handle.clone(), self.config.max_log_lines) {
            Ok(created) => created,
            Err(e) => {
                if let Err(close_err) = self.driver.close(&handle).await {
                    warn!(handle = %handle, error = %close_err, "Failed to release driver handle");
                }
                return Err(e);
            }
        };
        session.lock().await.log(format!("Session started (driver: {})", self.driver.name()));
        info!(session_id = %id, driver = self.driver.name(), "Session started");

        Ok(ToolResponse::new(SessionState::Idle)
            .with_session_id(id)
            .with_message("Session started. Use run_task or run_task_and_wait to assign a task."))
    }

    pub async fn run_task(&self, id: &str, task: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let state = session.state();
        if state.is_active() {
            return Err(Error::InvalidState {
                action: "run_task",
                state,
            });
        }
        self.launch(&mut session, task.to_string());

        Ok(ToolResponse::new(SessionState::Running)
            .with_session_id(id)
            .with_current_task(Some(task.to_string()))
            .with_message("Task started in background. Use get_status or get_result to check progress."))
    }

    /// Put `task` on the driver in the background. An active run is
    /// superseded and its completion will be discarded.
    pub(crate) fn launch(&self, session: &mut OwnedMutexGuard<Session>, task: String) -> RunTicket {
        let (ticket, superseded) = session.begin_run(task.clone());
        if let Some(old) = superseded {
            old.cancel.cancel();
            debug!(session_id = %session.id(), run_id = old.id, "Run superseded");
        }
        session.log(format!("Task started (run {}): {}", ticket.id, task));
        info!(session_id = %session.id(), run_id = ticket.id, "Task started");

        let weak = Arc::downgrade(OwnedMutexGuard::mutex(session));
        let driver = self.driver.clone();
        let handle = session.driver_handle().clone();
        let session_id = session.id().to_string();
        let run = ticket.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => {
                    debug!(session_id = %session_id, run_id = run.id, "Run cancelled");
                    return;
                }
                out = driver.execute(&handle, &task) => out,
            };

            let Some(session) = weak.upgrade() else {
                return;
            };
            let mut session = session.lock().await;
            let failed = outcome.as_ref().err().map(|e| e.to_string());
            if session.finish(run.id, outcome) {
                match failed {
                    Some(error) => warn!(session_id = %session_id, run_id = run.id, error = %error, "Task failed"),
                    None => info!(session_id = %session_id, run_id = run.id, "Task completed"),
                }
            } else {
                debug!(session_id = %session_id, run_id = run.id, "Late completion discarded");
            }
        });

        ticket
    }

    pub async fn get_status(&self, id: &str) -> Result<ToolResponse> {
        Ok(self.open(id).await?.status_response())
    }

    pub async fn get_result(&self, id: &str) -> Result<ToolResponse> {
        Ok(self.open(id).await?.result_response())
    }

    pub async fn get_logs(&self, id: &str) -> Result<ToolResponse> {
        let session = self.open(id).await?;
        let logs = session.logs();
        let mut resp = ToolResponse::new(session.state())
            .with_session_id(id)
            .with_message(format!("{} log entries", logs.len()));
        resp.logs = Some(logs);
        Ok(resp)
    }

    pub async fn pause(&self, id: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let state = session.state();
        if state != SessionState::Running {
            return Err(Error::InvalidState { action: "pause", state });
        }
        self.driver.pause(session.driver_handle()).await?;
        session.mark_paused();
        session.log("Task paused");
        info!(session_id = %id, "Task paused");

        Ok(ToolResponse::new(SessionState::Paused)
            .with_session_id(id)
            .with_current_task(session.current_task().map(String::from))
            .with_message("Task paused. Use resume to continue."))
    }

    pub async fn resume(&self, id: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let state = session.state();
        if state != SessionState::Paused {
            return Err(Error::InvalidState { action: "resume", state });
        }
        self.driver.resume(session.driver_handle()).await?;
        session.mark_resumed();
        session.log("Task resumed");
        info!(session_id = %id, "Task resumed");

        Ok(ToolResponse::new(SessionState::Running)
            .with_session_id(id)
            .with_current_task(session.current_task().map(String::from))
            .with_message("Task resumed."))
    }

    /// Record a fragment for the next `update_task`; the running task is
    /// left alone.
    pub async fn add_instruction(&self, id: &str, instruction: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let state = session.state();
        if !state.is_active() {
            return Err(Error::InvalidState {
                action: "add_instruction",
                state,
            });
        }
        session.add_instruction(instruction.to_string());
        session.log(format!("Instruction added: {}", instruction));

        let mut resp = ToolResponse::new(state)
            .with_session_id(id)
            .with_current_task(session.current_task().map(String::from))
            .with_message("Instruction recorded. Use update_task to apply it to the task.");
        resp.pending_instructions = Some(session.pending_instructions().to_vec());
        Ok(resp)
    }

    /// Merge pending fragments and `instruction` into the current task and
    /// restart it.
    pub async fn update_task(&self, id: &str, instruction: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let merged = merge(session.current_task(), session.pending_instructions(), instruction);

        if session.state().is_active() {
            if let Err(e) = self.driver.stop(session.driver_handle()).await {
                warn!(session_id = %id, error = %e, "Driver stop failed while updating task");
                session.log(format!("Driver stop failed: {}", e));
            }
        }
        session.log("Task updated with new instructions");
        self.launch(&mut session, merged.clone());

        Ok(ToolResponse::new(SessionState::Running)
            .with_session_id(id)
            .with_current_task(Some(merged.clone()))
            .with_merged_task(merged)
            .with_message("Task updated and restarted with the merged instructions."))
    }

    pub async fn stop(&self, id: &str) -> Result<ToolResponse> {
        let mut session = self.open(id).await?;
        let state = session.state();
        if !state.is_active() {
            return Err(Error::InvalidState { action: "stop", state });
        }
        self.halt(&mut session).await;
        info!(session_id = %id, "Task stopped");

        Ok(ToolResponse::new(SessionState::Stopped)
            .with_session_id(id)
            .with_current_task(session.current_task().map(String::from))
            .with_message("Task stopped."))
    }

    /// Tell the driver to stop and move the active task to `Stopped`. Driver
    /// failures are logged; the session still ends up stopped.
    async fn halt(&self, session: &mut Session) {
        if let Err(e) = self.driver.stop(session.driver_handle()).await {
            warn!(session_id = %session.id(), error = %e, "Driver stop failed");
            session.log(format!("Driver stop failed: {}", e));
        }
        if let Some(ticket) = session.mark_stopped() {
            ticket.cancel.cancel();
        }
        session.log("Task stopped");
    }

    pub async fn stop_session(&self, id: &str) -> Result<ToolResponse> {
        let session = self.store.get(id)?;
        self.teardown(id, session).await?;
        info!(session_id = %id, "Session closed");

        Ok(ToolResponse::success("Session closed.").with_session_id(id))
    }

    /// Stop any active task, release the driver handle and drop the session
    /// from the store.
    async fn teardown(&self, id: &str, session: SessionRef) -> Result<()> {
        {
            let mut session = session.lock().await;
            if session.is_closed() {
                return Err(Error::SessionNotFound(id.to_string()));
            }
            if session.state().is_active() {
                self.halt(&mut session).await;
            }
            if let Err(e) = self.driver.close(session.driver_handle()).await {
                warn!(session_id = %id, error = %e, "Failed to release driver handle");
            }
            session.mark_closed();
        }
        self.store.remove(id)?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> ToolResponse {
        let mut sessions = Vec::new();
        for session in self.store.all() {
            let session = session.lock().await;
            if !session.is_closed() {
                sessions.push(session.summary());
            }
        }
        let mut resp = ToolResponse::success(format!("{} session(s)", sessions.len()));
        resp.sessions = Some(sessions);
        resp
    }

    /// Tear down sessions older than `sessionTtlSecs`. Returns how many went.
    pub async fn reap_expired(&self) -> usize {
        if self.config.session_ttl_secs == 0 {
            return 0;
        }
        let mut reaped = 0;
        for id in self.store.expired(self.config.session_ttl_secs) {
            let Ok(session) = self.store.get(&id) else {
                continue;
            };
            if self.teardown(&id, session).await.is_ok() {
                info!(session_id = %id, "Expired session reaped");
                reaped += 1;
            }
        }
        reaped
    }

    /// Tear down every live session.
    pub async fn shutdown_all(&self) {
        let ids = self.store.ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Closing all sessions");
        join_all(ids.iter().map(|id| async move {
            let Ok(session) = self.store.get(id) else {
                return;
            };
            if let Err(e) = self.teardown(id, session).await {
                debug!(session_id = %id, error = %e, "Session already gone");
            }
        }))
        .await;
    }
}

#[async_trait]
impl SessionControllerOps for TaskController {
    async fn perform(&self, request: ToolRequest) -> ToolResponse {
        TaskController::perform(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use taskcell_core::ResponseStatus;
    use taskcell_driver::{DriverCall, ScriptedDriver};

    fn controller_with(driver: Arc<ScriptedDriver>) -> TaskController {
        TaskController::new(driver, ControllerConfig::default())
    }

    async fn start(controller: &TaskController) -> String {
        let resp = controller.perform(ToolRequest::new(Action::StartSession)).await;
        assert_eq!(resp.status, ResponseStatus::Idle);
        resp.session_id.unwrap()
    }

    async fn wait_for(controller: &TaskController, id: &str, state: SessionState) {
        for _ in 0..200 {
            if controller.get_status(id).await.unwrap().status == ResponseStatus::from(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} never reached {}", id, state);
    }

    #[tokio::test]
    async fn test_start_session_ids_are_distinct() {
        let controller = controller_with(Arc::new(ScriptedDriver::new(Duration::ZERO)));
        let mut ids = HashSet::new();
        for _ in 0..5 {
            assert!(ids.insert(start(&controller).await));
        }
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let controller = controller_with(Arc::new(ScriptedDriver::new(Duration::ZERO)));
        for action in [Action::GetStatus, Action::GetResult, Action::Pause, Action::Resume, Action::Stop] {
            let resp = controller
                .perform(ToolRequest::new(action).with_session("no-such-session"))
                .await;
            assert!(resp.is_error());
            assert_eq!(resp.error_kind.as_deref(), Some("session_not_found"));
            assert_eq!(resp.session_id.as_deref(), Some("no-such-session"));
        }
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let controller = controller_with(Arc::new(ScriptedDriver::new(Duration::ZERO)));
        let resp = controller
            .perform(ToolRequest {
                action: "explode".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(resp.error_kind.as_deref(), Some("invalid_action"));

        let resp = controller.perform(ToolRequest::new(Action::GetStatus)).await;
        assert_eq!(resp.error_kind.as_deref(), Some("missing_parameter"));

        let id = start(&controller).await;
        let resp = controller
            .perform(ToolRequest::new(Action::RunTask).with_session(&id))
            .await;
        assert_eq!(resp.error_kind.as_deref(), Some("missing_parameter"));

        let resp = controller
            .perform(ToolRequest::new(Action::UpdateTask).with_session(&id))
            .await;
        assert_eq!(resp.error_kind.as_deref(), Some("missing_parameter"));

        let resp = controller
            .perform(
                ToolRequest::new(Action::RunTaskAndWait)
                    .with_session(&id)
                    .with_task("t")
                    .with_timeout(-1.0),
            )
            .await;
        assert_eq!(resp.error_kind.as_deref(), Some("validation"));
    }

    #[tokio::test]
    async fn test_run_task_then_result_not_ready() {
        let controller = controller_with(Arc::new(ScriptedDriver::hanging()));
        let id = start(&controller).await;

        let resp = controller.run_task(&id, "open example.com").await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Running);

        let status = controller.get_status(&id).await.unwrap();
        assert_eq!(status.status, ResponseStatus::Running);
        assert_eq!(status.current_task.as_deref(), Some("open example.com"));

        let result = controller.get_result(&id).await.unwrap();
        assert!(result.result.is_none());
        assert!(result.error.is_none());
        assert_eq!(result.status, ResponseStatus::Running);
    }

    #[tokio::test]
    async fn test_run_task_completes_in_background() {
        let driver = Arc::new(ScriptedDriver::new(Duration::from_millis(20)));
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        controller.run_task(&id, "find docs").await.unwrap();
        wait_for(&controller, &id, SessionState::Completed).await;

        let result = controller.get_result(&id).await.unwrap();
        assert_eq!(result.result, Some(json!({"output": "done: find docs"})));
        assert!(result.error.is_none());
        assert_eq!(driver.executed_tasks(), vec!["find docs".to_string()]);
    }

    #[tokio::test]
    async fn test_driver_failure_is_recorded() {
        let driver = Arc::new(ScriptedDriver::new(Duration::from_millis(5)).fail_on("crash"));
        let controller = controller_with(driver);
        let id = start(&controller).await;

        controller.run_task(&id, "please crash").await.unwrap();
        wait_for(&controller, &id, SessionState::Failed).await;

        let result = controller.get_result(&id).await.unwrap();
        assert!(result.result.is_none());
        assert!(result.error.unwrap().contains("crash"));
    }

    #[tokio::test]
    async fn test_run_task_while_active_is_invalid() {
        let controller = controller_with(Arc::new(ScriptedDriver::hanging()));
        let id = start(&controller).await;
        controller.run_task(&id, "first").await.unwrap();

        let err = controller.run_task(&id, "second").await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                action: "run_task",
                state: SessionState::Running
            }
        ));
        let status = controller.get_status(&id).await.unwrap();
        assert_eq!(status.current_task.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        let err = controller.pause(&id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: SessionState::Idle,
                ..
            }
        ));

        controller.run_task(&id, "long task").await.unwrap();
        assert!(controller.resume(&id).await.is_err());

        let paused = controller.pause(&id).await.unwrap();
        assert_eq!(paused.status, ResponseStatus::Paused);
        assert!(controller.pause(&id).await.is_err());

        let resumed = controller.resume(&id).await.unwrap();
        assert_eq!(resumed.status, ResponseStatus::Running);
        assert_eq!(resumed.current_task.as_deref(), Some("long task"));

        let calls = driver.calls();
        assert!(calls.iter().any(|c| matches!(c, DriverCall::Pause(_))));
        assert!(calls.iter().any(|c| matches!(c, DriverCall::Resume(_))));
    }

    #[tokio::test]
    async fn test_add_instruction_then_update_task() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        let err = controller.add_instruction(&id, "too early").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");

        controller.run_task(&id, "step 1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let added = controller.add_instruction(&id, "step 2").await.unwrap();
        assert_eq!(added.status, ResponseStatus::Running);
        assert_eq!(added.current_task.as_deref(), Some("step 1"));
        assert_eq!(added.pending_instructions, Some(vec!["step 2".to_string()]));

        let updated = controller.update_task(&id, "step 3").await.unwrap();
        assert_eq!(updated.status, ResponseStatus::Running);
        let merged = updated.merged_task.unwrap();
        let (a, b, c) = (
            merged.find("step 1").unwrap(),
            merged.find("step 2").unwrap(),
            merged.find("step 3").unwrap(),
        );
        assert!(a < b && b < c);

        let status = controller.get_status(&id).await.unwrap();
        assert_eq!(status.current_task.as_deref(), Some(merged.as_str()));
        assert_eq!(status.pending_instructions, Some(Vec::new()));
        assert_eq!(driver.stop_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.executed_tasks(), vec!["step 1".to_string(), merged]);
    }

    #[tokio::test]
    async fn test_update_task_after_completion_restarts() {
        let driver = Arc::new(ScriptedDriver::new(Duration::from_millis(5)));
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        controller.run_task(&id, "step 1").await.unwrap();
        wait_for(&controller, &id, SessionState::Completed).await;

        let updated = controller.update_task(&id, "step 2").await.unwrap();
        assert_eq!(updated.status, ResponseStatus::Running);
        assert_eq!(driver.stop_count(), 0);
        wait_for(&controller, &id, SessionState::Completed).await;

        let result = controller.get_result(&id).await.unwrap().result.unwrap();
        assert!(result["output"].as_str().unwrap().contains("step 2"));
    }

    #[tokio::test]
    async fn test_update_discards_superseded_completion() {
        let driver = Arc::new(ScriptedDriver::new(Duration::from_millis(200)));
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        controller.run_task(&id, "step 1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.update_task(&id, "step 2").await.unwrap();
        wait_for(&controller, &id, SessionState::Completed).await;

        let result = controller.get_result(&id).await.unwrap().result.unwrap();
        assert!(result["output"].as_str().unwrap().contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[tokio::test]
    async fn test_stop() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;

        assert!(controller.stop(&id).await.is_err());

        controller.run_task(&id, "forever").await.unwrap();
        let stopped = controller.stop(&id).await.unwrap();
        assert_eq!(stopped.status, ResponseStatus::Stopped);
        assert_eq!(driver.stop_count(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let status = controller.get_status(&id).await.unwrap();
        assert_eq!(status.status, ResponseStatus::Stopped);
        assert!(controller.get_result(&id).await.unwrap().result.is_none());

        controller.run_task(&id, "again").await.unwrap();
        assert_eq!(controller.get_status(&id).await.unwrap().status, ResponseStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_session_removes_and_releases() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let controller = controller_with(driver.clone());
        let id = start(&controller).await;
        controller.run_task(&id, "forever").await.unwrap();

        let resp = controller.stop_session(&id).await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(driver.stop_count(), 1);
        assert!(driver.calls().iter().any(|c| matches!(c, DriverCall::Close(_))));

        let err = controller.get_status(&id).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert!(controller.stop_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let driver = Arc::new(ScriptedDriver::new(Duration::ZERO));
        let config = ControllerConfig {
            max_sessions: 1,
            ..Default::default()
        };
        let controller = TaskController::new(driver.clone(), config);
        start(&controller).await;

        let resp = controller.perform(ToolRequest::new(Action::StartSession)).await;
        assert_eq!(resp.error_kind.as_deref(), Some("session_limit"));
        let starts = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Start(_)))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_driver_start_failure() {
        let controller = controller_with(Arc::new(ScriptedDriver::new(Duration::ZERO).fail_start()));
        let resp = controller.perform(ToolRequest::new(Action::StartSession)).await;
        assert_eq!(resp.error_kind.as_deref(), Some("driver_error"));
        assert!(controller.store().is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_and_logs() {
        let controller = controller_with(Arc::new(ScriptedDriver::new(Duration::from_millis(5))));
        let first = start(&controller).await;
        let second = start(&controller).await;
        controller.run_task(&second, "look around").await.unwrap();

        let listed = controller.perform(ToolRequest::new(Action::ListSessions)).await;
        let sessions = listed.sessions.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, first);
        assert_eq!(sessions[1].current_task.as_deref(), Some("look around"));

        wait_for(&controller, &second, SessionState::Completed).await;
        let logs = controller.get_logs(&second).await.unwrap().logs.unwrap();
        assert!(logs.iter().any(|l| l.contains("Task started")));
        assert!(logs.iter().any(|l| l.contains("Task completed")));
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let config = ControllerConfig {
            session_ttl_secs: 1,
            ..Default::default()
        };
        let controller = TaskController::new(driver.clone(), config);
        let id = start(&controller).await;
        controller.run_task(&id, "forever").await.unwrap();

        assert_eq!(controller.reap_expired().await, 0);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(controller.reap_expired().await, 1);
        assert!(controller.get_status(&id).await.is_err());
        assert_eq!(driver.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let driver = Arc::new(ScriptedDriver::hanging());
        let controller = controller_with(driver.clone());
        let a = start(&controller).await;
        start(&controller).await;
        controller.run_task(&a, "forever").await.unwrap();

        controller.shutdown_all().await;
        assert!(controller.store().is_empty());
        let closes = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Close(_)))
            .count();
        assert_eq!(closes, 2);
    }
}
