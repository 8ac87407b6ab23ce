//! Per-session record and its state transitions.
//!
//! The record only moves between states; it never talks to the driver. The
//! controller decides when a transition is allowed and does the driver calls.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use taskcell_core::{Error, SessionState, SessionSummary, ToolResponse};
use taskcell_driver::DriverHandle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type SessionId = String;

/// Identifies one execution of a task. Completions carrying a stale id are
/// discarded.
///
/// `lineage` is shared by a run and the restarts `update_task` makes of it;
/// a fresh `run_task` starts a new lineage.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub id: u64,
    pub lineage: u64,
    pub cancel: CancellationToken,
}

/// Final reply of a lineage, published once when its last run settles.
pub type OutcomeReceiver = watch::Receiver<Option<ToolResponse>>;

/// Task phase. Outcome data lives only in the variants where it is legal:
/// `result` in `Completed`, `error` in `Failed` and `Timeout`.
#[derive(Debug)]
pub enum Phase {
    Idle,
    Running(RunTicket),
    Paused(RunTicket),
    Completed { result: Value },
    Failed { error: Error },
    Stopped,
    Timeout { error: Error },
}

impl Phase {
    pub fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Running(_) => SessionState::Running,
            Phase::Paused(_) => SessionState::Paused,
            Phase::Completed { .. } => SessionState::Completed,
            Phase::Failed { .. } => SessionState::Failed,
            Phase::Stopped => SessionState::Stopped,
            Phase::Timeout { .. } => SessionState::Timeout,
        }
    }

    fn ticket(&self) -> Option<&RunTicket> {
        match self {
            Phase::Running(t) | Phase::Paused(t) => Some(t),
            _ => None,
        }
    }
}

pub struct Session {
    id: SessionId,
    driver: DriverHandle,
    phase: Phase,
    current_task: Option<String>,
    pending_instructions: Vec<String>,
    next_run_id: u64,
    outcome_tx: watch::Sender<Option<ToolResponse>>,
    logs: VecDeque<String>,
    max_logs: usize,
    /// Set once the session is torn down; queued actions must not touch it.
    closed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, driver: DriverHandle, max_logs: usize) -> Self {
        let (outcome_tx, _) = watch::channel(None);
        let now = Utc::now();
        Self {
            id,
            driver,
            phase: Phase::Idle,
            current_task: None,
            pending_instructions: Vec::new(),
            next_run_id: 0,
            outcome_tx,
            logs: VecDeque::new(),
            max_logs,
            closed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn driver_handle(&self) -> &DriverHandle {
        &self.driver
    }

    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn current_task(&self) -> Option<&str> {
        self.current_task.as_deref()
    }

    pub fn pending_instructions(&self) -> &[String] {
        &self.pending_instructions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn active_run_id(&self) -> Option<u64> {
        self.phase.ticket().map(|t| t.id)
    }

    pub fn active_lineage(&self) -> Option<u64> {
        self.phase.ticket().map(|t| t.lineage)
    }

    /// Observe the outcome of the current lineage without holding the
    /// session lock. Call right after `begin_run`.
    pub fn subscribe_outcome(&self) -> OutcomeReceiver {
        self.outcome_tx.subscribe()
    }

    fn set_phase(&mut self, phase: Phase) {
        let was_active = self.phase.ticket().is_some();
        self.phase = phase;
        self.updated_at = Utc::now();
        if was_active && self.phase.ticket().is_none() {
            let outcome = self.outcome_response();
            self.outcome_tx.send_if_modified(|slot| {
                if slot.is_some() {
                    return false;
                }
                *slot = Some(outcome);
                true
            });
        }
    }

    /// Start a new run of `task`. Any run still active is superseded without
    /// passing through an intermediate state; its ticket is returned so the
    /// caller can cancel it, and the new run continues its lineage.
    pub fn begin_run(&mut self, task: String) -> (RunTicket, Option<RunTicket>) {
        self.next_run_id += 1;
        let superseded = self.phase.ticket().cloned();
        let lineage = match &superseded {
            Some(old) => old.lineage,
            None => {
                // Receivers of the previous lineage keep its published outcome.
                self.outcome_tx = watch::channel(None).0;
                self.next_run_id
            }
        };
        let ticket = RunTicket {
            id: self.next_run_id,
            lineage,
            cancel: CancellationToken::new(),
        };
        self.current_task = Some(task);
        self.pending_instructions.clear();
        self.set_phase(Phase::Running(ticket.clone()));
        (ticket, superseded)
    }

    pub fn mark_paused(&mut self) {
        if let Phase::Running(ticket) = &self.phase {
            let ticket = ticket.clone();
            self.set_phase(Phase::Paused(ticket));
        }
    }

    pub fn mark_resumed(&mut self) {
        if let Phase::Paused(ticket) = &self.phase {
            let ticket = ticket.clone();
            self.set_phase(Phase::Running(ticket));
        }
    }

    pub fn add_instruction(&mut self, instruction: String) {
        self.pending_instructions.push(instruction);
        self.updated_at = Utc::now();
    }

    /// Apply a driver completion. Returns false when it belongs to a run that
    /// is no longer active.
    pub fn finish(&mut self, run_id: u64, outcome: taskcell_core::Result<Value>) -> bool {
        if self.closed || self.active_run_id() != Some(run_id) {
            return false;
        }
        match outcome {
            Ok(result) => {
                self.set_phase(Phase::Completed { result });
                self.log("Task completed successfully");
            }
            Err(error) => {
                self.log(format!("Task failed: {}", error));
                self.set_phase(Phase::Failed { error });
            }
        }
        true
    }

    /// Move an active task to `Stopped`, returning its ticket.
    pub fn mark_stopped(&mut self) -> Option<RunTicket> {
        let ticket = self.phase.ticket().cloned()?;
        self.set_phase(Phase::Stopped);
        Some(ticket)
    }

    /// Move an active task to `Timeout`, returning its ticket.
    pub fn mark_timed_out(&mut self, error: Error) -> Option<RunTicket> {
        let ticket = self.phase.ticket().cloned()?;
        self.set_phase(Phase::Timeout { error });
        Some(ticket)
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(session_id = %self.id, "{}", message);
        if self.max_logs == 0 {
            return;
        }
        while self.logs.len() >= self.max_logs {
            self.logs.pop_front();
        }
        self.logs
            .push_back(format!("{} {}", Utc::now().to_rfc3339(), message));
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.iter().cloned().collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            state: self.state(),
            current_task: self.current_task.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn status_response(&self) -> ToolResponse {
        let state = self.state();
        let mut resp = ToolResponse::new(state)
            .with_session_id(self.id.clone())
            .with_current_task(self.current_task.clone())
            .with_message(format!("Current status: {}", state));
        resp.pending_instructions = Some(self.pending_instructions.clone());
        resp.created_at = Some(self.created_at);
        resp.updated_at = Some(self.updated_at);
        resp
    }

    /// Result lookup: the outcome once settled, "not ready" otherwise.
    pub fn result_response(&self) -> ToolResponse {
        let state = self.state();
        let resp = ToolResponse::new(state).with_session_id(self.id.clone());
        match &self.phase {
            Phase::Completed { result } => resp.with_result(result.clone()),
            Phase::Failed { error } => resp.with_failure(error),
            Phase::Timeout { error } => resp.with_failure(error).with_message("Task timed out."),
            _ => resp.with_message(format!("Task not finished yet. Current status: {}", state)),
        }
    }

    /// Final reply of a bounded wait.
    pub fn outcome_response(&self) -> ToolResponse {
        let state = self.state();
        let resp = ToolResponse::new(state)
            .with_session_id(self.id.clone())
            .with_current_task(self.current_task.clone());
        match &self.phase {
            Phase::Completed { result } => resp.with_result(result.clone()).with_message("Task completed."),
            Phase::Failed { error } => resp.with_failure(error).with_message("Task failed."),
            Phase::Timeout { error } => resp
                .with_failure(error)
                .with_message(format!("{}. The task was stopped.", error)),
            _ => resp.with_message(format!("Task ended with status: {}.", state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("s1".to_string(), DriverHandle::generate(), 3)
    }

    #[test]
    fn test_begin_run_sets_task_and_publishes_outcome() {
        let mut s = session();
        let (ticket, superseded) = s.begin_run("open example.com".to_string());
        let rx = s.subscribe_outcome();
        assert!(superseded.is_none());
        assert_eq!(ticket.id, 1);
        assert_eq!(ticket.lineage, 1);
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.current_task(), Some("open example.com"));
        assert!(rx.borrow().is_none());

        assert!(s.finish(ticket.id, Ok(json!("ok"))));
        let outcome = rx.borrow().clone().unwrap();
        assert_eq!(outcome.status, taskcell_core::ResponseStatus::Completed);
        assert_eq!(outcome.result, Some(json!("ok")));
    }

    #[test]
    fn test_outcome_is_scoped_to_lineage() {
        let mut s = session();
        let (first, _) = s.begin_run("first".to_string());
        let first_rx = s.subscribe_outcome();
        s.mark_stopped();

        let (second, _) = s.begin_run("second".to_string());
        let second_rx = s.subscribe_outcome();
        assert_ne!(first.lineage, second.lineage);
        s.finish(second.id, Ok(json!("second done")));

        let first_outcome = first_rx.borrow().clone().unwrap();
        assert_eq!(first_outcome.status, taskcell_core::ResponseStatus::Stopped);
        assert_eq!(first_outcome.current_task.as_deref(), Some("first"));
        let second_outcome = second_rx.borrow().clone().unwrap();
        assert_eq!(second_outcome.status, taskcell_core::ResponseStatus::Completed);
    }

    #[test]
    fn test_restart_supersedes_active_run() {
        let mut s = session();
        let (first, _) = s.begin_run("a".to_string());
        s.add_instruction("more".to_string());
        let rx = s.subscribe_outcome();
        let (second, superseded) = s.begin_run("a + more".to_string());
        assert_eq!(superseded.map(|t| t.id), Some(first.id));
        assert_ne!(first.id, second.id);
        assert_eq!(first.lineage, second.lineage);
        assert!(rx.borrow().is_none());
        assert!(s.pending_instructions().is_empty());

        assert!(!s.finish(first.id, Ok(json!("stale"))));
        assert_eq!(s.state(), SessionState::Running);
        assert!(s.finish(second.id, Ok(json!("fresh"))));
        assert_eq!(s.state(), SessionState::Completed);
        assert_eq!(rx.borrow().as_ref().and_then(|o| o.result.clone()), Some(json!("fresh")));
    }

    #[test]
    fn test_pause_resume_keeps_ticket() {
        let mut s = session();
        let (ticket, _) = s.begin_run("task".to_string());
        s.mark_paused();
        assert_eq!(s.state(), SessionState::Paused);
        assert_eq!(s.active_run_id(), Some(ticket.id));
        s.mark_resumed();
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.current_task(), Some("task"));

        s.mark_resumed();
        assert_eq!(s.state(), SessionState::Running);
    }

    #[test]
    fn test_late_completion_after_stop_is_discarded() {
        let mut s = session();
        let (ticket, _) = s.begin_run("task".to_string());
        assert!(s.mark_stopped().is_some());
        assert!(!s.finish(ticket.id, Ok(json!({"late": true}))));
        assert_eq!(s.state(), SessionState::Stopped);
        assert!(s.result_response().result.is_none());
    }

    #[test]
    fn test_failure_records_error() {
        let mut s = session();
        let (ticket, _) = s.begin_run("task".to_string());
        assert!(s.finish(ticket.id, Err(Error::Driver("page crashed".into()))));
        let resp = s.result_response();
        assert_eq!(resp.status, taskcell_core::ResponseStatus::Failed);
        assert_eq!(resp.error.as_deref(), Some("Driver error: page crashed"));
        assert_eq!(resp.error_kind.as_deref(), Some("driver_error"));
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_result_not_ready_while_running() {
        let mut s = session();
        s.begin_run("task".to_string());
        let resp = s.result_response();
        assert!(resp.result.is_none());
        assert!(resp.error.is_none());
        assert!(resp.message.unwrap().contains("not finished"));
    }

    #[test]
    fn test_stop_and_timeout_require_active_task() {
        let mut s = session();
        assert!(s.mark_stopped().is_none());
        assert!(s.mark_timed_out(Error::Timeout("late".into())).is_none());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut s = session();
        for i in 0..5 {
            s.log(format!("line {}", i));
        }
        let logs = s.logs();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].ends_with("line 2"));
        assert!(logs[2].ends_with("line 4"));
    }
}
