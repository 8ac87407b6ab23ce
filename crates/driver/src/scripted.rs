//! In-process driver that simulates work with timers.
//!
//! Used by tests and by `driver.kind = "scripted"` for trying the controller
//! without a real actuator installed.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskcell_core::config::ScriptedDriverConfig;
use taskcell_core::{Error, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Driver, DriverHandle};

const TICK: Duration = Duration::from_millis(10);

/// Every call the controller made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Start(DriverHandle),
    Execute(DriverHandle, String),
    Pause(DriverHandle),
    Resume(DriverHandle),
    Stop(DriverHandle),
    Close(DriverHandle),
}

struct Slot {
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Slot {
    fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            cancel: CancellationToken::new(),
        }
    }
}

pub struct ScriptedDriver {
    /// `None` runs forever until stopped.
    duration: Option<Duration>,
    fail_on: Option<String>,
    fail_start: bool,
    fail_stop: bool,
    slots: Mutex<HashMap<DriverHandle, Slot>>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl ScriptedDriver {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            fail_on: None,
            fail_start: false,
            fail_stop: false,
            slots: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A driver whose tasks never complete on their own.
    pub fn hanging() -> Self {
        Self {
            duration: None,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn from_config(config: &ScriptedDriverConfig) -> Self {
        let mut driver = Self::new(Duration::from_millis(config.delay_ms));
        driver.fail_on = config.fail_on.clone();
        driver
    }

    /// Tasks containing `needle` fail once their duration elapses.
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    /// Make `start` fail, as if the actuator could not be launched.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make `stop` fail and leave the task running.
    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Stop(_)))
            .count()
    }

    pub fn executed_tasks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Execute(_, task) => Some(task),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn with_slot<T>(&self, handle: &DriverHandle, f: impl FnOnce(&mut Slot) -> T) -> Result<T> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| Error::Driver("scripted driver state poisoned".to_string()))?;
        let slot = slots
            .get_mut(handle)
            .ok_or_else(|| Error::Driver(format!("unknown driver handle {}", handle)))?;
        Ok(f(slot))
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start(&self) -> Result<DriverHandle> {
        if self.fail_start {
            return Err(Error::Driver("actuator failed to launch".to_string()));
        }
        let handle = DriverHandle::generate();
        self.with_slot_insert(&handle)?;
        self.record(DriverCall::Start(handle.clone()));
        Ok(handle)
    }

    async fn execute(&self, handle: &DriverHandle, task: &str) -> Result<Value> {
        self.record(DriverCall::Execute(handle.clone(), task.to_string()));

        // A fresh token per run so an earlier stop does not cancel this one.
        let (cancel, mut paused) = self.with_slot(handle, |slot| {
            slot.cancel = CancellationToken::new();
            (slot.cancel.clone(), slot.paused.subscribe())
        })?;

        let mut remaining = self.duration;
        loop {
            if remaining.is_some_and(|r| r.is_zero()) {
                break;
            }

            while *paused.borrow_and_update() {
                tokio::select! {
                    changed = paused.changed() => {
                        if changed.is_err() {
                            return Err(Error::Driver("driver handle closed".to_string()));
                        }
                    }
                    _ = cancel.cancelled() => return Err(Error::Driver("task stopped".to_string())),
                }
            }

            let step = remaining.map_or(TICK, |r| r.min(TICK));
            tokio::select! {
                _ = tokio::time::sleep(step) => {
                    remaining = remaining.map(|r| r.saturating_sub(step));
                }
                _ = cancel.cancelled() => return Err(Error::Driver("task stopped".to_string())),
            }
        }

        if let Some(needle) = &self.fail_on {
            if task.contains(needle.as_str()) {
                debug!(handle = %handle, "Scripted task failing on '{}'", needle);
                return Err(Error::Driver(format!("task failed: matched '{}'", needle)));
            }
        }

        Ok(json!({ "output": format!("done: {}", task) }))
    }

    async fn pause(&self, handle: &DriverHandle) -> Result<()> {
        self.record(DriverCall::Pause(handle.clone()));
        self.with_slot(handle, |slot| {
            slot.paused.send_replace(true);
        })
    }

    async fn resume(&self, handle: &DriverHandle) -> Result<()> {
        self.record(DriverCall::Resume(handle.clone()));
        self.with_slot(handle, |slot| {
            slot.paused.send_replace(false);
        })
    }

    async fn stop(&self, handle: &DriverHandle) -> Result<()> {
        self.record(DriverCall::Stop(handle.clone()));
        if self.fail_stop {
            return Err(Error::Driver("actuator did not acknowledge stop".to_string()));
        }
        self.with_slot(handle, |slot| {
            slot.cancel.cancel();
            slot.paused.send_replace(false);
        })
    }

    async fn close(&self, handle: &DriverHandle) -> Result<()> {
        self.record(DriverCall::Close(handle.clone()));
        let slot = self
            .slots
            .lock()
            .map_err(|_| Error::Driver("scripted driver state poisoned".to_string()))?
            .remove(handle);
        if let Some(slot) = slot {
            slot.cancel.cancel();
        }
        Ok(())
    }
}

impl ScriptedDriver {
    fn with_slot_insert(&self, handle: &DriverHandle) -> Result<()> {
        self.slots
            .lock()
            .map_err(|_| Error::Driver("scripted driver state poisoned".to_string()))?
            .insert(handle.clone(), Slot::new());
        Ok(())
    }
}
