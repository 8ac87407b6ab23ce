//! Driver that delegates each task to an external program.
//!
//! One child process runs per task. Stdout becomes the task result (parsed as
//! JSON when possible), a non-zero exit becomes a driver error. Pause and
//! resume send SIGSTOP/SIGCONT on unix.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use taskcell_core::config::CommandDriverConfig;
use taskcell_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{truncate_chars, Driver, DriverHandle};

const TASK_PLACEHOLDER: &str = "{task}";

#[derive(Default)]
struct Slot {
    pid: Option<u32>,
    cancel: Option<CancellationToken>,
    /// Bumped per execute so a superseded run never clears a newer one.
    generation: u64,
}

pub struct CommandDriver {
    config: CommandDriverConfig,
    headless: bool,
    workspace: PathBuf,
    slots: Mutex<HashMap<DriverHandle, Slot>>,
}

impl CommandDriver {
    pub fn new(config: CommandDriverConfig, headless: bool, workspace: PathBuf) -> Self {
        Self {
            config,
            headless,
            workspace,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        let program = &self.config.program;
        if program.contains('/') || program.contains('\\') {
            let path = PathBuf::from(program);
            if path.exists() {
                return Ok(path);
            }
            return Err(Error::Driver(format!("driver program not found: {}", program)));
        }
        which::which(program)
            .map_err(|_| Error::Driver(format!("driver program '{}' not found on PATH", program)))
    }

    async fn running_pid(&self, handle: &DriverHandle) -> Result<u32> {
        let slots = self.slots.lock().await;
        let slot = slots
            .get(handle)
            .ok_or_else(|| Error::Driver(format!("unknown driver handle {}", handle)))?;
        slot.pid
            .ok_or_else(|| Error::Driver("no task is running on this handle".to_string()))
    }
}

/// Expand `{task}` in the configured arguments, or append the task text.
pub fn build_args(template: &[String], task: &str) -> Vec<String> {
    if template.iter().any(|a| a.contains(TASK_PLACEHOLDER)) {
        template
            .iter()
            .map(|a| a.replace(TASK_PLACEHOLDER, task))
            .collect()
    } else {
        let mut args = template.to_vec();
        args.push(task.to_string());
        args
    }
}

/// JSON stdout is passed through, anything else is wrapped as `{"output": ...}`.
pub fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() || value.is_array() => value,
        _ => json!({ "output": trimmed }),
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed to read driver output");
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Driver(format!("pid {} out of range", pid)))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Driver(format!(
            "failed to signal driver process {}: {}",
            pid,
            std::io::Error::last_os_error()
        )))
    }
}

/// A paused process still dies on SIGKILL, but wake it so it can be reaped.
#[cfg(unix)]
fn wake(pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = signal(pid, libc::SIGCONT);
    }
}

#[cfg(not(unix))]
fn wake(_pid: Option<u32>) {}

#[async_trait]
impl Driver for CommandDriver {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn start(&self) -> Result<DriverHandle> {
        let program = self.resolve_program()?;
        std::fs::create_dir_all(&self.workspace)?;
        let handle = DriverHandle::generate();
        self.slots.lock().await.insert(handle.clone(), Slot::default());
        info!(handle = %handle, program = %program.display(), headless = self.headless, "Driver handle started");
        Ok(handle)
    }

    async fn execute(&self, handle: &DriverHandle, task: &str) -> Result<Value> {
        let program = self.resolve_program()?;
        let args = build_args(&self.config.args, task);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&self.config.env)
            .env("TASKCELL_TASK", task)
            .env("TASKCELL_HEADLESS", if self.headless { "1" } else { "0" })
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Driver(format!("failed to launch {}: {}", program.display(), e)))?;

        let cancel = CancellationToken::new();
        let generation = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(handle)
                .ok_or_else(|| Error::Driver(format!("unknown driver handle {}", handle)))?;
            slot.generation += 1;
            slot.pid = child.id();
            slot.cancel = Some(cancel.clone());
            slot.generation
        };
        debug!(handle = %handle, pid = ?child.id(), "Driver process spawned");

        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        if let Some(slot) = self.slots.lock().await.get_mut(handle) {
            if slot.generation == generation {
                slot.pid = None;
                slot.cancel = None;
            }
        }

        let status = match waited {
            Some(status) => status?,
            None => {
                if let Err(e) = child.kill().await {
                    warn!(handle = %handle, error = %e, "Failed to kill driver process");
                }
                return Err(Error::Driver("task stopped".to_string()));
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        let max = self.config.max_output_chars;

        if status.success() {
            Ok(parse_output(&truncate_chars(&stdout, max)))
        } else {
            Err(Error::Driver(format!(
                "{} exited with {}: {}",
                program.display(),
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                truncate_chars(stderr.trim(), max)
            )))
        }
    }

    async fn pause(&self, handle: &DriverHandle) -> Result<()> {
        let pid = self.running_pid(handle).await?;
        #[cfg(unix)]
        {
            signal(pid, libc::SIGSTOP)
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(Error::Driver("pause is not supported on this platform".to_string()))
        }
    }

    async fn resume(&self, handle: &DriverHandle) -> Result<()> {
        let pid = self.running_pid(handle).await?;
        #[cfg(unix)]
        {
            signal(pid, libc::SIGCONT)
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(Error::Driver("resume is not supported on this platform".to_string()))
        }
    }

    async fn stop(&self, handle: &DriverHandle) -> Result<()> {
        let slots = self.slots.lock().await;
        let slot = slots
            .get(handle)
            .ok_or_else(|| Error::Driver(format!("unknown driver handle {}", handle)))?;
        if let Some(cancel) = &slot.cancel {
            wake(slot.pid);
            cancel.cancel();
        }
        Ok(())
    }

    async fn close(&self, handle: &DriverHandle) -> Result<()> {
        if let Some(slot) = self.slots.lock().await.remove(handle) {
            if let Some(cancel) = slot.cancel {
                cancel.cancel();
            }
            debug!(handle = %handle, "Driver handle closed");
        }
        Ok(())
    }
}
