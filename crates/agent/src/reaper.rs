use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::controller::TaskController;

/// Periodically tears down sessions past their TTL.
pub struct SessionReaper {
    controller: TaskController,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(controller: TaskController) -> Self {
        let interval = Duration::from_secs(controller.config().reap_interval_secs.max(1));
        Self { controller, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if self.controller.config().session_ttl_secs == 0 {
            debug!("Session expiry disabled, reaper not started");
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "SessionReaper started");

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.controller.reap_expired().await;
                    if reaped > 0 {
                        info!(reaped, "Expired sessions removed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("SessionReaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskcell_core::config::ControllerConfig;
    use taskcell_driver::ScriptedDriver;

    #[tokio::test]
    async fn test_reaper_removes_expired_sessions() {
        let config = ControllerConfig {
            session_ttl_secs: 1,
            ..Default::default()
        };
        let controller = TaskController::new(Arc::new(ScriptedDriver::new(Duration::ZERO)), config);
        controller.start_session().await.unwrap();

        let reaper = Arc::new(SessionReaper::new(controller.clone()).with_interval(Duration::from_millis(100)));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(reaper.run_loop(rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(controller.store().is_empty());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reaper_exits_when_expiry_disabled() {
        let config = ControllerConfig {
            session_ttl_secs: 0,
            ..Default::default()
        };
        let controller = TaskController::new(Arc::new(ScriptedDriver::new(Duration::ZERO)), config);
        let reaper = Arc::new(SessionReaper::new(controller));
        let (_tx, rx) = broadcast::channel(1);
        tokio::time::timeout(Duration::from_secs(1), reaper.run_loop(rx))
            .await
            .unwrap();
    }
}
