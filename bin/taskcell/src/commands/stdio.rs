//! JSON-lines server: one request per stdin line, one response per stdout
//! line. Requests run concurrently, so responses may arrive out of order;
//! each carries the `session_id` it refers to.

use std::sync::Arc;
use taskcell_agent::{SessionReaper, TaskController};
use taskcell_core::{Error, ToolRequest, ToolResponse};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::build_controller;

pub async fn run() -> anyhow::Result<()> {
    let (_config, _paths, controller) = build_controller()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reaper = Arc::new(SessionReaper::new(controller.clone()));
    let reaper_handle = tokio::spawn(reaper.run_loop(shutdown_tx.subscribe()));

    info!("Serving JSON-lines requests on stdin");
    let served = serve(controller.clone(), tokio::io::stdin(), tokio::io::stdout()).await;

    info!("Input closed, shutting down");
    let _ = shutdown_tx.send(());
    controller.shutdown_all().await;
    let _ = reaper_handle.await;
    served
}

/// Process requests until `input` reaches EOF and every in-flight request
/// has been answered.
pub async fn serve<R, W>(controller: TaskController, input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let controller = controller.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let reply = handle_line(&controller, &line).await;
                    if tx.send(reply).await.is_err() {
                        debug!("Output closed, dropping response");
                    }
                });
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    writer.await??;
    Ok(())
}

/// Decode one request line and return the encoded response.
pub async fn handle_line(controller: &TaskController, line: &str) -> String {
    let response = match serde_json::from_str::<ToolRequest>(line) {
        Ok(request) => controller.perform(request).await,
        Err(e) => ToolResponse::from_error(&Error::Json(e)),
    };
    serde_json::to_string(&response)
        .unwrap_or_else(|e| format!(r#"{{"status":"error","error":"{}"}}"#, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use taskcell_core::config::ControllerConfig;
    use taskcell_driver::ScriptedDriver;
    use tokio::io::AsyncReadExt;

    fn controller() -> TaskController {
        TaskController::new(
            Arc::new(ScriptedDriver::new(Duration::from_millis(10))),
            ControllerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_handle_line() {
        let controller = controller();
        let reply: Value =
            serde_json::from_str(&handle_line(&controller, r#"{"action": "start_session"}"#).await).unwrap();
        assert_eq!(reply["status"], "idle");
        let id = reply["session_id"].as_str().unwrap().to_string();

        let line = format!(
            r#"{{"action": "run_task_and_wait", "session_id": "{}", "task": "open docs", "timeout_seconds": 5}}"#,
            id
        );
        let reply: Value = serde_json::from_str(&handle_line(&controller, &line).await).unwrap();
        assert_eq!(reply["status"], "completed");
        assert_eq!(reply["result"]["output"], "done: open docs");

        let reply: Value = serde_json::from_str(&handle_line(&controller, "not json").await).unwrap();
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error_kind"], "json");
    }

    #[tokio::test]
    async fn test_serve_answers_every_line() {
        let controller = controller();
        let input = b"{\"action\": \"start_session\"}\n\n{\"action\": \"list_sessions\"}\n{oops\n".to_vec();
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);

        serve(controller, &input[..], writer).await.unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        let replies: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().any(|r| r["status"] == "idle"));
        assert!(replies.iter().any(|r| r["error_kind"] == "json"));
    }
}
