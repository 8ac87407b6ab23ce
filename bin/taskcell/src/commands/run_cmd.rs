use taskcell_core::{Action, ToolRequest};
use tracing::info;

use super::build_controller;

/// Start a session, run one task to completion or timeout, print the reply
/// and close the session.
pub async fn run(task: String, timeout: Option<f64>) -> anyhow::Result<()> {
    let (_config, _paths, controller) = build_controller()?;

    let started = controller.perform(ToolRequest::new(Action::StartSession)).await;
    let Some(session_id) = started.session_id.clone() else {
        println!("{}", serde_json::to_string_pretty(&started)?);
        anyhow::bail!("failed to start a session");
    };
    info!(session_id = %session_id, "Running task");

    let mut request = ToolRequest::new(Action::RunTaskAndWait)
        .with_session(&session_id)
        .with_task(task);
    request.timeout_seconds = timeout;

    let response = controller.perform(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    controller
        .perform(ToolRequest::new(Action::StopSession).with_session(&session_id))
        .await;
    Ok(())
}
