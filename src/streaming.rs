use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::agents::catalog::ROOT_AGENT_NAME;
use crate::config::RuntimeConfig;
use crate::error::PlannerError;
use crate::model::{Content, Part, ROLE_USER};
use crate::runner::Runner;
use crate::session::Event;
use crate::telemetry::TelemetrySink;

/// Text of the last agent-authored event flagged final.
pub fn final_response_text(events: &[Event], session_id: &str) -> Result<String> {
    events
        .iter()
        .rev()
        .find(|event| !event.is_user() && event.is_final_response())
        .map(Event::text)
        .ok_or_else(|| {
            PlannerError::NoFinalResponse {
                session_id: session_id.to_string(),
            }
            .into()
        })
}

pub fn extract_tool_failure_message(response: &Value) -> Option<String> {
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !status.eq_ignore_ascii_case("error") && !status.eq_ignore_ascii_case("failed") {
        return None;
    }
    response
        .get("error")
        .or_else(|| response.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| Some(format!("tool reported status '{status}'")))
}

pub fn emit_tool_lifecycle_events(event: &Event, telemetry: &TelemetrySink) {
    let Some(content) = event.content() else {
        return;
    };

    for part in &content.parts {
        match part {
            Part::FunctionCall { function_call } => {
                tracing::info!(
                    tool = %function_call.name,
                    author = %event.author,
                    lifecycle = "requested",
                    "Tool call requested"
                );
                telemetry.emit(
                    "tool.requested",
                    json!({
                        "tool": function_call.name,
                        "author": event.author
                    }),
                );
            }
            Part::FunctionResponse { function_response } => {
                if let Some(error_message) =
                    extract_tool_failure_message(&function_response.response)
                {
                    tracing::warn!(
                        tool = %function_response.name,
                        author = %event.author,
                        lifecycle = "failed",
                        error = %error_message,
                        "Tool execution failed"
                    );
                    telemetry.emit(
                        "tool.failed",
                        json!({
                            "tool": function_response.name,
                            "author": event.author,
                            "error": error_message
                        }),
                    );
                } else {
                    tracing::info!(
                        tool = %function_response.name,
                        author = %event.author,
                        lifecycle = "succeeded",
                        "Tool execution completed"
                    );
                    telemetry.emit(
                        "tool.succeeded",
                        json!({
                            "tool": function_response.name,
                            "author": event.author
                        }),
                    );
                }
            }
            Part::Text { .. } => {}
        }
    }

    if event.is_final_response() && !event.is_user() && event.author != ROOT_AGENT_NAME {
        telemetry.emit(
            "delegation.completed",
            json!({
                "agent": event.author,
                "output_keys": event.actions.state_delta.keys().collect::<Vec<_>>(),
            }),
        );
    }
}

/// Runs one prompt to completion and returns the final response text. Event
/// errors are logged as they arrive and the first one fails the turn, even
/// when a leaf already produced a final answer.
pub async fn run_prompt(
    runner: &Runner,
    cfg: &RuntimeConfig,
    prompt: &str,
    telemetry: &TelemetrySink,
) -> Result<String> {
    let mut stream = runner
        .run(
            &cfg.user_id,
            &cfg.session_id,
            Content::new(ROLE_USER).with_text(prompt),
        )
        .await
        .context("failed to start runner stream")?;

    let mut events = Vec::new();
    let mut first_error: Option<anyhow::Error> = None;

    while let Some(event_result) = stream.next().await {
        let event = match event_result {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Runner event error: {err:#}");
                first_error.get_or_insert(err);
                continue;
            }
        };

        tracing::debug!(
            author = %event.author,
            is_final = event.is_final_response(),
            text_len = event.text().len(),
            "received runner event"
        );

        if event.is_user() {
            continue;
        }
        emit_tool_lifecycle_events(&event, telemetry);
        events.push(event);
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    final_response_text(&events, &cfg.session_id)
}
