//! The model step loop shared by leaves and the coordinator: ask the model,
//! run whatever tools it requests, feed the results back, and stop on a text
//! answer or a transfer.
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::agents::context::{InvocationContext, build_contents};
use crate::agents::descriptor::AgentDescriptor;
use crate::error::PlannerError;
use crate::model::{Content, FunctionCall, Llm, LlmRequest, ROLE_MODEL, ROLE_USER, ToolDeclaration};
use crate::tools::find_tool;

pub const TRANSFER_TO_AGENT_TOOL_NAME: &str = "transfer_to_agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub name: String,
    pub description: String,
}

impl TransferTarget {
    pub fn of(descriptor: &AgentDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Answered(String),
    Transfer(String),
}

pub fn transfer_declaration(targets: &[TransferTarget]) -> ToolDeclaration {
    let catalog = targets
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    let names = targets.iter().map(|t| t.name.clone()).collect::<Vec<_>>();
    ToolDeclaration {
        name: TRANSFER_TO_AGENT_TOOL_NAME.to_string(),
        description: format!(
            "Hand the conversation to another agent that is better suited to answer. Available agents:\n{catalog}"
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to transfer to.",
                    "enum": names,
                }
            },
            "required": ["agent_name"],
        }),
    }
}

fn resolve_transfer(call: &FunctionCall, targets: &[TransferTarget]) -> Result<String, String> {
    let requested = call
        .args
        .get("agent_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if requested.is_empty() {
        return Err("transfer_to_agent requires a non-empty 'agent_name'".to_string());
    }
    if targets.iter().any(|t| t.name == requested) {
        return Ok(requested.to_string());
    }
    let names = targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
    Err(format!(
        "unknown agent '{}'. Valid targets: {}",
        requested,
        names.join(", ")
    ))
}

async fn execute_tool_call(agent: &AgentDescriptor, call: &FunctionCall) -> Value {
    let Some(tool) = find_tool(&agent.tools, &call.name) else {
        tracing::warn!(agent = %agent.name, tool = %call.name, "model requested an unbound tool");
        return json!({
            "status": "error",
            "error": format!("tool '{}' is not available to agent '{}'", call.name, agent.name),
        });
    };

    tracing::info!(agent = %agent.name, tool = %call.name, "executing tool");
    match tool.execute(call.args.clone()).await {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                agent = %agent.name,
                tool = %call.name,
                error = %err,
                "tool execution failed"
            );
            json!({ "status": "error", "error": format!("{err:#}") })
        }
    }
}

/// Drives `agent` until the model answers with text or requests a valid
/// transfer. Tool calls and their results are emitted as events; the final
/// text is returned to the caller, which decides how to record it.
pub async fn run_agent_loop(
    agent: &AgentDescriptor,
    model: &Arc<dyn Llm>,
    ctx: &mut InvocationContext,
    targets: &[TransferTarget],
) -> Result<LoopOutcome> {
    let mut declarations = agent
        .tools
        .iter()
        .map(|tool| tool.declaration())
        .collect::<Vec<_>>();
    if !targets.is_empty() {
        declarations.push(transfer_declaration(targets));
    }

    for step in 1..=agent.max_steps {
        let request = LlmRequest {
            model: model.name().to_string(),
            system_instruction: agent.render_instruction(&ctx.state)?,
            contents: build_contents(&ctx.history, &agent.name),
            tools: declarations.clone(),
            temperature: agent.temperature,
        };
        let response = model
            .generate(request)
            .await
            .with_context(|| format!("agent '{}' failed at model step {}", agent.name, step))?;

        let content = Content {
            role: ROLE_MODEL.to_string(),
            parts: response.content.parts,
        };
        let calls = content
            .function_calls()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        if calls.is_empty() {
            return Ok(LoopOutcome::Answered(content.text()));
        }

        let call_event = ctx.new_event(&agent.name).with_content(content);
        ctx.emit(call_event).await?;

        let mut responses = Content::new(ROLE_USER);
        let mut transfer = None;
        for call in &calls {
            if call.name == TRANSFER_TO_AGENT_TOOL_NAME {
                match resolve_transfer(call, targets) {
                    Ok(target) => {
                        responses = responses.with_function_response(
                            &call.name,
                            json!({ "status": "transferred", "agent_name": target }),
                        );
                        transfer.get_or_insert(target);
                    }
                    Err(message) => {
                        tracing::warn!(agent = %agent.name, error = %message, "rejected transfer");
                        responses = responses.with_function_response(
                            &call.name,
                            json!({ "status": "error", "error": message }),
                        );
                    }
                }
                continue;
            }

            let result = execute_tool_call(agent, call).await;
            responses = responses.with_function_response(&call.name, result);
        }

        let mut response_event = ctx.new_event(&agent.name).with_content(responses);
        if let Some(target) = &transfer {
            response_event = response_event.with_transfer(target);
        }
        ctx.emit(response_event).await?;

        if let Some(target) = transfer {
            tracing::info!(from = %agent.name, to = %target, "agent transfer");
            return Ok(LoopOutcome::Transfer(target));
        }
    }

    Err(PlannerError::AgentStepLimit {
        agent: agent.name.clone(),
        limit: agent.max_steps,
    }
    .into())
}
