use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::agents::context::InvocationContext;
use crate::agents::descriptor::AgentDescriptor;
use crate::agents::flow::{LoopOutcome, TransferTarget, run_agent_loop};
use crate::agents::{AgentOutcome, NextStep};
use crate::model::{Content, Llm, ROLE_MODEL};

/// A specialist with its own instruction and tools. When it finishes, or
/// decides the request is not for it, control goes back to its parent.
pub struct LeafAgent {
    descriptor: AgentDescriptor,
    parent: Option<TransferTarget>,
    model: Arc<dyn Llm>,
}

impl LeafAgent {
    pub fn new(descriptor: AgentDescriptor, model: Arc<dyn Llm>) -> Self {
        Self {
            descriptor,
            parent: None,
            model,
        }
    }

    pub(crate) fn with_parent(mut self, parent: &AgentDescriptor) -> Self {
        self.parent = Some(TransferTarget::of(parent));
        self
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn return_step(&self) -> NextStep {
        match &self.parent {
            Some(parent) => NextStep::TransferTo(parent.name.clone()),
            None => NextStep::Complete,
        }
    }

    pub async fn handle_request(&self, ctx: &mut InvocationContext) -> Result<AgentOutcome> {
        let targets = self.parent.iter().cloned().collect::<Vec<_>>();
        let outcome = run_agent_loop(&self.descriptor, &self.model, ctx, &targets).await?;

        let text = match outcome {
            LoopOutcome::Transfer(target) => {
                tracing::info!(
                    agent = %self.descriptor.name,
                    to = %target,
                    "leaf declined request"
                );
                return Ok(AgentOutcome {
                    response: String::new(),
                    next: NextStep::TransferTo(target),
                });
            }
            LoopOutcome::Answered(text) => text,
        };

        let mut event = ctx
            .new_event(&self.descriptor.name)
            .with_content(Content::new(ROLE_MODEL).with_text(text.clone()))
            .into_final();
        if let Some(key) = &self.descriptor.output_key
            && !text.trim().is_empty()
        {
            event = event.with_state_delta(key, Value::String(text.clone()));
        }
        ctx.emit(event).await?;

        tracing::info!(
            agent = %self.descriptor.name,
            output_key = self.descriptor.output_key.as_deref().unwrap_or(""),
            chars = text.len(),
            "leaf completed"
        );
        Ok(AgentOutcome {
            response: text,
            next: self.return_step(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::descriptor::LlmAgentBuilder;
    use crate::agents::flow::TRANSFER_TO_AGENT_TOOL_NAME;
    use crate::model::{LlmResponse, MockLlm, ROLE_USER};
    use crate::session::{CreateRequest, InMemorySessionService, SessionService};
    use crate::tools::venue::check_availability_tool;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn context(query: &str) -> InvocationContext {
        let sessions: Arc<dyn SessionService> = Arc::new(InMemorySessionService::new());
        let session = sessions
            .create(CreateRequest {
                app_name: "app".to_string(),
                user_id: "u".to_string(),
                session_id: "s".to_string(),
                state: BTreeMap::new(),
            })
            .await
            .expect("session");
        let content = Content::new(ROLE_USER).with_text(query);
        let mut ctx = InvocationContext::new("inv-1", session, content.clone(), sessions);
        let user = crate::session::Event::user("inv-1", content);
        ctx.emit(user).await.expect("user event");
        ctx
    }

    fn venue_leaf(model: Arc<dyn Llm>) -> LeafAgent {
        let venue = LlmAgentBuilder::new("get_venues_agent")
            .tool(check_availability_tool())
            .output_key("venue_options")
            .build()
            .expect("venue");
        let parent = LlmAgentBuilder::new("event_planner_agent")
            .description("Coordinates event planning.")
            .build()
            .expect("parent");
        LeafAgent::new(venue, model).with_parent(&parent)
    }

    #[tokio::test]
    async fn leaf_runs_tool_then_records_output_and_returns_to_parent() {
        let mock = Arc::new(
            MockLlm::new("mock")
                .with_response(LlmResponse::function_call(
                    "check_availability",
                    json!({"venue_name": "darwin showgrounds", "date": "2025-06-14"}),
                ))
                .with_text("Darwin Showgrounds is booked; try Darwin Waterfront."),
        );
        let leaf = venue_leaf(mock.clone());
        let mut ctx = context("Is Darwin Showgrounds free?").await;

        let outcome = leaf.handle_request(&mut ctx).await.expect("leaf runs");
        assert_eq!(
            outcome.next,
            NextStep::TransferTo("event_planner_agent".to_string())
        );
        assert_eq!(
            ctx.state.get("venue_options"),
            Some(&json!("Darwin Showgrounds is booked; try Darwin Waterfront."))
        );

        let tool_result = ctx.history[2]
            .content()
            .and_then(|c| {
                c.parts.iter().find_map(|p| match p {
                    crate::model::Part::FunctionResponse { function_response } => {
                        Some(function_response.response.clone())
                    }
                    _ => None,
                })
            })
            .expect("tool response event");
        assert_eq!(tool_result, json!({"status": "unavailable"}));

        let requests = mock.requests();
        let offered = requests[0]
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(offered, vec!["check_availability", TRANSFER_TO_AGENT_TOOL_NAME]);
    }

    #[tokio::test]
    async fn leaf_transfer_back_leaves_output_untouched() {
        let mock = Arc::new(MockLlm::new("mock").with_response(LlmResponse::function_call(
            TRANSFER_TO_AGENT_TOOL_NAME,
            json!({"agent_name": "event_planner_agent"}),
        )));
        let leaf = venue_leaf(mock);
        let mut ctx = context("Write me a poem").await;

        let outcome = leaf.handle_request(&mut ctx).await.expect("leaf runs");
        assert!(outcome.response.is_empty());
        assert_eq!(
            outcome.next,
            NextStep::TransferTo("event_planner_agent".to_string())
        );
        assert!(!ctx.state.contains_key("venue_options"));
        assert_eq!(
            ctx.history
                .last()
                .and_then(|e| e.actions.transfer_to_agent.clone()),
            Some("event_planner_agent".to_string())
        );
    }

    #[tokio::test]
    async fn orphan_leaf_gets_no_transfer_tool() {
        let mock = Arc::new(MockLlm::new("mock").with_text("done"));
        let descriptor = LlmAgentBuilder::new("solo_agent").build().expect("solo");
        let leaf = LeafAgent::new(descriptor, mock.clone());
        let mut ctx = context("hi").await;

        let outcome = leaf.handle_request(&mut ctx).await.expect("leaf runs");
        assert_eq!(outcome.next, NextStep::Complete);
        assert!(mock.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn step_limit_is_enforced() {
        let mut mock = MockLlm::new("mock");
        for _ in 0..3 {
            mock = mock.with_response(LlmResponse::function_call(
                "check_availability",
                json!({"venue_name": "Hall", "date": "2025-01-01"}),
            ));
        }
        let descriptor = LlmAgentBuilder::new("looping_agent")
            .tool(check_availability_tool())
            .max_steps(2)
            .build()
            .expect("descriptor");
        let leaf = LeafAgent::new(descriptor, Arc::new(mock));
        let mut ctx = context("loop").await;

        let err = leaf.handle_request(&mut ctx).await.expect_err("limit");
        assert!(matches!(
            err.downcast_ref::<crate::error::PlannerError>(),
            Some(crate::error::PlannerError::AgentStepLimit { limit: 2, .. })
        ));
    }
}
