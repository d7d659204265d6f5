use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::channel::mpsc::UnboundedSender;
use serde_json::Value;

use crate::model::{Content, ROLE_USER};
use crate::session::{Event, Session, SessionKey, SessionService};

/// Mutable view of one session for the duration of a single user turn.
/// Every event goes through [`InvocationContext::emit`], which keeps the
/// local state, the stored session and any live listener in step.
pub struct InvocationContext {
    pub invocation_id: String,
    pub session_key: SessionKey,
    pub user_content: Content,
    pub state: BTreeMap<String, Value>,
    pub history: Vec<Event>,
    sessions: Arc<dyn SessionService>,
    sink: Option<UnboundedSender<Result<Event>>>,
}

impl InvocationContext {
    pub fn new(
        invocation_id: &str,
        session: Session,
        user_content: Content,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            session_key: SessionKey::new(&session.app_name, &session.user_id, &session.id),
            user_content,
            state: session.state,
            history: session.events,
            sessions,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: UnboundedSender<Result<Event>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn user_text(&self) -> String {
        self.user_content.text()
    }

    pub fn new_event(&self, author: &str) -> Event {
        Event::new(&self.invocation_id, author)
    }

    pub async fn emit(&mut self, event: Event) -> Result<()> {
        for (key, value) in &event.actions.state_delta {
            self.state.insert(key.clone(), value.clone());
        }

        self.sessions
            .append_event(&self.session_key, event.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to persist event from '{}' to session '{}'",
                    event.author, self.session_key.session_id
                )
            })?;

        tracing::debug!(
            event_id = %event.id,
            author = %event.author,
            final_response = event.final_response,
            transfer = event.actions.transfer_to_agent.as_deref().unwrap_or(""),
            "event emitted"
        );

        if let Some(sink) = &self.sink
            && sink.unbounded_send(Ok(event.clone())).is_err()
        {
            tracing::debug!("event listener dropped; continuing without streaming");
            self.sink = None;
        }
        self.history.push(event);
        Ok(())
    }
}

/// Conversation history as seen by `agent_name`. User turns and the agent's
/// own events pass through unchanged. Text from other agents is handed over as
/// user-role context, and their tool traffic is dropped.
pub fn build_contents(history: &[Event], agent_name: &str) -> Vec<Content> {
    let mut contents = Vec::new();
    for event in history {
        let Some(content) = event.content() else {
            continue;
        };
        if content.parts.is_empty() {
            continue;
        }

        if event.is_user() || event.author == agent_name {
            contents.push(content.clone());
            continue;
        }

        let text = content.text();
        if text.trim().is_empty() {
            continue;
        }
        contents.push(
            Content::new(ROLE_USER)
                .with_text(format!("For context: [{}] said: {}", event.author, text)),
        );
    }
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ROLE_MODEL;
    use serde_json::json;

    #[test]
    fn foreign_agent_text_becomes_context_and_tool_traffic_is_dropped() {
        let history = vec![
            Event::user("inv", Content::new(ROLE_USER).with_text("Find a hall")),
            Event::new("inv", "get_venues_agent").with_content(
                Content::new(ROLE_MODEL)
                    .with_function_call("check_availability", json!({"venue_name": "A"})),
            ),
            Event::new("inv", "get_venues_agent")
                .with_content(Content::new(ROLE_MODEL).with_text("Hall A is free")),
            Event::new("inv", "event_planner_agent")
                .with_content(Content::new(ROLE_MODEL).with_text("Summary")),
        ];

        let contents = build_contents(&history, "event_planner_agent");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].text(), "Find a hall");
        assert_eq!(
            contents[1].text(),
            "For context: [get_venues_agent] said: Hall A is free"
        );
        assert_eq!(contents[1].role, ROLE_USER);
        assert_eq!(contents[2].role, ROLE_MODEL);

        let own = build_contents(&history, "get_venues_agent");
        assert_eq!(own.len(), 4);
        assert!(own[1].has_function_parts());
    }
}
