use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::RuntimeConfig;
use crate::error::PlannerError;
use crate::model::{Content, ROLE_USER};

pub const USER_AUTHOR: &str = "user";

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn next_event_id() -> String {
    format!("evt-{}", EVENT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventActions {
    pub transfer_to_agent: Option<String>,
    pub state_delta: BTreeMap<String, Value>,
}

/// One turn entry: the user's message, a model step, a tool result, or an
/// agent's answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub content: Option<Content>,
    pub actions: EventActions,
    pub final_response: bool,
}

impl Event {
    pub fn new(invocation_id: &str, author: &str) -> Self {
        Self {
            id: next_event_id(),
            invocation_id: invocation_id.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
            content: None,
            actions: EventActions::default(),
            final_response: false,
        }
    }

    pub fn user(invocation_id: &str, content: Content) -> Self {
        let mut event = Self::new(invocation_id, USER_AUTHOR);
        event.content = Some(Content {
            role: ROLE_USER.to_string(),
            parts: content.parts,
        });
        event
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_state_delta(mut self, key: &str, value: Value) -> Self {
        self.actions.state_delta.insert(key.to_string(), value);
        self
    }

    pub fn with_transfer(mut self, target: &str) -> Self {
        self.actions.transfer_to_agent = Some(target.to_string());
        self
    }

    pub fn into_final(mut self) -> Self {
        self.final_response = true;
        self
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn is_user(&self) -> bool {
        self.author == USER_AUTHOR
    }

    pub fn is_final_response(&self) -> bool {
        self.final_response
    }

    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub app_name: String,
    pub user_id: String,
    pub id: String,
    pub state: BTreeMap<String, Value>,
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            id: session_id.to_string(),
            state: BTreeMap::new(),
            events: Vec::new(),
            last_update_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    fn not_found(&self) -> PlannerError {
        PlannerError::SessionNotFound {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub state: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub num_recent_events: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub app_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

#[async_trait]
pub trait SessionService: Send + Sync {
    /// Returns the existing session when the key is already present.
    async fn create(&self, req: CreateRequest) -> Result<Session>;

    async fn get(&self, req: GetRequest) -> Result<Session>;

    async fn list(&self, req: ListRequest) -> Result<Vec<Session>>;

    async fn delete(&self, req: DeleteRequest) -> Result<()>;

    /// Appends `event` and folds its `state_delta` into the session state.
    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()>;
}

/// Process-local session store. Nothing survives process exit.
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create(&self, req: CreateRequest) -> Result<Session> {
        let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key).or_insert_with(|| {
            tracing::debug!(
                app = %req.app_name,
                user = %req.user_id,
                session = %req.session_id,
                "created session"
            );
            let mut session = Session::new(&req.app_name, &req.user_id, &req.session_id);
            session.state = req.state.clone();
            session
        });
        Ok(session.clone())
    }

    async fn get(&self, req: GetRequest) -> Result<Session> {
        let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
        let sessions = self.sessions.read().await;
        let mut session = sessions.get(&key).cloned().ok_or_else(|| key.not_found())?;
        if let Some(recent) = req.num_recent_events
            && session.events.len() > recent
        {
            let skip = session.events.len() - recent;
            session.events.drain(..skip);
        }
        Ok(session)
    }

    async fn list(&self, req: ListRequest) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut matching = sessions
            .values()
            .filter(|s| s.app_name == req.app_name && s.user_id == req.user_id)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn delete(&self, req: DeleteRequest) -> Result<()> {
        let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
        self.sessions
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| key.not_found().into())
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(key).ok_or_else(|| key.not_found())?;
        for (state_key, value) in &event.actions.state_delta {
            session.state.insert(state_key.clone(), value.clone());
        }
        session.last_update_time = event.timestamp;
        session.events.push(event);
        Ok(())
    }
}

pub fn build_session_service() -> Arc<dyn SessionService> {
    Arc::new(InMemorySessionService::new())
}

pub async fn ensure_session_exists(
    session_service: &Arc<dyn SessionService>,
    cfg: &RuntimeConfig,
) -> Result<Session> {
    session_service
        .create(CreateRequest {
            app_name: cfg.app_name.clone(),
            user_id: cfg.user_id.clone(),
            session_id: cfg.session_id.clone(),
            state: BTreeMap::new(),
        })
        .await
        .with_context(|| {
            format!(
                "failed to create session '{}' for app '{}'",
                cfg.session_id, cfg.app_name
            )
        })
}
