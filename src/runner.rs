use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use futures::Stream;
use futures::channel::mpsc;
use tokio::sync::Mutex;

use crate::agents::Agent;
use crate::agents::context::InvocationContext;
use crate::config::RuntimeConfig;
use crate::model::Content;
use crate::session::{Event, GetRequest, SessionKey, SessionService, ensure_session_exists};
use crate::telemetry::unix_ms_now;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

type SessionLocks = std::sync::Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>;

static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_invocation_id() -> String {
    format!(
        "inv-{}-{}",
        unix_ms_now(),
        INVOCATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
    )
}

/// Drives user turns through the root agent. Turns on the same session are
/// serialised; different sessions run independently.
pub struct Runner {
    app_name: String,
    agent: Arc<Agent>,
    sessions: Arc<dyn SessionService>,
    session_locks: Arc<SessionLocks>,
}

impl Runner {
    pub fn new(app_name: &str, agent: Agent, sessions: Arc<dyn SessionService>) -> Self {
        Self {
            app_name: app_name.to_string(),
            agent: Arc::new(agent),
            sessions,
            session_locks: Arc::default(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn session_service(&self) -> Arc<dyn SessionService> {
        self.sessions.clone()
    }

    fn session_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Sessions with a turn running or queued.
    #[cfg(test)]
    pub(crate) fn tracked_sessions(&self) -> usize {
        self.session_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Starts one turn and returns its events as they are persisted. The
    /// session must already exist.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
    ) -> Result<EventStream> {
        let key = SessionKey::new(&self.app_name, user_id, session_id);
        self.sessions
            .get(get_request(&key))
            .await
            .with_context(|| format!("cannot start a turn on session '{session_id}'"))?;

        let lock = self.session_lock(&key);
        let locks = self.session_locks.clone();
        let agent = self.agent.clone();
        let sessions = self.sessions.clone();
        let invocation_id = next_invocation_id();
        let (tx, rx) = mpsc::unbounded::<Result<Event>>();

        tokio::spawn(async move {
            let turn = lock.clone().lock_owned().await;
            tracing::debug!(invocation = %invocation_id, session = %key.session_id, "turn started");
            let result = run_invocation(
                &agent,
                sessions,
                &key,
                &invocation_id,
                new_message,
                tx.clone(),
            )
            .await;
            if let Err(err) = result {
                tracing::warn!(
                    invocation = %invocation_id,
                    error = %format!("{err:#}"),
                    "turn failed"
                );
                let _ = tx.unbounded_send(Err(err));
            }

            drop(turn);
            drop(lock);
            release_session_lock(&locks, &key);
        });

        Ok(Box::pin(rx))
    }
}

/// Drops the entry once no turn holds or waits on it. Callers take their
/// clone under the same map lock, so the count cannot race.
fn release_session_lock(locks: &SessionLocks, key: &SessionKey) {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(key);
        tracing::debug!(session = %key.session_id, tracked = locks.len(), "released session lock");
    }
}

fn get_request(key: &SessionKey) -> GetRequest {
    GetRequest {
        app_name: key.app_name.clone(),
        user_id: key.user_id.clone(),
        session_id: key.session_id.clone(),
        num_recent_events: None,
    }
}

async fn run_invocation(
    agent: &Agent,
    sessions: Arc<dyn SessionService>,
    key: &SessionKey,
    invocation_id: &str,
    new_message: Content,
    sink: mpsc::UnboundedSender<Result<Event>>,
) -> Result<()> {
    // Re-read under the lock so this turn sees every earlier turn.
    let session = sessions.get(get_request(key)).await?;
    let mut ctx = InvocationContext::new(invocation_id, session, new_message.clone(), sessions)
        .with_sink(sink);

    let user_event = Event::user(invocation_id, new_message);
    ctx.emit(user_event).await?;

    let outcome = agent
        .handle_request(&mut ctx)
        .await
        .with_context(|| format!("agent '{}' failed to handle the request", agent.name()))?;
    tracing::info!(
        invocation = %invocation_id,
        agent = %agent.name(),
        response_chars = outcome.response.len(),
        "turn completed"
    );
    Ok(())
}

pub async fn build_runner(
    agent: Agent,
    cfg: &RuntimeConfig,
    session_service: Arc<dyn SessionService>,
) -> Result<Runner> {
    ensure_session_exists(&session_service, cfg).await?;
    Ok(Runner::new(&cfg.app_name, agent, session_service))
}
