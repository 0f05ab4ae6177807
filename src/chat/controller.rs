use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::conversation::{Conversation, Message, Role};
use crate::model::{GenerationError, ProviderAdapter, ProviderConfig, ProviderKind};

pub const ERROR_PREFIX: &str = "❌ Error: ";

/// Sessions untouched for this long are dropped from the store.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    AwaitingUserInput,
    Generating,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("a reply is still being generated for this session")]
    Busy,
    #[error("session store lock poisoned")]
    LockPoisoned,
    #[error("generation task failed: {0}")]
    Worker(String),
}

/// What a client sees of a session. Credentials are never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: ChatState,
    pub provider: ProviderKind,
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub view: SessionView,
}

/// Everything a generation needs, detached from the session so the
/// session lock is not held during the remote call.
#[derive(Debug)]
pub struct Turn {
    pub history: Vec<Message>,
    pub user_message: String,
    pub provider: ProviderConfig,
    epoch: u64,
}

/// Per-session context: the conversation, the selected provider and the
/// turn bookkeeping.
#[derive(Debug)]
pub struct Session {
    conversation: Conversation,
    provider: ProviderConfig,
    state: ChatState,
    in_flight: bool,
    // bumped on every clear, to spot replies that outlived their conversation
    epoch: u64,
    last_active: Instant,
}

impl Session {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            conversation: Conversation::new(),
            provider,
            state: ChatState::Idle,
            in_flight: false,
            epoch: 0,
            last_active: Instant::now(),
        }
    }

    pub fn attach(&mut self) {
        if self.state == ChatState::Idle && !self.in_flight {
            self.state = ChatState::AwaitingUserInput;
        }
    }

    pub fn begin_turn(&mut self, text: String) -> Result<Turn, ControllerError> {
        if self.in_flight {
            return Err(ControllerError::Busy);
        }
        self.conversation.append(Role::User, text.clone());
        self.state = ChatState::Generating;
        self.in_flight = true;

        Ok(Turn {
            history: self.conversation.snapshot().to_vec(),
            user_message: text,
            provider: self.provider.clone(),
            epoch: self.epoch,
        })
    }

    /// Record the result of a turn. Failures become an assistant message
    /// rather than an error. Returns the appended content.
    pub fn finish_turn(&mut self, outcome: Result<String, GenerationError>) -> String {
        let content = match outcome {
            Ok(reply) => reply,
            Err(err) => format!("{}{}", ERROR_PREFIX, err),
        };
        self.conversation.append(Role::Assistant, content.clone());
        self.in_flight = false;
        self.state = ChatState::Idle;
        content
    }

    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_idle(&self, ttl: Duration) -> bool {
        !self.in_flight && self.last_active.elapsed() >= ttl
    }

    /// Accepted in any state. An outstanding generation keeps running and
    /// its reply still lands in the fresh conversation.
    pub fn clear(&mut self) {
        self.conversation.reset();
        self.epoch += 1;
        self.state = ChatState::Idle;
    }

    pub fn select_provider(&mut self, provider: ProviderConfig) {
        self.provider = provider;
    }

    pub fn view(&self, session_id: Uuid) -> SessionView {
        SessionView {
            session_id,
            state: self.state,
            provider: self.provider.kind(),
            model: self.provider.model_id().to_string(),
            messages: self.conversation.snapshot().to_vec(),
        }
    }
}

/// Owns every session and drives turns through the provider adapter.
pub struct ChatController {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    adapter: Arc<dyn ProviderAdapter>,
    default_provider: ProviderConfig,
    idle_ttl: Duration,
}

impl ChatController {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, default_provider: ProviderConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            adapter,
            default_provider,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Session>>, ControllerError> {
        self.sessions.lock().map_err(|_| ControllerError::LockPoisoned)
    }

    pub fn create_session(&self) -> Result<SessionView, ControllerError> {
        let session_id = Uuid::new_v4();
        let mut session = Session::new(self.default_provider.clone());
        session.attach();
        let view = session.view(session_id);
        let mut sessions = self.lock()?;
        evict_idle(&mut sessions, self.idle_ttl);
        sessions.insert(session_id, session);
        info!("Created session {}", session_id);
        Ok(view)
    }

    pub fn session(&self, session_id: Uuid) -> Result<SessionView, ControllerError> {
        self.with_session(session_id, |session| {
            session.attach();
            session.view(session_id)
        })
    }

    pub fn select_provider(
        &self,
        session_id: Uuid,
        provider: ProviderConfig,
    ) -> Result<SessionView, ControllerError> {
        info!(
            "Session {} switching to {:?} ({})",
            session_id,
            provider.kind(),
            provider.model_id()
        );
        self.with_session(session_id, |session| {
            session.select_provider(provider);
            session.view(session_id)
        })
    }

    pub fn clear(&self, session_id: Uuid) -> Result<SessionView, ControllerError> {
        info!("Clearing chat for session {}", session_id);
        self.with_session(session_id, |session| {
            session.clear();
            session.view(session_id)
        })
    }

    /// Run one turn. Unknown or missing session ids open a fresh session.
    pub async fn submit(
        &self,
        session_id: Option<Uuid>,
        text: String,
    ) -> Result<TurnOutcome, ControllerError> {
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);

        let turn = {
            let mut sessions = self.lock()?;
            if !sessions.contains_key(&session_id) {
                evict_idle(&mut sessions, self.idle_ttl);
            }
            let session = sessions
                .entry(session_id)
                .or_insert_with(|| Session::new(self.default_provider.clone()));
            session.touch();
            session.begin_turn(text)?
        };
        info!(
            "Session {} turn started with {:?} ({} messages)",
            session_id,
            turn.provider.kind(),
            turn.history.len()
        );

        // The generation runs on its own task so a dropped request cannot
        // leave the session stuck in flight. A panicking adapter is reported
        // like any other failed generation and still ends the turn.
        let sessions = self.sessions.clone();
        let adapter = self.adapter.clone();
        let worker = tokio::spawn(async move {
            let Turn {
                history,
                user_message,
                provider,
                epoch,
            } = turn;
            let outcome = tokio::spawn(async move {
                adapter.generate(&history, &user_message, &provider).await
            })
            .await
            .unwrap_or_else(|e| {
                Err(GenerationError::Remote(format!(
                    "generation task failed: {}",
                    e
                )))
            });
            if let Err(ref err) = outcome {
                error!("Generation failed for session {}: {}", session_id, err);
            }

            let mut sessions = sessions.lock().map_err(|_| ControllerError::LockPoisoned)?;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(ControllerError::SessionNotFound(session_id))?;
            if session.is_stale(epoch) {
                warn!(
                    "Session {} was cleared while generating; appending the late reply to the new chat",
                    session_id
                );
            }
            session.touch();
            let reply = session.finish_turn(outcome);
            Ok::<_, ControllerError>(TurnOutcome {
                reply,
                view: session.view(session_id),
            })
        });

        worker
            .await
            .map_err(|e| ControllerError::Worker(e.to_string()))?
    }

    fn with_session<T>(
        &self,
        session_id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, ControllerError> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(ControllerError::SessionNotFound(session_id))?;
        session.touch();
        Ok(f(session))
    }
}

// Sessions with a generation in flight are kept regardless of age.
fn evict_idle(sessions: &mut HashMap<Uuid, Session>, ttl: Duration) {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_idle(ttl));
    let evicted = before - sessions.len();
    if evicted > 0 {
        info!("Evicted {} idle sessions", evicted);
    }
}
