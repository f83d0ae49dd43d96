use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::rate_limit::RateLimiter;
use crate::config::ChatConfig;
use crate::db::{lock, DbPool, HistoryStore, StoreError};
use crate::llm::models::{Message, Role};
use crate::llm::{CompletionClient, LlmError};
use crate::settings::Settings;

pub const CANCELLED_REPLY: &str = "The answer was cancelled.";
pub const REMOTE_RATE_LIMITED_REPLY: &str = "AI was rate limited, please try again later.";
pub const FAILED_REPLY: &str = "AI failed to answer, please try again.";

const TITLE_PROMPT: &str = "find a title for this conversation:\n";

/// Why a turn ended without a real reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CancelledByUser,
    RemoteRateLimited,
    NetworkOrOtherFailure,
}

impl FailureKind {
    /// Any HTTP error status from the provider is reported as rate limiting.
    /// Only 429 is certain; the rest is a best guess.
    pub fn classify(error: &LlmError) -> Self {
        match error {
            LlmError::Cancelled => FailureKind::CancelledByUser,
            LlmError::RateLimited | LlmError::Api { .. } => FailureKind::RemoteRateLimited,
            LlmError::Network(_) | LlmError::InvalidResponse(_) => FailureKind::NetworkOrOtherFailure,
        }
    }

    pub fn reply_text(&self) -> &'static str {
        match self {
            FailureKind::CancelledByUser => CANCELLED_REPLY,
            FailureKind::RemoteRateLimited => REMOTE_RATE_LIMITED_REPLY,
            FailureKind::NetworkOrOtherFailure => FAILED_REPLY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input, nothing was sent.
    EmptyInput,
    /// Denied by the local limiter. Shown as a notice, not stored.
    RateLimitedLocally,
    ModelNotSupported(String),
    /// An assistant message was appended. `failure` is set when it is a
    /// placeholder standing in for a reply that never arrived.
    Replied { reply: Message, failure: Option<FailureKind> },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SessionDeps {
    pub pool: DbPool,
    pub client: Arc<dyn CompletionClient>,
    pub config: ChatConfig,
}

/// One chat screen: the in-memory transcript, its stored conversation and the
/// single request in flight.
pub struct ChatSession {
    deps: SessionDeps,
    rate_limiter: RateLimiter,
    conversation_id: Option<Uuid>,
    title: String,
    messages: Vec<Message>,
    model: String,
    state: SessionState,
}

impl ChatSession {
    /// A session with no stored conversation yet. The conversation is created
    /// by the first submitted message.
    pub fn new(deps: SessionDeps) -> Result<Self, SessionError> {
        let model = {
            let conn = lock(&deps.pool);
            Settings::api_model(&conn, &deps.config.default_model)?
        };

        Ok(Self {
            rate_limiter: RateLimiter::from_config(&deps.config),
            deps,
            conversation_id: None,
            title: String::new(),
            messages: Vec::new(),
            model,
            state: SessionState::Idle,
        })
    }

    /// Continues a stored conversation.
    pub fn resume(deps: SessionDeps, conversation_id: Uuid) -> Result<Self, SessionError> {
        let (summary, history) = {
            let conn = lock(&deps.pool);
            let summary = HistoryStore::get_conversation(&conn, conversation_id)?
                .ok_or(StoreError::ConversationNotFound(conversation_id))?;
            let history = HistoryStore::list_messages(&conn, conversation_id)?;
            (summary, history)
        };

        let mut session = Self::new(deps)?;
        session.conversation_id = Some(summary.id);
        session.title = summary.title;
        session.messages = history
            .into_iter()
            .map(|m| Message { role: m.role, content: m.content })
            .collect();
        debug!(conversation = %conversation_id, messages = session.messages.len(), "resumed conversation");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn input_enabled(&self) -> bool {
        self.state != SessionState::AwaitingResponse
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_model_supported(&self) -> bool {
        self.deps.config.supported_models.iter().any(|m| m == &self.model)
    }

    /// Runs one user turn. The user message is stored before the request goes
    /// out and the reply (or its placeholder) after it resolves. Cancelling
    /// `cancel` aborts the request. Titles are left to `refresh_title`.
    pub async fn submit(&mut self, input: &str, cancel: &CancellationToken) -> Result<SubmitOutcome, SessionError> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::EmptyInput);
        }

        let now = Utc::now();
        {
            let conn = lock(&self.deps.pool);
            if !self.rate_limiter.check_and_record(&conn, now.timestamp())? {
                return Ok(SubmitOutcome::RateLimitedLocally);
            }
        }

        if !self.is_model_supported() {
            warn!(model = %self.model, "model is not supported for chat");
            return Ok(SubmitOutcome::ModelNotSupported(self.model.clone()));
        }

        let conversation_id = {
            let conn = lock(&self.deps.pool);
            let id = match self.conversation_id {
                Some(id) => id,
                None => {
                    let summary = HistoryStore::create_conversation(&conn, text, now)?;
                    self.title = summary.title;
                    self.conversation_id = Some(summary.id);
                    summary.id
                }
            };
            HistoryStore::append_message(&conn, id, Role::User, text)?;
            id
        };
        self.messages.push(Message::user(text));

        self.state = SessionState::AwaitingResponse;
        info!(conversation = %conversation_id, model = %self.model, messages = self.messages.len(), "sending chat completion");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            reply = self.deps.client.complete_chat(&self.model, &self.messages) => reply,
        };

        let (reply, failure) = match result {
            Ok(reply) => (Message::assistant(reply.content), None),
            Err(e) => {
                let kind = FailureKind::classify(&e);
                warn!(?kind, "chat completion failed: {}", e);
                (Message::assistant(kind.reply_text()), Some(kind))
            }
        };
        self.state = match failure {
            Some(FailureKind::CancelledByUser) => SessionState::Cancelled,
            _ => SessionState::Idle,
        };

        {
            let conn = lock(&self.deps.pool);
            HistoryStore::append_message(&conn, conversation_id, Role::Assistant, &reply.content)?;
        }
        self.messages.push(reply.clone());

        {
            let conn = lock(&self.deps.pool);
            HistoryStore::touch_conversation(&conn, conversation_id, &self.title, Utc::now())?;
        }

        Ok(SubmitOutcome::Replied { reply, failure })
    }

    /// True once the transcript is long enough to ask the model for a title.
    pub fn wants_title(&self) -> bool {
        self.conversation_id.is_some() && self.messages.len() > self.deps.config.title_threshold
    }

    /// Asks the model for a short title and stores it. Run after a reply has
    /// been shown; a failed or cancelled request keeps the current title.
    pub async fn refresh_title(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let Some(conversation_id) = self.conversation_id else {
            return Ok(());
        };
        if !self.wants_title() {
            return Ok(());
        }

        let predicted = self.predict_title(cancel).await;
        self.title = resolve_title(predicted, &self.title, &self.messages);

        let conn = lock(&self.deps.pool);
        HistoryStore::touch_conversation(&conn, conversation_id, &self.title, Utc::now())?;
        Ok(())
    }

    /// Best effort: any failure is logged and reported as `None`.
    async fn predict_title(&self, cancel: &CancellationToken) -> Option<String> {
        let prompt = [Message::user(title_prompt(&self.messages))];

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            reply = self.deps.client.complete_chat(&self.model, &prompt) => reply,
        };

        match result {
            Ok(reply) => Some(clean_title(&reply.content)).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Title prediction failed: {}", e);
                None
            }
        }
    }
}

fn title_prompt(messages: &[Message]) -> String {
    let mut prompt = String::from(TITLE_PROMPT);
    for message in messages {
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}

fn clean_title(raw: &str) -> String {
    let flat: String = raw.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let unquoted = flat
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(&flat);
    unquoted.trim().to_string()
}

fn resolve_title(predicted: Option<String>, current: &str, messages: &[Message]) -> String {
    if let Some(title) = predicted {
        return title;
    }
    if !current.trim().is_empty() {
        return current.to_string();
    }
    messages.first().map(|m| m.content.clone()).unwrap_or_default()
}
