use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatter::chat::session::{CANCELLED_REPLY, FAILED_REPLY, REMOTE_RATE_LIMITED_REPLY};
use chatter::chat::{ChatSession, FailureKind, SessionDeps, SessionState, SubmitOutcome};
use chatter::config::ChatConfig;
use chatter::db::preferences::{self, PreferenceStore};
use chatter::db::{self, lock, DbPool, HistoryStore};
use chatter::llm::models::{Message, Role};
use chatter::llm::{CompletionClient, LlmError};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Replays canned completion results in order and records every request.
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<Message, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<Message, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete_chat(&self, _model: &str, messages: &[Message]) -> Result<Message, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("script exhausted".to_string())))
    }

    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

/// Cancels the caller's token as soon as a request arrives, then never answers.
struct StalledClient {
    stop: CancellationToken,
}

#[async_trait]
impl CompletionClient for StalledClient {
    async fn complete_chat(&self, _model: &str, _messages: &[Message]) -> Result<Message, LlmError> {
        self.stop.cancel();
        std::future::pending().await
    }

    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, LlmError> {
        std::future::pending().await
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        std::future::pending().await
    }
}

/// Answers chat turns at once but never answers a title request.
struct SlowTitleClient;

#[async_trait]
impl CompletionClient for SlowTitleClient {
    async fn complete_chat(&self, _model: &str, messages: &[Message]) -> Result<Message, LlmError> {
        if messages[0].content.starts_with("find a title") {
            return std::future::pending().await;
        }
        Ok(Message::assistant("ok"))
    }

    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

/// Snapshots the stored transcript while the request is in flight.
struct TranscriptSnapshotClient {
    pool: DbPool,
    seen: Mutex<Option<Vec<(Role, String)>>>,
}

#[async_trait]
impl CompletionClient for TranscriptSnapshotClient {
    async fn complete_chat(&self, _model: &str, _messages: &[Message]) -> Result<Message, LlmError> {
        let conn = lock(&self.pool);
        let conversations = HistoryStore::list_conversations(&conn).unwrap();
        assert_eq!(conversations.len(), 1);
        let stored = HistoryStore::list_messages(&conn, conversations[0].id)
            .unwrap()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        *self.seen.lock().unwrap() = Some(stored);
        Ok(Message::assistant("Pong"))
    }

    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

fn deps(pool: &DbPool, client: Arc<dyn CompletionClient>) -> SessionDeps {
    SessionDeps {
        pool: pool.clone(),
        client,
        config: ChatConfig::default(),
    }
}

fn reply(text: &str) -> Result<Message, LlmError> {
    Ok(Message::assistant(text))
}

#[tokio::test]
async fn test_first_message_creates_conversation() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![reply("Hi there!")]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();
    assert!(session.conversation_id().is_none());

    let outcome = session.submit("  Hello  ", &CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Replied { reply: Message::assistant("Hi there!"), failure: None }
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.input_enabled());

    let id = session.conversation_id().expect("conversation created");
    let conn = lock(&pool);
    let summary = HistoryStore::get_conversation(&conn, id).unwrap().unwrap();
    assert_eq!(summary.title, "Hello");

    let history = HistoryStore::list_messages(&conn, id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!((history[0].role, history[0].content.as_str()), (Role::User, "Hello"));
    assert_eq!((history[1].role, history[1].content.as_str()), (Role::Assistant, "Hi there!"));

    // The request carried the trimmed user message as the whole context
    assert_eq!(client.requests(), vec![vec![Message::user("Hello")]]);
}

#[tokio::test]
async fn test_follow_up_sends_full_context() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![reply("one"), reply("two")]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();
    let token = CancellationToken::new();

    session.submit("first", &token).await.unwrap();
    let id = session.conversation_id().unwrap();
    session.submit("second", &token).await.unwrap();
    assert_eq!(session.conversation_id(), Some(id));

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1],
        vec![Message::user("first"), Message::assistant("one"), Message::user("second")]
    );

    let conn = lock(&pool);
    assert_eq!(HistoryStore::list_conversations(&conn).unwrap().len(), 1);
    assert_eq!(HistoryStore::list_messages(&conn, id).unwrap().len(), 4);
}

#[tokio::test]
async fn test_network_failure_appends_placeholder() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![Err(LlmError::Network("connection refused".into()))]);
    let mut session = ChatSession::new(deps(&pool, client)).unwrap();

    let outcome = session.submit("Are you there?", &CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Replied {
            reply: Message::assistant(FAILED_REPLY),
            failure: Some(FailureKind::NetworkOrOtherFailure),
        }
    );
    assert!(session.input_enabled());

    let conn = lock(&pool);
    let history = HistoryStore::list_messages(&conn, session.conversation_id().unwrap()).unwrap();
    let assistant: Vec<_> = history.iter().filter(|m| m.role == Role::Assistant).collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, FAILED_REPLY);
}

#[tokio::test]
async fn test_provider_http_error_reads_as_rate_limited() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![Err(LlmError::RateLimited)]);
    let mut session = ChatSession::new(deps(&pool, client)).unwrap();

    let outcome = session.submit("Hello", &CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Replied {
            reply: Message::assistant(REMOTE_RATE_LIMITED_REPLY),
            failure: Some(FailureKind::RemoteRateLimited),
        }
    );
}

#[tokio::test]
async fn test_cancel_mid_request() {
    let pool = db::open_in_memory().unwrap();
    let token = CancellationToken::new();
    let client = Arc::new(StalledClient { stop: token.clone() });
    let mut session = ChatSession::new(deps(&pool, client)).unwrap();

    let outcome = session.submit("Write a long essay", &token).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Replied {
            reply: Message::assistant(CANCELLED_REPLY),
            failure: Some(FailureKind::CancelledByUser),
        }
    );
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(session.input_enabled());

    let conn = lock(&pool);
    let history = HistoryStore::list_messages(&conn, session.conversation_id().unwrap()).unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["Write a long essay", CANCELLED_REPLY]);
}

#[tokio::test]
async fn test_local_rate_limit_blocks_without_persisting() {
    let pool = db::open_in_memory().unwrap();
    {
        let conn = lock(&pool);
        PreferenceStore::set_i64(&conn, preferences::LAST_TRY, Utc::now().timestamp()).unwrap();
        PreferenceStore::set_i64(&conn, preferences::TRIES, 11).unwrap();
    }
    let client = ScriptedClient::new(vec![reply("never")]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();

    let outcome = session.submit("Hello", &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::RateLimitedLocally);
    assert!(session.messages().is_empty());
    assert!(client.requests().is_empty());
    assert!(HistoryStore::list_conversations(&lock(&pool)).unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_model_is_rejected() {
    let pool = db::open_in_memory().unwrap();
    PreferenceStore::set_string(&lock(&pool), preferences::API_MODEL, "text-davinci-edit-001").unwrap();
    let client = ScriptedClient::new(vec![reply("never")]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();

    let outcome = session.submit("Hello", &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::ModelNotSupported("text-davinci-edit-001".to_string()));
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();

    let outcome = session.submit("   \n", &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::EmptyInput);
    assert!(PreferenceStore::get_i64(&lock(&pool), preferences::TRIES).unwrap().is_none());
}

#[tokio::test]
async fn test_user_message_stored_before_request() {
    let pool = db::open_in_memory().unwrap();
    let client = Arc::new(TranscriptSnapshotClient { pool: pool.clone(), seen: Mutex::new(None) });
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();

    session.submit("Ping", &CancellationToken::new()).await.unwrap();

    // While in flight: only the user message, no reply yet
    let seen = client.seen.lock().unwrap().clone();
    assert_eq!(seen, Some(vec![(Role::User, "Ping".to_string())]));

    let history = HistoryStore::list_messages(&lock(&pool), session.conversation_id().unwrap()).unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["Ping", "Pong"]);
}

#[tokio::test]
async fn test_title_predicted_only_after_threshold() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![
        reply("a1"),
        reply("a2"),
        reply("a3"),
        reply("\"Small talk\"\n"),
    ]);
    let mut session = ChatSession::new(deps(&pool, client.clone())).unwrap();
    let token = CancellationToken::new();

    session.submit("Hello", &token).await.unwrap();
    session.submit("How are you?", &token).await.unwrap();
    // Four messages so far: no title request yet
    assert!(!session.wants_title());
    session.refresh_title(&token).await.unwrap();
    assert_eq!(client.requests().len(), 2);
    assert_eq!(session.title(), "Hello");

    session.submit("Nice weather", &token).await.unwrap();
    // The reply comes back before any title request goes out
    assert_eq!(client.requests().len(), 3);
    assert!(session.wants_title());

    session.refresh_title(&token).await.unwrap();
    let requests = client.requests();
    assert_eq!(requests.len(), 4);

    let title_request = &requests[3];
    assert_eq!(title_request.len(), 1);
    assert!(title_request[0].content.starts_with("find a title for this conversation:\n"));
    assert!(title_request[0].content.contains("Nice weather\na3\n"));

    assert_eq!(session.title(), "Small talk");
    let stored = HistoryStore::get_conversation(&lock(&pool), session.conversation_id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Small talk");
    // Title requests are not part of the transcript
    assert_eq!(session.messages().len(), 6);
}

#[tokio::test]
async fn test_title_falls_back_to_first_message() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![
        reply("a1"),
        reply("a2"),
        reply("a3"),
        Err(LlmError::Network("timeout".into())),
    ]);
    let mut session = ChatSession::new(deps(&pool, client)).unwrap();
    let token = CancellationToken::new();

    for text in ["Hello", "second", "third"] {
        session.submit(text, &token).await.unwrap();
    }
    session.refresh_title(&token).await.unwrap();

    let stored = HistoryStore::get_conversation(&lock(&pool), session.conversation_id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Hello");
}

#[tokio::test]
async fn test_slow_title_does_not_hold_back_reply() {
    let pool = db::open_in_memory().unwrap();
    let mut session = ChatSession::new(deps(&pool, Arc::new(SlowTitleClient))).unwrap();
    let token = CancellationToken::new();

    session.submit("one", &token).await.unwrap();
    session.submit("two", &token).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), session.submit("three", &token))
        .await
        .expect("reply returned without waiting for the title")
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Replied { reply: Message::assistant("ok"), failure: None });
    assert_eq!(session.messages().len(), 6);

    // A stalled title request can be cancelled and keeps the current title
    let stop = CancellationToken::new();
    stop.cancel();
    session.refresh_title(&stop).await.unwrap();
    assert_eq!(session.title(), "one");
}

#[tokio::test]
async fn test_resume_continues_stored_conversation() {
    let pool = db::open_in_memory().unwrap();
    let first = ScriptedClient::new(vec![reply("Hi!")]);
    let mut session = ChatSession::new(deps(&pool, first)).unwrap();
    session.submit("Hello", &CancellationToken::new()).await.unwrap();
    let id = session.conversation_id().unwrap();
    drop(session);

    let second = ScriptedClient::new(vec![reply("Still here.")]);
    let mut resumed = ChatSession::resume(deps(&pool, second.clone()), id).unwrap();
    assert_eq!(resumed.title(), "Hello");
    assert_eq!(resumed.messages(), [Message::user("Hello"), Message::assistant("Hi!")]);

    resumed.submit("Again", &CancellationToken::new()).await.unwrap();
    assert_eq!(second.requests()[0].len(), 3);
    assert_eq!(HistoryStore::list_conversations(&lock(&pool)).unwrap().len(), 1);
    assert_eq!(HistoryStore::list_messages(&lock(&pool), id).unwrap().len(), 4);
}

#[tokio::test]
async fn test_resume_unknown_conversation_fails() {
    let pool = db::open_in_memory().unwrap();
    let client = ScriptedClient::new(vec![]);
    assert!(ChatSession::resume(deps(&pool, client), uuid::Uuid::new_v4()).is_err());
}
