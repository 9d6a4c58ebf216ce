//! In-process chat harness
//!
//! Builds a `ChatRouter` over `FlakyStorage` and in-memory presence, and
//! connects test clients straight to it. A `TestClient` is what a WebSocket
//! connection would see, minus the JSON framing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use xfchat::backend::auth::Identity;
use xfchat::backend::chat::ChatRouter;
use xfchat::backend::presence::MemoryPresenceBackend;
use xfchat::backend::realtime::ConnectionHandle;
use xfchat::backend::server::{build_state_with, AppState};
use xfchat::shared::config::ChatConfig;
use xfchat::shared::event::{ClientEvent, PendingConversation, ServerEvent};
use xfchat::shared::messaging::ConversationId;

use super::auth_helpers::TEST_JWT_SECRET;
use super::flaky_storage::FlakyStorage;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration tuned for tests: fast retries, short grace period
pub fn test_config() -> ChatConfig {
    ChatConfig::builder()
        .jwt_secret(TEST_JWT_SECRET)
        .persist_retries(2)
        .retry_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .presence_grace(Duration::from_millis(50))
        .build()
        .expect("Test configuration should be valid")
}

pub struct TestChat {
    pub state: AppState,
    pub router: Arc<ChatRouter>,
    pub storage: Arc<FlakyStorage>,
}

impl TestChat {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        let storage = Arc::new(FlakyStorage::new());
        let state = build_state_with(config, storage.clone(), Arc::new(MemoryPresenceBackend::new()));
        let router = state.router.clone();
        Self { state, router, storage }
    }

    /// Create a conversation between the given users
    pub async fn conversation(&self, members: &[Identity]) -> ConversationId {
        let (first, rest) = members.split_first().expect("A conversation needs members");
        let conversation = self
            .router
            .create_conversation(first.user_id, rest.iter().map(|m| m.user_id).collect())
            .await
            .expect("Failed to create conversation");
        conversation.id
    }

    /// Connect a client and consume its `hello`
    pub async fn connect(&self, identity: Identity) -> TestClient {
        let (handle, rx) = self.router.connect(identity).await;
        let mut client = TestClient {
            identity,
            handle,
            rx,
            router: self.router.clone(),
            pending: Vec::new(),
        };
        client.pending = crate::assert_event!(
            client.recv().await,
            ServerEvent::Hello { pending, .. } => pending
        );
        client
    }
}

impl Default for TestChat {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestClient {
    pub identity: Identity,
    pub handle: ConnectionHandle,
    pub rx: mpsc::Receiver<ServerEvent>,
    pub router: Arc<ChatRouter>,
    /// Pending summary received in `hello`
    pub pending: Vec<PendingConversation>,
}

impl TestClient {
    /// Run a client event the way the socket loop does: errors come back as
    /// events on this connection
    pub async fn submit(&self, event: ClientEvent) {
        if let Err(error) = self.router.dispatch(&self.handle, event).await {
            let _ = self.handle.send(ServerEvent::from(&error)).await;
        }
    }

    pub async fn send_text(&self, conversation_id: ConversationId, body: &str) {
        self.submit(ClientEvent::Send {
            conversation_id,
            body: body.to_string(),
        })
        .await;
    }

    /// Next event, failing the test if none arrives in time
    pub async fn recv(&mut self) -> ServerEvent {
        match tokio::time::timeout(RECV_TIMEOUT, self.rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("Connection {} closed", self.handle.id),
            Err(_) => panic!("No event for {} within {:?}", self.identity.user_id, RECV_TIMEOUT),
        }
    }

    /// Everything already waiting on the channel
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn assert_idle(&mut self) {
        let events = self.drain();
        assert!(events.is_empty(), "Expected no events, got {:?}", events);
    }

    pub async fn disconnect(self) {
        self.router.disconnect(self.handle.id).await;
    }
}
