/// Messaging screen: conversation list, open conversation, typing presence
///
/// REST responses seed the stores, push events reconcile into them. Every mutation
/// happens under one write lock, so a reconciliation always completes before the next
/// one starts.
use crate::backend::{Backend, OutgoingFile};
use crate::connection::{ClientEmit, ConnectionManager, PushEvent};
use crate::conversations::ConversationStore;
use crate::debounce::Debouncer;
use crate::error::{Result, SyncError};
use crate::messages::MessageStore;
use crate::models::{ConversationStatus, DeleteScope, Message, Session};
use crate::typing::{TypingEmitter, TypingTracker};
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct MessengerState {
    conversations: ConversationStore,
    messages: MessageStore,
    typing: TypingTracker,
    banner: Option<String>,
}

impl MessengerState {
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn selected(&self) -> Option<&str> {
        self.messages.selected()
    }

    /// Dismissible error text
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }
}

/// Timing knobs, normally taken from `Config`
#[derive(Debug, Clone, Copy)]
pub struct MessengerTiming {
    pub seen_debounce: Duration,
    pub typing_idle: Duration,
}

impl From<&crate::config::Config> for MessengerTiming {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            seen_debounce: config.seen_debounce,
            typing_idle: config.typing_idle,
        }
    }
}

pub struct Messenger {
    backend: Arc<dyn Backend>,
    connection: Arc<ConnectionManager>,
    viewer: Session,
    state: RwLock<MessengerState>,
    mark_seen: Debouncer<String>,
    typing: TypingEmitter,
}

impl Messenger {
    pub fn new(
        backend: Arc<dyn Backend>,
        connection: Arc<ConnectionManager>,
        viewer: Session,
        timing: MessengerTiming,
    ) -> Self {
        let mark_seen = {
            let backend = backend.clone();
            Debouncer::new(timing.seen_debounce, move |chat_id: String| {
                let backend = backend.clone();
                async move {
                    if let Err(e) = backend.mark_seen(&chat_id).await {
                        error!("Failed to mark conversation {} as seen: {}", chat_id, e);
                    }
                }
                .boxed()
            })
        };
        let typing = TypingEmitter::new(connection.clone(), timing.typing_idle);
        Self {
            backend,
            connection,
            viewer,
            state: RwLock::new(MessengerState::default()),
            mark_seen,
            typing,
        }
    }

    pub fn viewer(&self) -> &Session {
        &self.viewer
    }

    pub async fn view(&self) -> RwLockReadGuard<'_, MessengerState> {
        self.state.read().await
    }

    pub async fn dismiss_error(&self) {
        self.state.write().await.banner = None;
    }

    /// Fetch the full list and replace the store; failures become banner text
    pub async fn load_conversations(&self) -> Result<()> {
        let generation = self.state.write().await.conversations.begin_load();
        let result = self.backend.conversations().await;

        let mut state = self.state.write().await;
        match result {
            Ok(items) => {
                if !state.conversations.finish_load(generation, Ok(items)) {
                    debug!("Dropped superseded conversation list");
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to load conversations: {}", e);
                if state
                    .conversations
                    .finish_load(generation, Err(e.user_message()))
                {
                    state.banner = Some(e.user_message());
                }
                Err(e)
            }
        }
    }

    /// Switch the open conversation: leave the old room, reset local state, join the new
    /// room, then load history. A history response for an older selection is discarded.
    pub async fn select_conversation(&self, chat_id: &str) -> Result<()> {
        let previous = self.view().await.selected().map(str::to_string);
        if previous.as_deref() == Some(chat_id) {
            return Ok(());
        }

        if let Some(prev) = previous.as_deref() {
            self.typing.stop(prev, &self.viewer).await;
            self.emit(ClientEmit::LeaveConversation(prev.to_string())).await;
        }

        let ticket = {
            let mut state = self.state.write().await;
            state.typing.reset(Some(chat_id));
            state.conversations.mark_seen_locally(chat_id, &self.viewer.id);
            state.messages.select(chat_id)
        };

        self.emit(ClientEmit::JoinConversation(chat_id.to_string())).await;
        self.mark_seen.call(chat_id.to_string());

        let result = self.backend.messages(chat_id).await;
        let mut state = self.state.write().await;
        match result {
            Ok(history) => {
                if !state.messages.finish_load(&ticket, Ok(history)) {
                    debug!("Dropped stale history for {}", ticket.chat_id());
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to load messages for {}: {}", chat_id, e);
                if state.messages.finish_load(&ticket, Err(e.user_message())) {
                    state.banner = Some(e.user_message());
                }
                Err(e)
            }
        }
    }

    /// Close the open conversation, leaving its room
    pub async fn close_conversation(&self) {
        let previous = {
            let mut state = self.state.write().await;
            let prev = state.selected().map(str::to_string);
            state.messages.clear();
            state.typing.reset(None);
            prev
        };
        if let Some(prev) = previous {
            self.typing.stop(&prev, &self.viewer).await;
            self.emit(ClientEmit::LeaveConversation(prev)).await;
        }
    }

    /// Send to the open conversation. Empty text with no files never reaches the network.
    pub async fn send_message(&self, text: &str, files: Vec<OutgoingFile>) -> Result<Message> {
        let chat_id = self
            .view()
            .await
            .selected()
            .map(str::to_string)
            .ok_or_else(|| SyncError::Validation("No conversation selected".to_string()))?;
        let text = text.trim();
        if text.is_empty() && files.is_empty() {
            return Err(SyncError::Validation(
                "Message must have text or an attachment".to_string(),
            ));
        }

        self.typing.stop(&chat_id, &self.viewer).await;

        match self.backend.send_message(&chat_id, text, files).await {
            Ok(message) => {
                let status = ConversationStatus {
                    seen_by: vec![self.viewer.id.clone()],
                    has_new_messages: false,
                };
                let mut state = self.state.write().await;
                state.messages.apply_new_message(&message);
                state.conversations.apply_new_message(&message, Some(&status));
                Ok(message)
            }
            Err(e) => {
                error!("Failed to send message: {}", e);
                self.state.write().await.banner = Some(e.user_message());
                Err(e)
            }
        }
    }

    pub async fn delete_message(&self, message_id: &str, scope: DeleteScope) -> Result<()> {
        if let Err(e) = self.backend.delete_message(message_id, scope).await {
            error!("Failed to delete message {}: {}", message_id, e);
            self.state.write().await.banner = Some(e.user_message());
            return Err(e);
        }
        let mut state = self.state.write().await;
        state.messages.apply_deleted(message_id, scope);
        state.conversations.apply_message_deleted(message_id);
        Ok(())
    }

    /// Feed the composer text after each keystroke
    pub async fn typing_input(&self, text: &str) {
        let selected = self.view().await.selected().map(str::to_string);
        if let Some(chat_id) = selected {
            self.typing.input(&chat_id, &self.viewer, text).await;
        }
    }

    pub async fn typing_stop(&self) {
        let selected = self.view().await.selected().map(str::to_string);
        if let Some(chat_id) = selected {
            self.typing.stop(&chat_id, &self.viewer).await;
        }
    }

    /// Reconcile one push event into the stores
    pub async fn handle_event(&self, event: &PushEvent) {
        match event {
            PushEvent::NewMessage {
                message,
                conversation_status,
            } => {
                let in_view = {
                    let mut state = self.state.write().await;
                    let appended = state.messages.apply_new_message(message);
                    state
                        .conversations
                        .apply_new_message(message, conversation_status.as_ref());
                    if appended && message.sender.id != self.viewer.id {
                        // The viewer is looking at it right now
                        state
                            .conversations
                            .mark_seen_locally(message.chat_id(), &self.viewer.id);
                        true
                    } else {
                        false
                    }
                };
                if in_view {
                    self.mark_seen.call(message.chat_id().to_string());
                }
            }
            PushEvent::ConversationSeen {
                chat_id, seen_by, ..
            } => {
                self.state
                    .write()
                    .await
                    .conversations
                    .apply_seen(chat_id, seen_by, &self.viewer.id);
            }
            PushEvent::MessageDeleted {
                message_id,
                delete_type,
                ..
            } => {
                let scope = delete_type.unwrap_or(DeleteScope::Everyone);
                let mut state = self.state.write().await;
                state.messages.apply_deleted(message_id, scope);
                state.conversations.apply_message_deleted(message_id);
            }
            PushEvent::UserTyping {
                chat_id,
                user_id,
                user_name,
            } => {
                if *user_id != self.viewer.id {
                    self.state
                        .write()
                        .await
                        .typing
                        .on_user_typing(chat_id, user_id, user_name);
                }
            }
            PushEvent::UserStoppedTyping { chat_id, user_id } => {
                self.state
                    .write()
                    .await
                    .typing
                    .on_user_stopped(chat_id, user_id);
            }
            PushEvent::RefreshConversationList => {
                info!("Refreshing conversation list");
                let _ = self.load_conversations().await;
            }
            PushEvent::NewNotification(_) | PushEvent::NotificationRead { .. } => {}
        }
    }

    /// Consume push events until the channel closes
    pub async fn run(&self, mut events: broadcast::Receiver<PushEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(&event).await,
                Err(RecvError::Lagged(n)) => {
                    // Missed events cannot be replayed; resync from REST
                    warn!("Messenger lagged {} push events, reloading", n);
                    let _ = self.load_conversations().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn emit(&self, emit: ClientEmit) {
        if let Err(e) = self.connection.emit(emit).await {
            warn!("Push emit failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{conversation, message, session, FakeBackend};
    use crate::connection::fake::FakeTransport;
    use tokio::sync::oneshot;

    const TIMING: MessengerTiming = MessengerTiming {
        seen_debounce: Duration::from_millis(300),
        typing_idle: Duration::from_millis(1000),
    };

    async fn setup() -> (Arc<Messenger>, Arc<FakeBackend>, Arc<FakeTransport>) {
        let backend = Arc::new(FakeBackend::new());
        let transport = Arc::new(FakeTransport::default());
        let connection = Arc::new(ConnectionManager::new(transport.clone(), 64));
        let me = session("me");
        connection.set_identity(Some(&me)).await;
        let messenger = Arc::new(Messenger::new(backend.clone(), connection, me, TIMING));
        (messenger, backend, transport)
    }

    #[tokio::test]
    async fn test_push_moves_conversation_to_front() {
        let (messenger, backend, _) = setup().await;
        *backend.conversations.lock().unwrap() = vec![
            conversation("c0", None),
            conversation("c1", Some(message("m1", "c1", "u2", "a"))),
        ];
        messenger.load_conversations().await.unwrap();

        messenger
            .handle_event(&PushEvent::NewMessage {
                message: message("m2", "c1", "u2", "b"),
                conversation_status: None,
            })
            .await;

        let view = messenger.view().await;
        let items = view.conversations().items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), "c1");
        assert_eq!(items[0].last_message.as_ref().unwrap().id, "m2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_clears_typing_and_orders_room_emits() {
        let (messenger, backend, transport) = setup().await;
        *backend.conversations.lock().unwrap() =
            vec![conversation("a", None), conversation("b", None)];
        messenger.load_conversations().await.unwrap();

        messenger.select_conversation("a").await.unwrap();
        messenger
            .handle_event(&PushEvent::UserTyping {
                chat_id: "a".into(),
                user_id: "u2".into(),
                user_name: "Ana".into(),
            })
            .await;
        assert_eq!(messenger.view().await.typing().names(), vec!["Ana"]);

        messenger.select_conversation("b").await.unwrap();
        assert!(messenger.view().await.typing().is_empty());

        // a late typing event from the old conversation stays hidden
        messenger
            .handle_event(&PushEvent::UserTyping {
                chat_id: "a".into(),
                user_id: "u2".into(),
                user_name: "Ana".into(),
            })
            .await;
        assert!(messenger.view().await.typing().is_empty());

        let rooms: Vec<ClientEmit> = transport
            .emits()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    ClientEmit::JoinConversation(_) | ClientEmit::LeaveConversation(_)
                )
            })
            .collect();
        assert_eq!(
            rooms,
            vec![
                ClientEmit::JoinConversation("a".into()),
                ClientEmit::LeaveConversation("a".into()),
                ClientEmit::JoinConversation("b".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_seen_is_debounced_across_quick_switches() {
        let (messenger, backend, _) = setup().await;
        messenger.select_conversation("a").await.unwrap();
        messenger.select_conversation("b").await.unwrap();
        messenger.select_conversation("c").await.unwrap();
        assert_eq!(backend.count("mark_seen"), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let seen: Vec<String> = backend
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("mark_seen"))
            .collect();
        assert_eq!(seen, vec!["mark_seen:c"]);
    }

    #[tokio::test]
    async fn test_stale_history_does_not_overwrite_new_selection() {
        let (messenger, backend, _) = setup().await;
        backend
            .messages
            .lock()
            .unwrap()
            .insert("a".into(), vec![message("ma", "a", "u2", "old")]);
        backend
            .messages
            .lock()
            .unwrap()
            .insert("b".into(), vec![message("mb", "b", "u2", "new")]);
        let (release_a, gate_a) = oneshot::channel();
        backend.message_gates.lock().unwrap().insert("a".into(), gate_a);

        let slow = {
            let messenger = messenger.clone();
            tokio::spawn(async move { messenger.select_conversation("a").await })
        };
        while backend.count("messages:a") == 0 {
            tokio::task::yield_now().await;
        }

        messenger.select_conversation("b").await.unwrap();
        release_a.send(()).unwrap();
        slow.await.unwrap().unwrap();

        let view = messenger.view().await;
        assert_eq!(view.selected(), Some("b"));
        let ids: Vec<&str> = view.messages().messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["mb"]);
    }

    #[tokio::test]
    async fn test_self_sent_message_deduplicates_with_push() {
        let (messenger, _backend, _) = setup().await;
        messenger.select_conversation("c1").await.unwrap();

        let sent = messenger.send_message("  hello  ", Vec::new()).await.unwrap();
        assert_eq!(sent.text.as_deref(), Some("hello"));
        messenger
            .handle_event(&PushEvent::NewMessage {
                message: sent.clone(),
                conversation_status: None,
            })
            .await;

        let view = messenger.view().await;
        assert_eq!(view.messages().messages().len(), 1);
        assert_eq!(view.conversations().items()[0].id(), "c1");
    }

    #[tokio::test]
    async fn test_send_validation() {
        let (messenger, backend, _) = setup().await;
        assert!(matches!(
            messenger.send_message("hi", Vec::new()).await,
            Err(SyncError::Validation(_))
        ));
        messenger.select_conversation("c1").await.unwrap();
        assert!(matches!(
            messenger.send_message("   ", Vec::new()).await,
            Err(SyncError::Validation(_))
        ));
        let file = OutgoingFile {
            name: "cat.png".into(),
            mime: "image/png".into(),
            bytes: vec![1, 2, 3],
        };
        let sent = messenger.send_message("", vec![file]).await.unwrap();
        assert_eq!(sent.media.len(), 1);
        assert_eq!(backend.count("send_message"), 1);
    }

    #[tokio::test]
    async fn test_seen_event_uses_viewer_identity() {
        let (messenger, backend, _) = setup().await;
        let mut unread = conversation("c1", None);
        unread.has_new_messages = true;
        *backend.conversations.lock().unwrap() = vec![unread];
        messenger.load_conversations().await.unwrap();

        let event = PushEvent::ConversationSeen {
            chat_id: "c1".into(),
            seen_by: vec!["u2".into()],
            user_id: "u2".into(),
        };
        messenger.handle_event(&event).await;
        messenger.handle_event(&event).await;
        assert!(messenger.view().await.conversations().get("c1").unwrap().has_new_messages);

        messenger
            .handle_event(&PushEvent::ConversationSeen {
                chat_id: "c1".into(),
                seen_by: vec!["u2".into(), "me".into()],
                user_id: "me".into(),
            })
            .await;
        assert!(!messenger.view().await.conversations().get("c1").unwrap().has_new_messages);
    }

    #[tokio::test]
    async fn test_delete_push_tombstones_and_clears_summary() {
        let (messenger, backend, _) = setup().await;
        *backend.conversations.lock().unwrap() =
            vec![conversation("c1", Some(message("m1", "c1", "u2", "a")))];
        backend
            .messages
            .lock()
            .unwrap()
            .insert("c1".into(), vec![message("m1", "c1", "u2", "a")]);
        messenger.load_conversations().await.unwrap();
        messenger.select_conversation("c1").await.unwrap();

        messenger
            .handle_event(&PushEvent::MessageDeleted {
                message_id: "m1".into(),
                chat_id: Some("c1".into()),
                delete_type: None,
            })
            .await;

        let view = messenger.view().await;
        assert!(view.conversations().get("c1").unwrap().last_message.is_none());
        assert_eq!(
            view.messages().messages()[0].deletion,
            crate::models::Deletion::DeletedForEveryone
        );
    }

    #[tokio::test]
    async fn test_load_failure_sets_banner() {
        let (messenger, backend, _) = setup().await;
        backend.fail("conversations");
        assert!(messenger.load_conversations().await.is_err());
        assert!(messenger.view().await.banner().is_some());
        messenger.dismiss_error().await;
        assert!(messenger.view().await.banner().is_none());
    }

    #[tokio::test]
    async fn test_run_consumes_connection_events() {
        let (messenger, backend, transport) = setup().await;
        *backend.conversations.lock().unwrap() = vec![conversation("c1", None)];

        let rx = messenger.connection.subscribe();
        let runner = {
            let messenger = messenger.clone();
            tokio::spawn(async move { messenger.run(rx).await })
        };
        transport.push(PushEvent::RefreshConversationList);

        tokio::time::timeout(Duration::from_secs(1), async {
            while messenger.view().await.conversations().items().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        runner.abort();
    }
}
