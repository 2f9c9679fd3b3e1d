/// Push connection lifecycle, tied to the authenticated identity
///
/// Exactly one connection exists per identity. Inbound events fan out to any number of
/// subscribers over a broadcast channel; connection state is published on a watch
/// channel. Transport errors only change the status, they never tear down callers.
use crate::error::{Result, SyncError};
use crate::models::{ConversationStatus, DeleteScope, Message, Notification, Session};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server-initiated events, tagged by their channel name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "newMessage", rename_all = "camelCase")]
    NewMessage {
        message: Message,
        #[serde(default)]
        conversation_status: Option<ConversationStatus>,
    },
    #[serde(rename = "conversationSeen", rename_all = "camelCase")]
    ConversationSeen {
        chat_id: String,
        seen_by: Vec<String>,
        /// The viewer the server computed this for
        user_id: String,
    },
    #[serde(rename = "messageDeleted", rename_all = "camelCase")]
    MessageDeleted {
        message_id: String,
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        delete_type: Option<DeleteScope>,
    },
    #[serde(rename = "userTyping", rename_all = "camelCase")]
    UserTyping {
        chat_id: String,
        user_id: String,
        user_name: String,
    },
    #[serde(rename = "userStoppedTyping", rename_all = "camelCase")]
    UserStoppedTyping { chat_id: String, user_id: String },
    #[serde(rename = "new_notification")]
    NewNotification(Notification),
    #[serde(rename = "notification_read", rename_all = "camelCase")]
    NotificationRead { notification_id: String },
    #[serde(rename = "refreshConversationList")]
    RefreshConversationList,
}

/// Client-initiated emissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEmit {
    #[serde(rename = "joinUserRoom")]
    JoinUserRoom(String),
    #[serde(rename = "joinConversation")]
    JoinConversation(String),
    #[serde(rename = "leaveConversation")]
    LeaveConversation(String),
    #[serde(rename = "typingStart", rename_all = "camelCase")]
    TypingStart {
        chat_id: String,
        user_id: String,
        user_name: String,
    },
    #[serde(rename = "typingStop", rename_all = "camelCase")]
    TypingStop { chat_id: String, user_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Non-fatal; the screen keeps working from REST state
    Failed(String),
}

pub type EventStream = BoxStream<'static, Result<PushEvent>>;

#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, emit: ClientEmit) -> Result<()>;
}

/// An open push connection: inbound stream plus outbound emitter
pub struct PushLink {
    pub events: EventStream,
    pub emitter: Arc<dyn Emitter>,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, session: &Session) -> Result<PushLink>;
}

struct ActiveConnection {
    id: Uuid,
    user_id: String,
    emitter: Arc<dyn Emitter>,
    reader: JoinHandle<()>,
}

pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    events: broadcast::Sender<PushEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    /// Id of the live connection; a reader whose id no longer matches stays silent
    current: Arc<StdMutex<Option<Uuid>>>,
    active: Mutex<Option<ActiveConnection>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            transport,
            events,
            status: Arc::new(status),
            current: Arc::new(StdMutex::new(None)),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Identity of the live connection, if one is open
    pub async fn connected_user(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|a| a.user_id.clone())
    }

    /// Open, replace or close the connection to match `session`
    pub async fn set_identity(&self, session: Option<&Session>) {
        let mut active = self.active.lock().await;

        if let (Some(s), Some(a)) = (session, active.as_ref()) {
            if a.user_id == s.id {
                return;
            }
        }

        if let Some(old) = active.take() {
            info!("Closing push connection {} for {}", old.id, old.user_id);
            old.reader.abort();
            set_current(&self.current, None);
            self.status.send_replace(ConnectionStatus::Disconnected);
        }

        let Some(session) = session else {
            return;
        };

        self.status.send_replace(ConnectionStatus::Connecting);
        let link = match self.transport.open(session).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Push connection error: {}", e);
                self.status.send_replace(ConnectionStatus::Failed(e.to_string()));
                return;
            }
        };

        let id = Uuid::new_v4();
        set_current(&self.current, Some(id));

        if let Err(e) = link
            .emitter
            .emit(ClientEmit::JoinUserRoom(session.id.clone()))
            .await
        {
            warn!("joinUserRoom failed: {}", e);
        }

        self.status.send_replace(ConnectionStatus::Connected);
        info!("Push connection {} open for {}", id, session.id);

        let reader = tokio::spawn(read_events(
            id,
            link.events,
            self.events.clone(),
            self.status.clone(),
            self.current.clone(),
        ));

        *active = Some(ActiveConnection {
            id,
            user_id: session.id.clone(),
            emitter: link.emitter,
            reader,
        });
    }

    pub async fn close(&self) {
        self.set_identity(None).await;
    }

    /// Keep the connection in step with an identity channel until it closes
    pub fn follow(self: &Arc<Self>, mut identity: watch::Receiver<Option<Session>>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let session = identity.borrow_and_update().clone();
                manager.set_identity(session.as_ref()).await;
                if identity.changed().await.is_err() {
                    break;
                }
            }
            manager.close().await;
        })
    }

    pub async fn emit(&self, emit: ClientEmit) -> Result<()> {
        let emitter = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.emitter.clone())
            .ok_or_else(|| SyncError::Connection("not connected".to_string()))?;
        debug!("emit {:?}", emit);
        emitter.emit(emit).await
    }
}

fn set_current(slot: &StdMutex<Option<Uuid>>, id: Option<Uuid>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = id;
}

fn is_current(slot: &StdMutex<Option<Uuid>>, id: Uuid) -> bool {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) == Some(id)
}

async fn read_events(
    id: Uuid,
    mut stream: EventStream,
    events: broadcast::Sender<PushEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    current: Arc<StdMutex<Option<Uuid>>>,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                // No subscribers is fine; nothing is mounted to care
                let _ = events.send(event);
            }
            Err(e) => warn!("Dropping malformed push event: {}", e),
        }
    }
    if is_current(&current, id) {
        info!("Push connection {} closed by server", id);
        status.send_replace(ConnectionStatus::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.reader.abort();
        }
    }
}
