/// Typing presence: who is typing in the open conversation, and our own typing signals
use crate::connection::{ClientEmit, ConnectionManager};
use crate::debounce::Debouncer;
use crate::models::Session;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Ephemeral user -> display name map, scoped to one conversation
#[derive(Debug, Default)]
pub struct TypingTracker {
    chat_id: Option<String>,
    users: BTreeMap<String, String>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the map and scope it to `chat_id` (or nothing)
    pub fn reset(&mut self, chat_id: Option<&str>) {
        self.chat_id = chat_id.map(str::to_string);
        self.users.clear();
    }

    pub fn on_user_typing(&mut self, chat_id: &str, user_id: &str, name: &str) -> bool {
        if self.chat_id.as_deref() != Some(chat_id) {
            return false;
        }
        self.users.insert(user_id.to_string(), name.to_string());
        true
    }

    pub fn on_user_stopped(&mut self, chat_id: &str, user_id: &str) -> bool {
        if self.chat_id.as_deref() != Some(chat_id) {
            return false;
        }
        self.users.remove(user_id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.users.values().map(String::as_str).collect()
    }

    /// "Ana is typing..." / "Ana, Bo are typing..."
    pub fn describe(&self) -> Option<String> {
        if self.users.is_empty() {
            return None;
        }
        let verb = if self.users.len() == 1 { "is" } else { "are" };
        Some(format!("{} {} typing...", self.names().join(", "), verb))
    }
}

/// Emits `typingStart` on the first keystroke and `typingStop` once input goes idle
pub struct TypingEmitter {
    connection: Arc<ConnectionManager>,
    typing: Arc<AtomicBool>,
    idle: Debouncer<ClientEmit>,
}

impl TypingEmitter {
    pub fn new(connection: Arc<ConnectionManager>, idle_delay: Duration) -> Self {
        let typing = Arc::new(AtomicBool::new(false));
        let idle = {
            let connection = connection.clone();
            let typing = typing.clone();
            Debouncer::new(idle_delay, move |stop: ClientEmit| {
                let connection = connection.clone();
                let typing = typing.clone();
                async move {
                    if typing.swap(false, Ordering::SeqCst) {
                        send(&connection, stop).await;
                    }
                }
                .boxed()
            })
        };
        Self {
            connection,
            typing,
            idle,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::SeqCst)
    }

    /// Feed the current input text after each keystroke
    pub async fn input(&self, chat_id: &str, me: &Session, text: &str) {
        if text.trim().is_empty() {
            self.stop(chat_id, me).await;
            return;
        }
        if !self.typing.swap(true, Ordering::SeqCst) {
            send(
                &self.connection,
                ClientEmit::TypingStart {
                    chat_id: chat_id.to_string(),
                    user_id: me.id.clone(),
                    user_name: me.display_name().to_string(),
                },
            )
            .await;
        }
        self.idle.call(ClientEmit::TypingStop {
            chat_id: chat_id.to_string(),
            user_id: me.id.clone(),
        });
    }

    /// Blur, send or cleared input: stop immediately
    pub async fn stop(&self, chat_id: &str, me: &Session) {
        self.idle.cancel();
        if self.typing.swap(false, Ordering::SeqCst) {
            send(
                &self.connection,
                ClientEmit::TypingStop {
                    chat_id: chat_id.to_string(),
                    user_id: me.id.clone(),
                },
            )
            .await;
        }
    }
}

async fn send(connection: &ConnectionManager, emit: ClientEmit) {
    if let Err(e) = connection.emit(emit).await {
        warn!("Typing signal not sent: {}", e);
    }
}
