/// Message history of the selected conversation
///
/// Every selection bumps a generation counter. A history response carries the ticket it
/// was requested with and is dropped if the selection moved on in the meantime.
use crate::models::{DeleteScope, LoadState, Message};

/// Proof of which selection a history request belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    chat_id: String,
}

impl LoadTicket {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    chat_id: Option<String>,
    generation: u64,
    messages: Vec<Message>,
    state: LoadState,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Switch to `chat_id`, clearing the list, and hand out the ticket for its history load
    pub fn select(&mut self, chat_id: &str) -> LoadTicket {
        self.generation += 1;
        self.chat_id = Some(chat_id.to_string());
        self.messages.clear();
        self.state = LoadState::Loading;
        LoadTicket {
            generation: self.generation,
            chat_id: chat_id.to_string(),
        }
    }

    /// Deselect; any in-flight load becomes stale
    pub fn clear(&mut self) {
        self.generation += 1;
        self.chat_id = None;
        self.messages.clear();
        self.state = LoadState::Idle;
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Apply a history response. Returns false when the ticket is stale and nothing changed.
    pub fn finish_load(&mut self, ticket: &LoadTicket, result: Result<Vec<Message>, String>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        match result {
            Ok(history) => {
                // Live pushes that arrived while the load was in flight are kept
                let live: Vec<Message> = std::mem::take(&mut self.messages)
                    .into_iter()
                    .filter(|m| !history.iter().any(|h| h.id == m.id))
                    .collect();
                self.messages = history;
                self.messages.extend(live);
                self.state = LoadState::Ready;
            }
            Err(msg) => self.state = LoadState::Failed(msg),
        }
        true
    }

    /// Append unless the id is already present or the message belongs elsewhere
    pub fn apply_new_message(&mut self, message: &Message) -> bool {
        if self.chat_id.as_deref() != Some(message.chat_id()) {
            return false;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message.clone());
        true
    }

    /// Turn the message into a tombstone for the given scope
    pub fn apply_deleted(&mut self, message_id: &str, scope: DeleteScope) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(msg) => {
                // An everyone-delete is permanent and wins over a local hide
                if scope == DeleteScope::SelfOnly && msg.deletion.is_deleted() {
                    return true;
                }
                msg.tombstone(scope);
                true
            }
            None => false,
        }
    }
}
