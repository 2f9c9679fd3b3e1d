/// Conversation list reconciliation
///
/// Reverse-chronological by latest activity: every new message moves its conversation to
/// the front. All operations are idempotent under duplicate delivery.
use crate::models::{Conversation, ConversationStatus, LoadState, Message};

#[derive(Debug, Default)]
pub struct ConversationStore {
    items: Vec<Conversation>,
    state: LoadState,
    generation: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id() == id)
    }

    /// Start a reload; the returned generation must accompany its response
    pub fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.state = LoadState::Loading;
        self.generation
    }

    /// Replace wholesale; a failure keeps the current list and records the error text.
    /// Returns false when a newer reload superseded this response.
    pub fn finish_load(&mut self, generation: u64, result: Result<Vec<Conversation>, String>) -> bool {
        if generation != self.generation {
            return false;
        }
        match result {
            Ok(items) => {
                self.items = items;
                self.state = LoadState::Ready;
            }
            Err(msg) => self.state = LoadState::Failed(msg),
        }
        true
    }

    /// Move the message's conversation to the front with the message as its summary
    pub fn apply_new_message(&mut self, message: &Message, status: Option<&ConversationStatus>) {
        let chat_id = message.chat_id();
        let existing = self
            .items
            .iter()
            .position(|c| c.id() == chat_id)
            .map(|pos| self.items.remove(pos));

        // Keep known metadata when the push only carried the chat id
        let chat = match existing {
            Some(prev) if message.chat.is_bare() => prev.chat,
            _ => message.chat.clone(),
        };
        let status = status.cloned().unwrap_or_default();

        self.items.insert(
            0,
            Conversation {
                chat,
                last_message: Some(message.clone()),
                seen_by: status.seen_by,
                has_new_messages: status.has_new_messages,
            },
        );
    }

    /// Returns false when the conversation is not in the list
    pub fn apply_seen(&mut self, chat_id: &str, seen_by: &[String], viewer_id: &str) -> bool {
        match self.items.iter_mut().find(|c| c.id() == chat_id) {
            Some(conv) => {
                conv.seen_by = seen_by.to_vec();
                conv.has_new_messages = !seen_by.iter().any(|id| id == viewer_id);
                true
            }
            None => false,
        }
    }

    /// Clear the denormalized summary of any conversation whose last message was deleted
    pub fn apply_message_deleted(&mut self, message_id: &str) {
        for conv in &mut self.items {
            if conv.last_message.as_ref().is_some_and(|m| m.id == message_id) {
                conv.last_message = None;
            }
        }
    }

    /// Viewer opened the conversation; drop the unread marker locally
    pub fn mark_seen_locally(&mut self, chat_id: &str, viewer_id: &str) {
        if let Some(conv) = self.items.iter_mut().find(|c| c.id() == chat_id) {
            if !conv.seen_by.iter().any(|id| id == viewer_id) {
                conv.seen_by.push(viewer_id.to_string());
            }
            conv.has_new_messages = false;
        }
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|c| c.has_new_messages).count()
    }
}
