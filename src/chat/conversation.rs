// Conversation log: messages in first-arrival order, at most one entry per message id

use std::collections::HashMap;

use crate::models::ChatMessage;

/// Result of merging one message into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New id, appended at this position
    Appended(usize),
    /// Known id, fields replaced at this position
    Replaced(usize),
    /// Known id, incoming message identical to the stored one
    Unchanged(usize),
}

impl Upsert {
    pub fn position(&self) -> usize {
        match *self {
            Upsert::Appended(i) | Upsert::Replaced(i) | Upsert::Unchanged(i) => i,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, Upsert::Unchanged(_))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
    index: HashMap<String, usize>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message with an unseen id, or replace the entry with the same id
    /// in place. Entries are never moved or removed.
    pub fn upsert(&mut self, message: ChatMessage) -> Upsert {
        if let Some(&pos) = self.index.get(&message.message_id) {
            let slot = &mut self.messages[pos];
            if *slot == message {
                return Upsert::Unchanged(pos);
            }
            *slot = message;
            Upsert::Replaced(pos)
        } else {
            let pos = self.messages.len();
            self.index.insert(message.message_id.clone(), pos);
            self.messages.push(message);
            Upsert::Appended(pos)
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&ChatMessage> {
        self.index.get(message_id).map(|&pos| &self.messages[pos])
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.index.get(message_id).copied()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }
}
