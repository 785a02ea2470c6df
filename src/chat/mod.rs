// Chat room client for koschat
// The reconciler keeps one ordered, deduplicated message log per open room and
// merges push events and mutation results into it through a single upsert path.

use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::{AbortHandle, JoinHandle};

pub mod api;
pub mod connection;
pub mod conversation;
pub mod identity;
pub mod sse;
pub mod transport;

pub use api::{HttpMessageApi, MessageApi};
pub use conversation::{ConversationLog, Upsert};
pub use identity::{IdentityProvider, StaticIdentity};
pub use transport::{EventStream, MessageTransport, SseTransport};

use crate::error::{ChatError, ChatResult};
use crate::models::ChatMessage;

/// Notifications for the display layer. Delivery is best effort: when the
/// receiver falls behind, updates are dropped and the next snapshot catches up.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerEvent {
    ChannelOpened { room_id: String },
    LogUpdated { room_id: String, message_id: String },
    ChannelFailed { room_id: String, reason: ChatError },
}

/// The message currently being edited and its original text.
#[derive(Debug, Clone, PartialEq)]
pub struct EditState {
    pub message_id: String,
    pub original: String,
}

pub(crate) struct ReconcilerState {
    /// Bumped on every open, close and channel failure. Work started under an
    /// older epoch must not touch the log.
    epoch: u64,
    /// Some while a room is open
    room_id: Option<String>,
    log: ConversationLog,
    editing: Option<EditState>,
    channel: Option<JoinHandle<()>>,
}

impl ReconcilerState {
    fn new() -> Self {
        Self {
            epoch: 0,
            room_id: None,
            log: ConversationLog::new(),
            editing: None,
            channel: None,
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.room_id.is_some()
    }

    /// Release the bound channel and move to the closed mode. The log keeps its
    /// last contents until the next open.
    fn release(&mut self) -> Option<String> {
        if let Some(channel) = self.channel.take() {
            channel.abort();
        }
        self.epoch += 1;
        self.editing = None;
        self.room_id.take()
    }
}

pub struct MessageReconciler {
    state: Arc<TokioMutex<ReconcilerState>>,
    transport: Arc<dyn MessageTransport>,
    api: Arc<dyn MessageApi>,
    identity: Arc<dyn IdentityProvider>,
    notify_tx: mpsc::Sender<ReconcilerEvent>,
    // Outside the state lock so drop can always stop the pump task
    pump: Mutex<Option<AbortHandle>>,
}

impl MessageReconciler {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        api: Arc<dyn MessageApi>,
        identity: Arc<dyn IdentityProvider>,
        notify_buffer: usize,
    ) -> (Self, mpsc::Receiver<ReconcilerEvent>) {
        let (notify_tx, notify_rx) = mpsc::channel(notify_buffer.max(1));
        (
            Self {
                state: Arc::new(TokioMutex::new(ReconcilerState::new())),
                transport,
                api,
                identity,
                notify_tx,
                pump: Mutex::new(None),
            },
            notify_rx,
        )
    }

    /// Copy of the log in display order.
    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.state.lock().await.log.messages().to_vec()
    }

    pub async fn get(&self, message_id: &str) -> Option<ChatMessage> {
        self.state.lock().await.log.get(message_id).cloned()
    }

    pub async fn room_id(&self) -> Option<String> {
        self.state.lock().await.room_id.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.room_id.is_some()
    }

    pub async fn editing(&self) -> Option<EditState> {
        self.state.lock().await.editing.clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.identity.current_user_id()
    }

    /// Apply one raw push payload to the open room. Undecodable payloads are
    /// dropped and leave the log untouched.
    pub async fn on_event(&self, payload: &str) {
        let mut state = self.state.lock().await;
        let epoch = state.epoch;
        let _ = Self::apply_payload(&mut state, epoch, payload, &self.notify_tx);
    }

    /// Apply one already decoded message to the open room.
    pub async fn apply_event(&self, message: ChatMessage) -> Option<Upsert> {
        let mut state = self.state.lock().await;
        let epoch = state.epoch;
        Self::merge(&mut state, epoch, message, &self.notify_tx).ok()
    }

    pub(crate) fn apply_payload(
        state: &mut ReconcilerState,
        epoch: u64,
        payload: &str,
        notify_tx: &mpsc::Sender<ReconcilerEvent>,
    ) -> ChatResult<Upsert> {
        let message = decode_event(payload).map_err(|e| {
            warn!("Dropping push event: {}", e);
            e
        })?;
        Self::merge(state, epoch, message, notify_tx)
    }

    /// The single merge path for push events and mutation results.
    pub(crate) fn merge(
        state: &mut ReconcilerState,
        epoch: u64,
        message: ChatMessage,
        notify_tx: &mpsc::Sender<ReconcilerEvent>,
    ) -> ChatResult<Upsert> {
        if !state.is_current(epoch) {
            let room = state.room_id.clone().unwrap_or_default();
            debug!("Discarding message {} from epoch {} (now {})", message.message_id, epoch, state.epoch);
            return Err(ChatError::StaleOperation(room));
        }

        let message_id = message.message_id.clone();
        let tombstoned = message.deleted;
        let outcome = state.log.upsert(message);

        if tombstoned && state.editing.as_ref().map_or(false, |e| e.message_id == message_id) {
            debug!("Edited message {} was deleted, leaving edit mode", message_id);
            state.editing = None;
        }

        if outcome.changed() {
            debug!("Message {} merged: {:?}", message_id, outcome);
            if let Some(room_id) = state.room_id.clone() {
                notify(notify_tx, ReconcilerEvent::LogUpdated { room_id, message_id });
            }
        }
        Ok(outcome)
    }

    /// Capture the room and epoch a mutation runs under.
    async fn mutation_scope(&self, content: Option<&str>) -> ChatResult<(String, u64)> {
        if self.identity.current_user_id().is_none() {
            return Err(ChatError::Auth("not signed in".to_string()));
        }
        if let Some(content) = content {
            validate_content(content)?;
        }
        let state = self.state.lock().await;
        let room_id = state.room_id.clone().ok_or(ChatError::NotOpen)?;
        Ok((room_id, state.epoch))
    }

    /// Merge a mutation result if the room it was issued for is still bound.
    async fn finish_mutation(&self, epoch: u64, message: ChatMessage) -> Option<ChatMessage> {
        let mut state = self.state.lock().await;
        match Self::merge(&mut state, epoch, message.clone(), &self.notify_tx) {
            Ok(_) => Some(message),
            Err(e) => {
                debug!("Mutation result not merged: {}", e);
                None
            }
        }
    }

    /// Submit a new message. The log is not touched: the created message
    /// arrives through the push channel.
    pub async fn send(&self, content: &str) -> ChatResult<ChatMessage> {
        let (room_id, _) = self.mutation_scope(Some(content)).await?;
        let created = self.api.create_message(&room_id, content.trim()).await?;
        debug!("Message {} accepted for room {}", created.message_id, room_id);
        Ok(created)
    }

    /// Edit a message. Returns the merged result, or `None` when the room was
    /// closed or rebound before the call completed.
    pub async fn edit(&self, message_id: &str, content: &str) -> ChatResult<Option<ChatMessage>> {
        let (room_id, epoch) = self.mutation_scope(Some(content)).await?;
        let updated = self.api.edit_message(&room_id, message_id, content.trim()).await?;

        let merged = self.finish_mutation(epoch, updated).await;
        if merged.is_some() {
            let mut state = self.state.lock().await;
            if state.editing.as_ref().map_or(false, |e| e.message_id == message_id) {
                state.editing = None;
            }
        }
        Ok(merged)
    }

    /// Soft-delete a message. The entry stays in the log as a tombstone.
    pub async fn delete(&self, message_id: &str) -> ChatResult<Option<ChatMessage>> {
        let (room_id, epoch) = self.mutation_scope(None).await?;
        let tombstone = self.api.delete_message(&room_id, message_id).await?;
        Ok(self.finish_mutation(epoch, tombstone).await)
    }

    /// Enter edit mode for one of the caller's own messages. Returns the text to
    /// prefill the editor with. Replaces any edit already in progress.
    pub async fn begin_edit(&self, message_id: &str) -> ChatResult<String> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or_else(|| ChatError::Auth("not signed in".to_string()))?;
        let mut state = self.state.lock().await;
        if state.room_id.is_none() {
            return Err(ChatError::NotOpen);
        }
        let message = state
            .log
            .get(message_id)
            .ok_or_else(|| ChatError::NotFound(message_id.to_string()))?;
        if message.deleted {
            return Err(ChatError::Validation("deleted messages cannot be edited".to_string()));
        }
        if !message.is_from(&user_id) {
            return Err(ChatError::Validation("only your own messages can be edited".to_string()));
        }

        let original = message.content.clone();
        state.editing = Some(EditState {
            message_id: message_id.to_string(),
            original: original.clone(),
        });
        Ok(original)
    }

    pub async fn cancel_edit(&self) -> Option<EditState> {
        self.state.lock().await.editing.take()
    }

    /// Submit the new text for the message in edit mode. On failure edit mode
    /// stays active so the caller can retry.
    pub async fn save_edit(&self, content: &str) -> ChatResult<Option<ChatMessage>> {
        let message_id = self
            .editing()
            .await
            .map(|e| e.message_id)
            .ok_or_else(|| ChatError::Validation("no message is being edited".to_string()))?;
        self.edit(&message_id, content).await
    }
}

impl Drop for MessageReconciler {
    fn drop(&mut self) {
        let pump = match self.pump.get_mut() {
            Ok(pump) => pump.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

/// Decode one push payload into a message.
pub fn decode_event(payload: &str) -> ChatResult<ChatMessage> {
    let message: ChatMessage = serde_json::from_str(payload)
        .map_err(|e| ChatError::MalformedEvent(format!("{} in {:?}", e, truncate(payload, 120))))?;
    if message.message_id.is_empty() {
        return Err(ChatError::MalformedEvent("empty messageId".to_string()));
    }
    Ok(message)
}

pub fn validate_content(content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::Validation("message content cannot be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn notify(notify_tx: &mpsc::Sender<ReconcilerEvent>, event: ReconcilerEvent) {
    // Never block while holding the state lock
    if let Err(e) = notify_tx.try_send(event) {
        debug!("Dropped reconciler notification: {}", e);
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
