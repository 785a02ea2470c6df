// Common test utilities for integration tests
// In-memory push transport and mutation API so the reconciler can be driven
// without a chat server.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use log::{debug, LevelFilter};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use koschat::chat::{EventStream, MessageApi, MessageTransport, StaticIdentity};
use koschat::{ChatError, ChatMessage, ChatResult, MessageReconciler, ReconcilerEvent};

pub const ME: &str = "tenant-1";
pub const OTHER: &str = "owner-1";

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn message(id: &str, sender: &str, content: &str) -> ChatMessage {
    ChatMessage {
        message_id: id.to_string(),
        room_id: "room-1".to_string(),
        sender_user_id: sender.to_string(),
        content: content.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        edited: false,
        deleted: false,
    }
}

pub fn payload(message: &ChatMessage) -> String {
    serde_json::to_string(message).unwrap()
}

//------------------------------------------------------------------------------
// Push transport
//------------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTransport {
    channels: Mutex<HashMap<String, mpsc::Sender<ChatResult<String>>>>,
    subscriptions: AtomicUsize,
    refuse: Mutex<Option<ChatError>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next subscribe call fail.
    pub fn refuse_next(&self, error: ChatError) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    /// Hold the next subscribe call until the returned sender fires.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn sender(&self, room_id: &str) -> mpsc::Sender<ChatResult<String>> {
        self.channels
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_else(|| panic!("no subscription for {}", room_id))
    }

    /// Deliver a raw payload on the latest subscription for the room.
    pub async fn push_raw(&self, room_id: &str, raw: &str) {
        // The receiver may already be gone when the room was closed
        let _ = self.sender(room_id).send(Ok(raw.to_string())).await;
    }

    pub async fn push(&self, room_id: &str, message: &ChatMessage) {
        self.push_raw(room_id, &payload(message)).await;
    }

    pub async fn fail(&self, room_id: &str, error: ChatError) {
        let _ = self.sender(room_id).send(Err(error)).await;
    }

    /// End the stream without an error.
    pub fn hang_up(&self, room_id: &str) {
        self.channels.lock().unwrap().remove(room_id);
    }

    /// Whether the reconciler still holds the receiving end for the room.
    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(room_id)
            .map_or(false, |tx| !tx.is_closed())
    }
}

#[async_trait]
impl MessageTransport for FakeTransport {
    async fn subscribe(&self, room_id: &str) -> ChatResult<EventStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let refused = self.refuse.lock().unwrap().take();
        if let Some(error) = refused {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(64);
        self.channels.lock().unwrap().insert(room_id.to_string(), tx);
        debug!("Fake subscription opened for {}", room_id);
        Ok(ReceiverStream::new(rx).boxed())
    }
}

//------------------------------------------------------------------------------
// Mutation API
//------------------------------------------------------------------------------

pub struct FakeApi {
    sender: String,
    store: Mutex<HashMap<String, ChatMessage>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    fail_next: Mutex<Option<ChatError>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeApi {
    pub fn new(sender: &str) -> Arc<Self> {
        Arc::new(Self {
            sender: sender.to_string(),
            store: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            gate: Mutex::new(None),
        })
    }

    /// Make a message known to the server so it can be edited or deleted.
    pub fn seed(&self, message: &ChatMessage) {
        self.store.lock().unwrap().insert(message.message_id.clone(), message.clone());
    }

    pub fn fail_next(&self, error: ChatError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Hold the next call until the returned sender fires.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> ChatResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let failure = self.fail_next.lock().unwrap().take();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn update(&self, message_id: &str, f: impl FnOnce(&mut ChatMessage)) -> ChatResult<ChatMessage> {
        let mut store = self.store.lock().unwrap();
        let message = store
            .get_mut(message_id)
            .ok_or_else(|| ChatError::NotFound(message_id.to_string()))?;
        f(message);
        Ok(message.clone())
    }
}

#[async_trait]
impl MessageApi for FakeApi {
    async fn create_message(&self, room_id: &str, content: &str) -> ChatResult<ChatMessage> {
        self.enter().await?;
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut created = message(&id, &self.sender, content);
        created.room_id = room_id.to_string();
        self.seed(&created);
        Ok(created)
    }

    async fn edit_message(&self, _room_id: &str, message_id: &str, content: &str) -> ChatResult<ChatMessage> {
        self.enter().await?;
        self.update(message_id, |m| {
            m.content = content.to_string();
            m.edited = true;
        })
    }

    async fn delete_message(&self, _room_id: &str, message_id: &str) -> ChatResult<ChatMessage> {
        self.enter().await?;
        self.update(message_id, |m| m.deleted = true)
    }
}

//------------------------------------------------------------------------------
// Harness
//------------------------------------------------------------------------------

pub struct Harness {
    pub reconciler: Arc<MessageReconciler>,
    pub events: mpsc::Receiver<ReconcilerEvent>,
    pub transport: Arc<FakeTransport>,
    pub api: Arc<FakeApi>,
    pub identity: Arc<StaticIdentity>,
}

pub fn harness() -> Harness {
    setup_logging();
    let transport = FakeTransport::new();
    let api = FakeApi::new(ME);
    let identity = Arc::new(StaticIdentity::signed_in(ME));
    let (reconciler, events) =
        MessageReconciler::new(transport.clone(), api.clone(), identity.clone(), 256);
    Harness {
        reconciler: Arc::new(reconciler),
        events,
        transport,
        api,
        identity,
    }
}

impl Harness {
    /// Ids in log order, without sync markers.
    pub async fn ids(&self) -> Vec<String> {
        self.reconciler
            .snapshot()
            .await
            .into_iter()
            .map(|m| m.message_id)
            .filter(|id| !id.starts_with("sync-"))
            .collect()
    }

    /// Wait for the next notification of the given shape.
    pub async fn next_event(&mut self) -> ReconcilerEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for reconciler event")
            .expect("notification channel closed")
    }

    /// Push a marker message and wait until it shows up. Everything pushed
    /// before it has been applied by then.
    pub async fn sync(&self, room_id: &str) {
        let marker = format!("sync-{}", uuid::Uuid::new_v4());
        self.transport.push(room_id, &message(&marker, OTHER, "marker")).await;
        let marker = &marker;
        let reconciler = &self.reconciler;
        wait_until(move || async move { reconciler.get(marker).await.is_some() }).await;
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 2 seconds");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
