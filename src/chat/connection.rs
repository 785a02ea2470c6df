// Channel management for MessageReconciler
// Contains open, close and the task that pumps push events into the log

use futures_util::StreamExt; // For next() on the event stream
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::AbortHandle;

use super::{notify, EventStream, MessageReconciler, ReconcilerEvent, ReconcilerState};
use crate::error::{ChatError, ChatResult};

impl MessageReconciler {
    /// Bind to `room_id`: release any previous channel, reset the log and
    /// subscribe to a fresh push stream.
    ///
    /// Without a caller identity nothing changes and `Auth` is returned. If the
    /// subscription fails the reconciler ends up closed with an empty log. If
    /// another open or a close lands while subscribing, the new stream is dropped
    /// and `StaleOperation` is returned; the later call decides the state.
    pub async fn open(&self, room_id: &str) -> ChatResult<()> {
        if self.identity.current_user_id().is_none() {
            warn!("Not opening room {}: no signed-in user", room_id);
            return Err(ChatError::Auth("not signed in".to_string()));
        }
        if room_id.trim().is_empty() {
            return Err(ChatError::Validation("room id cannot be empty".to_string()));
        }

        let epoch = {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.release() {
                info!("Leaving room {} to open {}", previous, room_id);
            }
            state.log.clear();
            state.room_id = Some(room_id.to_string());
            state.epoch
        };

        info!("Opening room {}", room_id);
        let subscription = self.transport.subscribe(room_id).await;

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            // Closed or rebound while subscribing; dropping the stream releases it
            debug!("Room {} superseded during subscribe", room_id);
            return Err(ChatError::StaleOperation(room_id.to_string()));
        }

        match subscription {
            Ok(events) => {
                let channel = tokio::spawn(run_channel(
                    self.state.clone(),
                    self.notify_tx.clone(),
                    room_id.to_string(),
                    epoch,
                    events,
                ));
                self.set_pump(Some(channel.abort_handle()));
                state.channel = Some(channel);
                notify(&self.notify_tx, ReconcilerEvent::ChannelOpened { room_id: room_id.to_string() });
                Ok(())
            }
            Err(e) => {
                error!("Failed to subscribe to room {}: {}", room_id, e);
                state.release();
                Err(e)
            }
        }
    }

    /// Release the bound channel, if any. Safe to call repeatedly. In-flight
    /// mutations started before the close are not merged when they complete.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        match state.release() {
            Some(room_id) => info!("Closed room {}", room_id),
            None => debug!("Close requested with no room open"),
        }
        self.set_pump(None);
    }

    fn set_pump(&self, handle: Option<AbortHandle>) {
        let mut pump = match self.pump.lock() {
            Ok(pump) => pump,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pump = handle;
    }
}

/// Apply events in delivery order until the stream fails, ends or the
/// reconciler moves to another epoch.
async fn run_channel(
    state: Arc<TokioMutex<ReconcilerState>>,
    notify_tx: mpsc::Sender<ReconcilerEvent>,
    room_id: String,
    epoch: u64,
    mut events: EventStream,
) {
    let reason = loop {
        match events.next().await {
            Some(Ok(payload)) => {
                let mut guard = state.lock().await;
                match MessageReconciler::apply_payload(&mut guard, epoch, &payload, &notify_tx) {
                    Ok(_) | Err(ChatError::MalformedEvent(_)) => {}
                    Err(e) => {
                        debug!("Channel for room {} stopping: {}", room_id, e);
                        return;
                    }
                }
            }
            Some(Err(e)) => break e,
            None => break ChatError::Network("event stream ended".to_string()),
        }
    };

    error!("Event stream for room {} failed: {}", room_id, reason);
    let mut guard = state.lock().await;
    if guard.epoch != epoch {
        return;
    }
    // This task is the bound channel; drop our own handle without aborting
    guard.channel.take();
    guard.release();
    notify(&notify_tx, ReconcilerEvent::ChannelFailed { room_id, reason });
}
