use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use snafu::{Snafu, ensure};
use tokio::sync::{broadcast, watch};

use super::message::{Message, MessageId, MessagePatch};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("message {id} already exists on `{stage}`"))]
    DuplicateId { stage: &'static str, id: MessageId },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Change notifications, delivered in mutation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Appended(MessageId),
    Updated(MessageId),
    Reset { epoch: u64 },
}

struct StoreState {
    messages: Vec<Message>,
    epoch: u64,
}

struct StoreInner {
    state: Mutex<StoreState>,
    next_id: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
    epoch_tx: watch::Sender<u64>,
}

/// Ordered message list shared by the dispatcher, orchestrators and the renderer.
///
/// Each mutation is atomic with respect to the others. Writers that captured an epoch before
/// a [`ConversationStore::reset`] are ignored afterwards.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (epoch_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    messages: Vec::new(),
                    epoch: 0,
                }),
                next_id: AtomicU64::new(1),
                events,
                epoch_tx,
            }),
        }
    }

    /// Hands out a fresh id. Ids are never reused, not even across resets.
    pub fn allocate_id(&self) -> MessageId {
        MessageId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    pub fn epoch_guard(&self) -> EpochGuard {
        let state = self.inner.state.lock();
        EpochGuard {
            epoch: state.epoch,
            receiver: self.inner.epoch_tx.subscribe(),
        }
    }

    /// Scoped writer for one message, bound to the current epoch.
    pub fn handle(&self, id: MessageId) -> MessageHandle {
        self.handle_in_epoch(id, self.epoch())
    }

    pub fn handle_in_epoch(&self, id: MessageId, epoch: u64) -> MessageHandle {
        MessageHandle {
            store: self.clone(),
            id,
            epoch,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn append(&self, message: Message) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let epoch = state.epoch;
        self.append_locked(&mut state, epoch, message).map(|_| ())
    }

    /// Appends unless the epoch moved on. Returns whether the message was stored.
    pub fn append_in_epoch(&self, epoch: u64, message: Message) -> StoreResult<bool> {
        let mut state = self.inner.state.lock();
        self.append_locked(&mut state, epoch, message)
    }

    fn append_locked(
        &self,
        state: &mut StoreState,
        epoch: u64,
        message: Message,
    ) -> StoreResult<bool> {
        if state.epoch != epoch {
            tracing::debug!(id = %message.id, epoch, current = state.epoch, "dropping stale append");
            return Ok(false);
        }
        let id = message.id;
        ensure!(
            !state.messages.iter().any(|existing| existing.id == id),
            DuplicateIdSnafu {
                stage: "append-message",
                id,
            }
        );

        state.messages.push(message);
        // Sent under the lock so observers see events in mutation order.
        let _ = self.inner.events.send(StoreEvent::Appended(id));
        Ok(true)
    }

    /// Merges into an existing message, or appends a model response built from the patch.
    pub fn upsert(&self, id: MessageId, patch: MessagePatch) {
        let mut state = self.inner.state.lock();
        let epoch = state.epoch;
        self.upsert_locked(&mut state, epoch, id, patch);
    }

    /// Upsert that is a no-op once the store has been reset past `epoch`.
    pub fn upsert_in_epoch(&self, epoch: u64, id: MessageId, patch: MessagePatch) -> bool {
        let mut state = self.inner.state.lock();
        self.upsert_locked(&mut state, epoch, id, patch)
    }

    fn upsert_locked(
        &self,
        state: &mut StoreState,
        epoch: u64,
        id: MessageId,
        patch: MessagePatch,
    ) -> bool {
        if state.epoch != epoch {
            tracing::debug!(%id, epoch, current = state.epoch, "dropping stale upsert");
            return false;
        }

        match state.messages.iter_mut().find(|message| message.id == id) {
            Some(message) => {
                message.apply(patch);
                let _ = self.inner.events.send(StoreEvent::Updated(id));
            }
            None => {
                let mut message = Message::response(id);
                message.apply(patch);
                state.messages.push(message);
                let _ = self.inner.events.send(StoreEvent::Appended(id));
            }
        }
        true
    }

    /// Clears every message and invalidates all outstanding epoch guards.
    pub fn reset(&self) -> u64 {
        let mut state = self.inner.state.lock();
        state.messages.clear();
        state.epoch += 1;
        let epoch = state.epoch;
        self.inner.epoch_tx.send_replace(epoch);
        let _ = self.inner.events.send(StoreEvent::Reset { epoch });
        tracing::info!(epoch, "conversation reset");
        epoch
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.state.lock().messages.clone()
    }

    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.inner
            .state
            .lock()
            .messages
            .iter()
            .find(|message| message.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Observes whether the epoch captured at creation is still current.
pub struct EpochGuard {
    epoch: u64,
    receiver: watch::Receiver<u64>,
}

impl EpochGuard {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        *self.receiver.borrow() == self.epoch
    }

    /// Resolves once the store has been reset past the captured epoch.
    pub async fn invalidated(&mut self) {
        while self.is_current() {
            if self.receiver.changed().await.is_err() {
                // Store dropped; nothing can reset it anymore.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Writes to one message for as long as its epoch is current.
#[derive(Clone)]
pub struct MessageHandle {
    store: ConversationStore,
    id: MessageId,
    epoch: u64,
}

impl MessageHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Applies the patch; returns `false` when the conversation was reset in between.
    pub fn update(&self, patch: MessagePatch) -> bool {
        self.store.upsert_in_epoch(self.epoch, self.id, patch)
    }
}
