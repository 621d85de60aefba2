//! Per-chat conversation sessions.
//!
//! Every chat has at most one `Session`: its position inside exactly one
//! active flow. The store hands out one slot per chat behind its own async
//! mutex, so a chat's updates are serialized on that slot while different
//! chats never wait on each other.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChatId,
    flows::{FlowDefinition, FlowKind, Step},
    messaging::types::FileRef,
};

/// A value captured by one step.
#[derive(Clone, Debug, PartialEq)]
pub enum CapturedValue {
    Text(String),
    File {
        file: FileRef,
        file_name: Option<String>,
    },
}

impl CapturedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CapturedValue::Text(s) => Some(s),
            CapturedValue::File { .. } => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            CapturedValue::Text(_) => None,
            CapturedValue::File { file, .. } => Some(file),
        }
    }
}

pub type Captured = BTreeMap<String, CapturedValue>;

#[derive(Clone, Debug)]
pub struct Session {
    chat_id: ChatId,
    flow: FlowKind,
    step: usize,
    captured: Captured,
    started_at: Instant,
    touched_at: Instant,
}

impl Session {
    /// A fresh session at the first step of `flow`.
    pub fn start(chat_id: ChatId, flow: FlowKind) -> Self {
        let now = Instant::now();
        Self {
            chat_id,
            flow,
            step: 0,
            captured: Captured::new(),
            started_at: now,
            touched_at: now,
        }
    }

    /// Start with some fields already known (e.g. the poll kind picked by a button).
    pub fn start_with(chat_id: ChatId, flow: FlowKind, captured: Captured) -> Self {
        Self {
            captured,
            ..Self::start(chat_id, flow)
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn flow(&self) -> FlowKind {
        self.flow
    }

    pub fn definition(&self) -> &'static FlowDefinition {
        self.flow.definition()
    }

    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn current_step(&self) -> &'static Step {
        // `step` only ever moves through `advance`, which stops at the last index.
        &self.definition().steps[self.step]
    }

    pub fn is_last_step(&self) -> bool {
        self.step + 1 >= self.definition().steps.len()
    }

    pub fn captured(&self) -> &Captured {
        &self.captured
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.captured.get(field).and_then(|v| v.as_text())
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Record the value of the current step.
    pub fn capture(&mut self, value: CapturedValue) {
        let field = self.current_step().field.to_string();
        self.captured.insert(field, value);
        self.touched_at = Instant::now();
    }

    /// Move to the next step. Returns `false` (and stays put) on the last step.
    pub fn advance(&mut self) -> bool {
        if self.is_last_step() {
            return false;
        }
        self.step += 1;
        self.touched_at = Instant::now();
        true
    }

    pub fn is_expired(&self, idle_timeout: Option<Duration>, now: Instant) -> bool {
        match idle_timeout {
            Some(t) => now.saturating_duration_since(self.touched_at) >= t,
            None => false,
        }
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

/// In-memory session store keyed by chat id.
///
/// Nothing is persisted; a restart drops in-flight flows.
pub struct SessionStore {
    idle_timeout: Option<Duration>,
    slots: Mutex<HashMap<ChatId, Slot>>,
}

impl SessionStore {
    /// `idle_timeout = None` keeps sessions until they finish.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Exclusive access to one chat's slot. Held for the whole handling of
    /// an update, which is what serializes a chat's updates.
    pub async fn lock(&self, chat_id: ChatId) -> SessionSlot {
        let slot = {
            let mut map = self.slots.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };
        SessionSlot {
            guard: slot.lock_owned().await,
            idle_timeout: self.idle_timeout,
        }
    }

    pub async fn get(&self, chat_id: ChatId) -> Option<Session> {
        let mut slot = self.lock(chat_id).await;
        slot.get().cloned()
    }

    /// Replace whatever session the chat had.
    pub async fn put(&self, session: Session) {
        let mut slot = self.lock(session.chat_id()).await;
        slot.put(session);
    }

    pub async fn remove(&self, chat_id: ChatId) -> Option<Session> {
        let mut slot = self.lock(chat_id).await;
        slot.take()
    }

    /// Number of live (non-expired) sessions. Busy slots count as live.
    pub async fn active_count(&self) -> usize {
        let now = Instant::now();
        let map = self.slots.lock().await;
        map.values()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard
                    .as_ref()
                    .map(|s| !s.is_expired(self.idle_timeout, now))
                    .unwrap_or(false),
                Err(_) => true,
            })
            .count()
    }

    /// Drop expired sessions and forget empty slots nobody is holding.
    /// Returns how many sessions were dropped. Busy slots are skipped.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0usize;
        let mut map = self.slots.lock().await;

        map.retain(|chat_id, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if guard
                .as_ref()
                .map(|s| s.is_expired(self.idle_timeout, now))
                .unwrap_or(false)
            {
                if let Some(s) = guard.take() {
                    tracing::info!(
                        chat_id = chat_id.0,
                        flow = s.flow().name(),
                        step = s.step_index(),
                        age_secs = now.saturating_duration_since(s.started_at()).as_secs(),
                        "dropping idle session"
                    );
                }
                dropped += 1;
            }
            let empty = guard.is_none();
            drop(guard);
            // Only the map holds a reference: nobody is waiting on this slot.
            !(empty && Arc::strong_count(slot) == 1)
        });

        dropped
    }

    /// Periodic `sweep_expired` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = tick.tick() => {
                    let n = self.sweep_expired().await;
                    if n > 0 {
                        let active = self.active_count().await;
                        tracing::info!(dropped = n, active, "session sweep");
                    }
                  }
                }
            }
        })
    }
}

/// Locked view of one chat's session slot.
pub struct SessionSlot {
    guard: OwnedMutexGuard<Option<Session>>,
    idle_timeout: Option<Duration>,
}

impl SessionSlot {
    /// The live session, if any. An expired session is dropped silently here.
    pub fn get(&mut self) -> Option<&Session> {
        self.expire_if_idle();
        self.guard.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Session> {
        self.expire_if_idle();
        self.guard.as_mut()
    }

    pub fn is_active(&mut self) -> bool {
        self.get().is_some()
    }

    pub fn put(&mut self, session: Session) {
        *self.guard = Some(session);
    }

    pub fn take(&mut self) -> Option<Session> {
        self.guard.take()
    }

    fn expire_if_idle(&mut self) {
        let expired = self
            .guard
            .as_ref()
            .map(|s| s.is_expired(self.idle_timeout, Instant::now()))
            .unwrap_or(false);
        if expired {
            if let Some(s) = self.guard.take() {
                tracing::debug!(
                    chat_id = s.chat_id().0,
                    flow = s.flow().name(),
                    "session expired on access"
                );
            }
        }
    }
}
