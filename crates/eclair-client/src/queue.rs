//! Offline-resilient delivery queue.
//!
//! Every outbound snap is persisted the moment it is enqueued and stays in
//! the `delivery_queue` record until the backend confirms it.  Each entry
//! walks the state machine
//!
//! ```text
//! queued -> uploadingMedia -> sendingMetadata -> sent
//!                 |                  |
//!                 +--> retryPending -+--> queued      (transient, budget left)
//!                 +--> failedTerminal                 (permanent or exhausted)
//! ```
//!
//! Workers are bounded by a semaphore.  An entry is claimed under the
//! queue lock, which also marks its receiver busy: messages to one receiver
//! go out strictly in enqueue order while different receivers proceed in
//! parallel.
//!
//! Failures never escape as errors.  They become state transitions plus,
//! for terminal failures, a single `messageFailed` event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use eclair_shared::types::MediaRef;
use eclair_shared::{MediaKind, TransportError, VisibilityMode};
use eclair_store::{DeliveryStatus, QueuedMessage};

use crate::backend::{BackendTransport, OutgoingMetadata};
use crate::bus::{EventBus, Subscription};
use crate::error::QueueError;
use crate::events::{
    BusEvent, MessageFailedPayload, MessageQueuedPayload, MessageSentPayload,
    TOPIC_APP_RETURNED_FROM_BACKGROUND, TOPIC_CONNECTIVITY_CHANGED,
};
use crate::retry::RetryPolicy;
use crate::state::{lock, SharedDatabase};

/// What the compose flow hands to [`DeliveryQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub receiver_id: String,
    pub local_media_ref: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    pub visibility_mode: VisibilityMode,
    pub caption_text: Option<String>,
}

impl MessageDraft {
    pub fn new(receiver_id: impl Into<String>, media: MediaRef) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            local_media_ref: media.local_media_ref,
            media_kind: media.media_kind,
            size_bytes: media.size_bytes,
            visibility_mode: VisibilityMode::default(),
            caption_text: None,
        }
    }

    pub fn with_visibility(mut self, mode: VisibilityMode) -> Self {
        self.visibility_mode = mode;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        self.caption_text = if caption.trim().is_empty() { None } else { Some(caption) };
        self
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.receiver_id.trim().is_empty() {
            return Err(QueueError::InvalidDraft("receiver id is empty".into()));
        }
        if self.local_media_ref.trim().is_empty() {
            return Err(QueueError::InvalidDraft("media reference is empty".into()));
        }
        Ok(())
    }
}

/// Result of one [`DeliveryQueue::process_next`] step.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Sent { temp_id: Uuid, server_id: String },
    RetryScheduled { temp_id: Uuid, attempt: u32, delay: Duration },
    Failed { temp_id: Uuid, reason: String },
}

impl ProcessOutcome {
    pub fn temp_id(&self) -> Uuid {
        match self {
            Self::Sent { temp_id, .. }
            | Self::RetryScheduled { temp_id, .. }
            | Self::Failed { temp_id, .. } => *temp_id,
        }
    }
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueuedMessage>,
    busy_receivers: HashSet<String>,
    sender_id: Option<String>,
    wakeup: Option<(chrono::DateTime<Utc>, JoinHandle<()>)>,
}

struct QueueInner {
    db: SharedDatabase,
    bus: EventBus,
    transport: Arc<dyn BackendTransport>,
    policy: RetryPolicy,
    concurrency: usize,
    state: Mutex<QueueState>,
    workers: Semaphore,
    online: AtomicBool,
    auto_drain: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Cloneable handle on the process-wide delivery queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Load the persisted queue.
    ///
    /// Entries a previous process left in `uploadingMedia` or
    /// `sendingMetadata` were abandoned mid-flight and go back to `queued`.
    pub fn new(
        db: SharedDatabase,
        bus: EventBus,
        transport: Arc<dyn BackendTransport>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Result<Self, QueueError> {
        let mut entries = lock(&db).load_queue()?;

        let mut recovered = 0;
        for entry in entries.iter_mut().filter(|e| e.status.is_in_flight()) {
            entry.status = DeliveryStatus::Queued;
            recovered += 1;
        }
        if recovered > 0 {
            lock(&db).save_queue(&entries)?;
            info!(recovered, "interrupted deliveries reset to queued");
        }
        debug!(entries = entries.len(), "delivery queue loaded");

        let concurrency = concurrency.max(1);
        Ok(Self {
            inner: Arc::new(QueueInner {
                db,
                bus,
                transport,
                policy,
                concurrency,
                state: Mutex::new(QueueState {
                    entries,
                    ..QueueState::default()
                }),
                workers: Semaphore::new(concurrency),
                online: AtomicBool::new(true),
                auto_drain: AtomicBool::new(true),
                subscriptions: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Set the signed-in sender.  Entries of other accounts stay persisted
    /// but are not processed.
    pub fn set_sender(&self, sender_id: Option<String>) {
        lock(&self.inner.state).sender_id = sender_id;
        self.kick();
    }

    /// Persist a new outbound message and announce it optimistically.
    ///
    /// Returns the `temp_id` the UI keys the pending bubble on.  Delivery
    /// starts in the background when a runtime is available.
    pub fn enqueue(&self, draft: MessageDraft) -> Result<Uuid, QueueError> {
        if self.inner.workers.is_closed() {
            return Err(QueueError::ShutDown);
        }
        draft.validate()?;

        let entry = {
            let mut state = lock(&self.inner.state);
            let sender_id = state.sender_id.clone().ok_or(QueueError::NoIdentity)?;

            let entry = QueuedMessage {
                temp_id: Uuid::new_v4(),
                receiver_id: draft.receiver_id,
                sender_id,
                local_media_ref: draft.local_media_ref,
                media_kind: draft.media_kind,
                size_bytes: draft.size_bytes,
                visibility_mode: draft.visibility_mode,
                caption_text: draft.caption_text,
                status: DeliveryStatus::Queued,
                attempt: 0,
                created_at: Utc::now(),
                server_id: None,
                media_url: None,
                next_attempt_at: None,
                jitter: RetryPolicy::draw_jitter(),
                last_error: None,
            };

            state.entries.push(entry.clone());
            if let Err(e) = lock(&self.inner.db).save_queue(&state.entries) {
                state.entries.pop();
                error!(error = %e, "failed to persist queued message");
                return Err(e.into());
            }
            entry
        };

        info!(temp_id = %entry.temp_id, receiver = %entry.receiver_id, "message queued");
        self.inner
            .bus
            .publish(BusEvent::MessageQueued(MessageQueuedPayload::from(&entry)));
        self.kick();

        Ok(entry.temp_id)
    }

    /// Deliver the oldest due entry.
    ///
    /// Returns `None` when offline, shut down, or when nothing is currently
    /// eligible.  Running it again after a message reached `sent` is a
    /// no-op for that message.
    pub async fn process_next(&self) -> Option<ProcessOutcome> {
        if !self.is_online() {
            return None;
        }
        let _permit = self.inner.workers.acquire().await.ok()?;
        let claim = self.inner.claim_next()?;
        Some(self.inner.deliver(claim).await)
    }

    /// Drain everything currently due with up to `concurrency` workers, then
    /// arm a wake-up for the earliest pending retry.
    pub async fn run_pending(&self) -> usize {
        if !self.is_online() || self.inner.workers.is_closed() {
            return 0;
        }

        let mut workers = JoinSet::new();
        for _ in 0..self.inner.concurrency {
            let queue = self.clone();
            workers.spawn(async move {
                let mut processed = 0usize;
                while queue.process_next().await.is_some() {
                    processed += 1;
                }
                processed
            });
        }

        let mut total = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(processed) => total += processed,
                Err(e) => error!(error = %e, "delivery worker failed"),
            }
        }

        if total > 0 {
            debug!(processed = total, "delivery drain finished");
        }
        self.arm_wakeup();
        total
    }

    /// Start a background drain if a runtime is available.
    pub fn kick(&self) {
        if !self.inner.auto_drain.load(Ordering::Acquire) || !self.is_online() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    queue.run_pending().await;
                });
            }
            Err(_) => debug!("no async runtime, delivery drain deferred"),
        }
    }

    /// Disable or re-enable background draining.  With it disabled, only
    /// explicit [`process_next`](Self::process_next) and
    /// [`run_pending`](Self::run_pending) calls deliver.
    pub fn set_auto_drain(&self, enabled: bool) {
        self.inner.auto_drain.store(enabled, Ordering::Release);
    }

    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::AcqRel);
        if was != online {
            info!(online, "delivery connectivity changed");
        }
        if online {
            self.kick();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn get(&self, temp_id: Uuid) -> Option<QueuedMessage> {
        lock(&self.inner.state)
            .entries
            .iter()
            .find(|e| e.temp_id == temp_id)
            .cloned()
    }

    /// Every entry still owned by the queue, in enqueue order.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        lock(&self.inner.state).entries.clone()
    }

    /// Entries not yet in a terminal state.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state)
            .entries
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count()
    }

    /// Give a `failedTerminal` message a fresh retry budget.
    pub fn retry_failed(&self, temp_id: Uuid) -> Result<(), QueueError> {
        {
            let mut state = lock(&self.inner.state);
            let entry = state
                .entries
                .iter_mut()
                .find(|e| e.temp_id == temp_id)
                .ok_or(QueueError::UnknownMessage(temp_id))?;

            if entry.status != DeliveryStatus::FailedTerminal {
                return Err(QueueError::InvalidTransition {
                    temp_id,
                    from: entry.status,
                    to: DeliveryStatus::Queued,
                });
            }
            entry.status = DeliveryStatus::Queued;
            entry.attempt = 0;
            entry.next_attempt_at = None;
            entry.last_error = None;

            lock(&self.inner.db).save_queue(&state.entries)?;
        }

        info!(temp_id = %temp_id, "failed message requeued");
        self.kick();
        Ok(())
    }

    /// Remove a message that is not currently being delivered.
    pub fn discard(&self, temp_id: Uuid) -> Result<QueuedMessage, QueueError> {
        let mut state = lock(&self.inner.state);
        let idx = state
            .entries
            .iter()
            .position(|e| e.temp_id == temp_id)
            .ok_or(QueueError::UnknownMessage(temp_id))?;

        if state.entries[idx].status.is_in_flight() {
            return Err(QueueError::Busy(temp_id));
        }

        let removed = state.entries.remove(idx);
        if let Err(e) = lock(&self.inner.db).save_queue(&state.entries) {
            state.entries.insert(idx, removed);
            return Err(e.into());
        }

        info!(temp_id = %temp_id, "queued message discarded");
        Ok(removed)
    }

    /// Re-scan on connectivity restore and on return to foreground.
    pub fn attach(&self, bus: &EventBus) {
        let weak = Arc::downgrade(&self.inner);
        let on_connectivity = bus.subscribe(TOPIC_CONNECTIVITY_CHANGED, move |event| {
            if let (Some(inner), BusEvent::ConnectivityChanged(change)) = (weak.upgrade(), event) {
                DeliveryQueue { inner }.set_online(change.online);
            }
            Ok(())
        });

        let weak = Arc::downgrade(&self.inner);
        let on_foreground = bus.subscribe(TOPIC_APP_RETURNED_FROM_BACKGROUND, move |_| {
            if let Some(inner) = weak.upgrade() {
                DeliveryQueue { inner }.kick();
            }
            Ok(())
        });

        let previous = std::mem::replace(
            &mut *lock(&self.inner.subscriptions),
            vec![on_connectivity, on_foreground],
        );
        drop(previous);
    }

    pub fn detach(&self) {
        let previous = std::mem::take(&mut *lock(&self.inner.subscriptions));
        drop(previous);
    }

    /// Stop accepting work.  Persisted entries are untouched and resume on
    /// the next launch.
    pub fn shutdown(&self) {
        self.inner.workers.close();
        self.detach();
        if let Some((_, handle)) = lock(&self.inner.state).wakeup.take() {
            handle.abort();
        }
        info!("delivery queue shut down");
    }

    fn arm_wakeup(&self) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        if !self.inner.auto_drain.load(Ordering::Acquire) {
            return;
        }

        let mut state = lock(&self.inner.state);
        let sender = state.sender_id.clone();
        let earliest = state
            .entries
            .iter()
            .filter(|e| e.status == DeliveryStatus::RetryPending)
            .filter(|e| sender.as_deref() == Some(e.sender_id.as_str()))
            .filter_map(|e| e.next_attempt_at)
            .min();

        let Some(due_at) = earliest else {
            return;
        };
        if let Some((armed_at, timer)) = &state.wakeup {
            if *armed_at <= due_at && !timer.is_finished() {
                return;
            }
        }

        let delay = (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let timer = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = lock(&inner.state);
                if matches!(state.wakeup, Some((at, _)) if at == due_at) {
                    state.wakeup = None;
                }
            }
            DeliveryQueue { inner }.run_pending().await;
        });

        debug!(delay_ms = delay.as_millis() as u64, "retry wake-up armed");
        if let Some((_, old)) = state.wakeup.replace((due_at, timer)) {
            old.abort();
        }
    }
}

/// Exclusive hold on one entry while it is being delivered.
///
/// Dropping it frees the receiver; an entry still mid-flight at that point
/// was abandoned and goes back to `queued`.
struct Claim<'a> {
    queue: &'a QueueInner,
    entry: QueuedMessage,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.queue.state);
        state.busy_receivers.remove(&self.entry.receiver_id);

        let temp_id = self.entry.temp_id;
        let abandoned = match state.entries.iter_mut().find(|e| e.temp_id == temp_id) {
            Some(entry) if entry.status.is_in_flight() => {
                entry.status = DeliveryStatus::Queued;
                true
            }
            _ => false,
        };
        if abandoned {
            warn!(temp_id = %temp_id, "delivery abandoned, entry requeued");
            if let Err(e) = lock(&self.queue.db).save_queue(&state.entries) {
                error!(error = %e, "failed to persist requeued entry");
            }
        }
    }
}

impl QueueInner {
    fn claim_next(&self) -> Option<Claim<'_>> {
        let mut state = lock(&self.state);
        let sender = state.sender_id.clone()?;
        let now = Utc::now();

        for entry in state.entries.iter_mut() {
            if entry.status == DeliveryStatus::RetryPending && entry.is_due(now) {
                entry.status = DeliveryStatus::Queued;
                entry.next_attempt_at = None;
            }
        }

        let mut blocked = state.busy_receivers.clone();
        let mut picked = None;
        for (idx, entry) in state.entries.iter().enumerate() {
            if entry.status.is_terminal() || entry.sender_id != sender {
                continue;
            }
            if blocked.contains(&entry.receiver_id) {
                continue;
            }
            if entry.status == DeliveryStatus::Queued {
                picked = Some(idx);
                break;
            }
            // Anything older and unfinished holds its receiver back.
            blocked.insert(entry.receiver_id.clone());
        }

        let idx = picked?;
        let entry = &mut state.entries[idx];
        entry.status = DeliveryStatus::UploadingMedia;
        let claimed = entry.clone();
        state.busy_receivers.insert(claimed.receiver_id.clone());

        if let Err(e) = lock(&self.db).save_queue(&state.entries) {
            warn!(temp_id = %claimed.temp_id, error = %e, "failed to persist claim");
        }
        debug!(temp_id = %claimed.temp_id, attempt = claimed.attempt, "delivery claimed");

        Some(Claim {
            queue: self,
            entry: claimed,
        })
    }

    async fn deliver(&self, mut claim: Claim<'_>) -> ProcessOutcome {
        let media_url = match claim.entry.media_url.clone() {
            Some(url) => url,
            None => {
                let media = MediaRef {
                    local_media_ref: claim.entry.local_media_ref.clone(),
                    media_kind: claim.entry.media_kind,
                    size_bytes: claim.entry.size_bytes,
                };
                match self.transport.upload_media(&media).await {
                    Ok(url) => url,
                    Err(e) => return self.fail(&claim, e),
                }
            }
        };

        if let Err(e) = self.mark_sending(&mut claim, &media_url) {
            error!(temp_id = %claim.entry.temp_id, error = %e, "delivery state lost");
            return ProcessOutcome::Failed {
                temp_id: claim.entry.temp_id,
                reason: e.to_string(),
            };
        }

        let metadata = OutgoingMetadata::for_entry(&claim.entry, media_url.clone());
        match self.transport.send_message(&metadata).await {
            Ok(server_id) => self.complete(&claim, server_id, media_url),
            Err(e) => self.fail(&claim, e),
        }
    }

    fn mark_sending(&self, claim: &mut Claim<'_>, media_url: &str) -> Result<(), QueueError> {
        let temp_id = claim.entry.temp_id;
        let mut state = lock(&self.state);
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.temp_id == temp_id)
            .ok_or(QueueError::UnknownMessage(temp_id))?;

        transition(entry, DeliveryStatus::SendingMetadata)?;
        entry.media_url = Some(media_url.to_string());
        claim.entry = entry.clone();

        if let Err(e) = lock(&self.db).save_queue(&state.entries) {
            warn!(temp_id = %temp_id, error = %e, "failed to persist upload result");
        }
        Ok(())
    }

    fn complete(&self, claim: &Claim<'_>, server_id: String, media_url: String) -> ProcessOutcome {
        let temp_id = claim.entry.temp_id;
        let sent = {
            let mut state = lock(&self.state);
            let Some(idx) = state.entries.iter().position(|e| e.temp_id == temp_id) else {
                error!(temp_id = %temp_id, "sent message vanished from queue");
                return ProcessOutcome::Failed {
                    temp_id,
                    reason: "entry vanished".into(),
                };
            };

            let entry = &mut state.entries[idx];
            if let Err(e) = transition(entry, DeliveryStatus::Sent) {
                error!(temp_id = %temp_id, error = %e, "cannot complete delivery");
            }
            entry.server_id = Some(server_id.clone());
            let sent = state.entries.remove(idx);

            if let Err(e) = lock(&self.db).save_queue(&state.entries) {
                error!(temp_id = %temp_id, error = %e, "failed to persist delivery");
            }
            sent
        };

        info!(temp_id = %temp_id, server_id = %server_id, "message sent");
        self.bus.publish(BusEvent::MessageSent(MessageSentPayload {
            temp_id,
            server_id: server_id.clone(),
            sender_id: sent.sender_id,
            receiver_id: sent.receiver_id,
            media_kind: sent.media_kind,
            visibility_mode: sent.visibility_mode,
            caption_text: sent.caption_text,
            media_url: Some(media_url),
            sent_at: Utc::now(),
        }));

        ProcessOutcome::Sent { temp_id, server_id }
    }

    fn fail(&self, claim: &Claim<'_>, err: TransportError) -> ProcessOutcome {
        let temp_id = claim.entry.temp_id;
        let reason = err.reason().to_string();

        let (outcome, failed) = {
            let mut state = lock(&self.state);
            let Some(entry) = state.entries.iter_mut().find(|e| e.temp_id == temp_id) else {
                return ProcessOutcome::Failed { temp_id, reason };
            };

            entry.attempt = entry.attempt.saturating_add(1);
            entry.last_error = Some(reason.clone());

            let terminal = !err.is_transient() || self.policy.is_exhausted(entry.attempt);
            let outcome = if terminal {
                if let Err(e) = transition(entry, DeliveryStatus::FailedTerminal) {
                    error!(error = %e, "invalid failure transition");
                }
                entry.next_attempt_at = None;
                ProcessOutcome::Failed {
                    temp_id,
                    reason: reason.clone(),
                }
            } else {
                let delay = self.policy.delay_for_attempt(entry.attempt, entry.jitter);
                if let Err(e) = transition(entry, DeliveryStatus::RetryPending) {
                    error!(error = %e, "invalid retry transition");
                }
                entry.next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .map(|d| Utc::now() + d);
                ProcessOutcome::RetryScheduled {
                    temp_id,
                    attempt: entry.attempt,
                    delay,
                }
            };

            let failed = terminal.then(|| MessageFailedPayload {
                temp_id,
                receiver_id: entry.receiver_id.clone(),
                reason: reason.clone(),
                attempts: entry.attempt,
            });

            if let Err(e) = lock(&self.db).save_queue(&state.entries) {
                error!(temp_id = %temp_id, error = %e, "failed to persist delivery failure");
            }
            (outcome, failed)
        };

        match &outcome {
            ProcessOutcome::RetryScheduled { attempt, delay, .. } => warn!(
                temp_id = %temp_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "delivery failed, retry scheduled"
            ),
            _ => error!(temp_id = %temp_id, error = %reason, "delivery failed permanently"),
        }

        if let Some(payload) = failed {
            self.bus.publish(BusEvent::MessageFailed(payload));
        }
        outcome
    }
}

fn transition(entry: &mut QueuedMessage, next: DeliveryStatus) -> Result<(), QueueError> {
    if !entry.status.can_transition_to(next) {
        return Err(QueueError::InvalidTransition {
            temp_id: entry.temp_id,
            from: entry.status,
            to: next,
        });
    }
    debug!(temp_id = %entry.temp_id, from = %entry.status, to = %next, "delivery transition");
    entry.status = next;
    Ok(())
}
