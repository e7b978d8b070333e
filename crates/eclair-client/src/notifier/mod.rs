//! Notification reliability manager.
//!
//! Owns the push token lifecycle, permission and channel health, the
//! periodic self-diagnosis with scoped remediation, and the grouping of
//! incoming-message notifications.
//!
//! ```text
//! uninitialized -> initializing -> healthy <-> degraded -> recovering -> healthy | degraded
//!        ^                                                                     |
//!        +------------------------------ teardown ----------------------------+
//! ```
//!
//! Every failure is contained here.  Health checks and remediation log and
//! try again on the next cycle; a push token that cannot be obtained puts
//! the manager in limited mode, where in-app delivery keeps working.

mod buffer;
mod health;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use eclair_shared::constants::REQUIRED_CHANNELS;
use eclair_shared::{Identity, SuppressionInput, SuppressionReason};
use eclair_store::{HealthReport, NotificationSettings, Platform, PushToken};

use crate::backend::{BackendTransport, PushRequest};
use crate::bus::{EventBus, Subscription};
use crate::config::CoreConfig;
use crate::error::NotifyError;
use crate::events::{
    BusEvent, HealthAlertPayload, IncomingMessage, TOPIC_APP_RETURNED_FROM_BACKGROUND,
    TOPIC_MESSAGE_RECEIVED,
};
use crate::platform::{PermissionStatus, PushPlatform};
use crate::retry::RetryPolicy;
use crate::single_flight::SingleFlight;
use crate::state::{lock, PresenceState, SharedDatabase};

use self::buffer::{compose_push, DedupSet, NotificationBuffer};
use self::health::{alert_message, Findings};

/// Lifecycle phase of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierState {
    Uninitialized,
    Initializing,
    Healthy,
    Degraded,
    Recovering,
}

impl NotifierState {
    /// Initialisation finished for the current identity.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded | Self::Recovering)
    }
}

/// Shortest period the health monitor accepts.
const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Timing knobs, taken from [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Waits between push token regeneration attempts.
    pub token_retry_delays: Vec<Duration>,
    /// Period of the health monitor; raised to one second if shorter.
    pub health_interval: Duration,
    /// Grouping window per sender.
    pub buffer_window: Duration,
    /// Lifetime of an immediate-notification marker.
    pub dedup_window: Duration,
    /// Age under which a validated token skips the probe.
    pub token_revalidate: Duration,
    /// Backoff for pushes the backend failed to queue transiently.
    pub push_retry: RetryPolicy,
}

impl From<&CoreConfig> for NotifierConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            token_retry_delays: config.token_retry_delays(),
            health_interval: config.health_interval(),
            buffer_window: config.buffer_window(),
            dedup_window: config.dedup_window(),
            token_revalidate: Duration::from_secs(config.token_revalidate_secs),
            push_retry: config.retry_policy(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

struct Lifecycle {
    phase: NotifierState,
    identity: Option<Identity>,
    /// Survives teardown so a later sign-in can detect an account switch.
    last_user_id: Option<String>,
    limited: bool,
    last_alert: Option<Vec<String>>,
    monitor: Option<JoinHandle<()>>,
    /// Bumped by every initialisation and teardown; stale work compares it.
    epoch: u64,
}

struct NotifierInner {
    db: SharedDatabase,
    bus: EventBus,
    transport: Arc<dyn BackendTransport>,
    platform: Arc<dyn PushPlatform>,
    presence: PresenceState,
    blocked: watch::Receiver<HashSet<String>>,
    config: NotifierConfig,
    lifecycle: Mutex<Lifecycle>,
    init_flight: SingleFlight<(String, u64), Result<NotifierState, NotifyError>>,
    buffers: Mutex<HashMap<String, NotificationBuffer>>,
    dedup: Mutex<DedupSet>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Cloneable handle on the process-wide notification manager.
#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<NotifierInner>,
}

impl NotificationManager {
    pub fn new(
        db: SharedDatabase,
        bus: EventBus,
        transport: Arc<dyn BackendTransport>,
        platform: Arc<dyn PushPlatform>,
        presence: PresenceState,
        blocked: watch::Receiver<HashSet<String>>,
        mut config: NotifierConfig,
    ) -> Self {
        config.health_interval = config.health_interval.max(MIN_HEALTH_INTERVAL);
        let dedup = DedupSet::new(config.dedup_window);
        Self {
            inner: Arc::new(NotifierInner {
                db,
                bus,
                transport,
                platform,
                presence,
                blocked,
                config,
                lifecycle: Mutex::new(Lifecycle {
                    phase: NotifierState::Uninitialized,
                    identity: None,
                    last_user_id: None,
                    limited: false,
                    last_alert: None,
                    monitor: None,
                    epoch: 0,
                }),
                init_flight: SingleFlight::new(),
                buffers: Mutex::new(HashMap::new()),
                dedup: Mutex::new(dedup),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> NotifierState {
        lock(&self.inner.lifecycle).phase
    }

    /// Push initialisation gave up; only in-app delivery works.
    pub fn is_limited(&self) -> bool {
        lock(&self.inner.lifecycle).limited
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.inner.lifecycle).identity.clone()
    }

    /// Bring push delivery up for `identity`.
    ///
    /// Concurrent calls for the same identity await one shared attempt.  A
    /// call for a different account tears the previous one down first and
    /// clears its push token.
    pub async fn initialize(&self, identity: Identity) -> Result<NotifierState, NotifyError> {
        let switching = {
            let lc = lock(&self.inner.lifecycle);
            let active_differs = lc
                .identity
                .as_ref()
                .map_or(false, |current| !current.same_account(&identity));
            let previous_differs = lc
                .last_user_id
                .as_deref()
                .map_or(false, |last| last != identity.user_id);
            active_differs || previous_differs
        };
        if switching {
            info!(user = %identity.user_id, "account switch, resetting notifications");
            self.teardown(true);
        }

        let (key, epoch) = {
            let mut lc = lock(&self.inner.lifecycle);
            let same = lc
                .identity
                .as_ref()
                .map_or(false, |current| current.same_account(&identity));

            if same && lc.phase.is_ready() {
                return Ok(lc.phase);
            }
            if !(same && lc.phase == NotifierState::Initializing) {
                lc.epoch += 1;
                lc.phase = NotifierState::Initializing;
                lc.identity = Some(identity.clone());
                lc.last_user_id = Some(identity.user_id.clone());
                lc.limited = false;
                lc.last_alert = None;
            }
            ((identity.user_id.clone(), lc.epoch), lc.epoch)
        };

        let inner = self.inner.clone();
        self.inner
            .init_flight
            .run(key, move || run_initialization(inner, identity, epoch))
            .await
    }

    /// Stop the health monitor, drop pending buffers and the dedup set, and
    /// return to `uninitialized`.  `clear_token` removes the stored push
    /// token (account switch).
    pub fn teardown(&self, clear_token: bool) {
        let monitor = {
            let mut lc = lock(&self.inner.lifecycle);
            lc.epoch += 1;
            lc.phase = NotifierState::Uninitialized;
            lc.identity = None;
            lc.limited = false;
            lc.last_alert = None;
            lc.monitor.take()
        };
        if let Some(monitor) = monitor {
            monitor.abort();
        }

        let buffers: Vec<NotificationBuffer> =
            lock(&self.inner.buffers).drain().map(|(_, b)| b).collect();
        for mut buffer in buffers {
            buffer.cancel();
        }
        lock(&self.inner.dedup).clear();

        if clear_token {
            match lock(&self.inner.db).clear_push_token() {
                Ok(true) => info!("stored push token cleared"),
                Ok(false) => {}
                Err(e) => error!(error = %e, "failed to clear push token"),
            }
        }
        info!("notification manager torn down");
    }

    /// Run one diagnostic pass, remediate what it finds and alert if that
    /// did not help.
    pub async fn run_health_check(&self) -> Result<HealthReport, NotifyError> {
        let epoch = {
            let lc = lock(&self.inner.lifecycle);
            if !lc.phase.is_ready() {
                return Err(NotifyError::NotInitialized);
            }
            lc.epoch
        };

        let report = self.inner.diagnose(None).await;
        self.inner.record(&report);
        if report.is_healthy() {
            self.inner.settle(epoch, &report);
            return Ok(report);
        }

        warn!(remediation = ?report.remediation, "notification health degraded");
        self.inner.set_phase(epoch, NotifierState::Degraded);
        self.inner.set_phase(epoch, NotifierState::Recovering);
        self.inner.remediate(&report, epoch).await;

        let after = self.inner.diagnose(None).await;
        self.inner.record(&after);
        self.inner.settle(epoch, &after);
        Ok(after)
    }

    /// Whether the in-app banner for a message from `sender_id` should show.
    pub fn should_show_banner(&self, sender_id: &str) -> bool {
        self.inner.suppression(sender_id).is_none()
    }

    /// Route an incoming message into its sender's notification buffer.
    pub fn handle_incoming(&self, message: IncomingMessage) {
        self.inner.buffer_incoming(message);
    }

    /// Notify about `message` right away instead of through the buffer.
    ///
    /// Shares suppression and the dedup set with the buffered path.  Returns
    /// whether a push was queued.  Transient backend failures are retried
    /// with backoff; once those run out the message goes back to its
    /// sender's buffer.
    pub async fn notify_immediately(&self, message: IncomingMessage) -> Result<bool, NotifyError> {
        let (user_id, epoch) = self.inner.session().ok_or(NotifyError::NotInitialized)?;

        if !self.inner.settings().messages {
            return Ok(false);
        }
        if let Some(reason) = self.inner.suppression(&message.sender_id) {
            debug!(sender = %message.sender_id, ?reason, "immediate notification suppressed");
            return Ok(false);
        }
        if lock(&self.inner.dedup).contains(&message.message_id) {
            return Ok(false);
        }
        // Reserved while in flight so the buffered path skips it.
        self.mark_immediate_sent(&message.message_id);

        let request = compose_push(
            &user_id,
            std::slice::from_ref(&message),
            &self.inner.settings(),
        );
        match self.inner.deliver_push(epoch, &request).await {
            Ok(()) => {
                info!(title = %request.title, "immediate notification queued");
                Ok(true)
            }
            Err(e) => {
                lock(&self.inner.dedup).unmark(&message.message_id);
                if matches!(&e, NotifyError::Transport(t) if t.is_transient()) {
                    warn!(message_id = %message.message_id, error = %e, "immediate notification not queued, buffering");
                    self.inner.buffer_incoming(message);
                }
                Err(e)
            }
        }
    }

    /// Record that `message_id` was notified out of band so the buffered
    /// batch skips it.
    pub fn mark_immediate_sent(&self, message_id: &str) {
        lock(&self.inner.dedup).mark(message_id);

        let mut buffers = lock(&self.inner.buffers);
        let emptied: Vec<String> = buffers
            .iter_mut()
            .filter_map(|(sender, buffer)| {
                (buffer.remove_message(message_id) && buffer.messages.is_empty())
                    .then(|| sender.clone())
            })
            .collect();
        for sender in emptied {
            if let Some(mut buffer) = buffers.remove(&sender) {
                buffer.cancel();
            }
        }
    }

    /// Flush every pending buffer now.  Returns the pushes the backend
    /// accepted.
    pub async fn flush_all(&self) -> Vec<PushRequest> {
        let senders: Vec<String> = lock(&self.inner.buffers).keys().cloned().collect();
        let mut flushed = Vec::new();
        for sender in senders {
            if let Some(buffer) = lock(&self.inner.buffers).get_mut(&sender) {
                buffer.cancel();
            }
            if let Some(request) = self.inner.flush_sender(&sender).await {
                flushed.push(request);
            }
        }
        flushed
    }

    pub fn pending_buffers(&self) -> usize {
        lock(&self.inner.buffers).len()
    }

    pub fn settings(&self) -> NotificationSettings {
        self.inner.settings()
    }

    pub fn update_settings(&self, settings: NotificationSettings) -> Result<(), NotifyError> {
        lock(&self.inner.db).save_notification_settings(&settings)?;
        debug!(?settings, "notification settings updated");
        Ok(())
    }

    pub fn health_history(&self) -> Result<Vec<HealthReport>, NotifyError> {
        Ok(lock(&self.inner.db).health_history()?)
    }

    /// Listen for incoming messages and foreground transitions.
    pub fn attach(&self, bus: &EventBus) {
        let weak = Arc::downgrade(&self.inner);
        let on_message = bus.subscribe(TOPIC_MESSAGE_RECEIVED, move |event| {
            if let (Some(inner), BusEvent::MessageReceived(message)) = (weak.upgrade(), event) {
                inner.buffer_incoming(message.clone());
            }
            Ok(())
        });

        let weak = Arc::downgrade(&self.inner);
        let on_foreground = bus.subscribe(TOPIC_APP_RETURNED_FROM_BACKGROUND, move |_| {
            if let Some(inner) = weak.upgrade() {
                spawn_health_check(&inner);
            }
            Ok(())
        });

        let previous = std::mem::replace(
            &mut *lock(&self.inner.subscriptions),
            vec![on_message, on_foreground],
        );
        drop(previous);
    }

    pub fn detach(&self) {
        let previous = std::mem::take(&mut *lock(&self.inner.subscriptions));
        drop(previous);
    }
}

async fn run_initialization(
    inner: Arc<NotifierInner>,
    identity: Identity,
    epoch: u64,
) -> Result<NotifierState, NotifyError> {
    info!(user = %identity.user_id, "initialising notifications");

    inner.ensure_channels().await;

    let mut permission = inner.platform.permission_status().await;
    if permission == PermissionStatus::Undetermined {
        permission = inner.platform.request_permission().await;
    }
    inner.check_epoch(epoch)?;

    match inner.ensure_token(epoch).await {
        Ok(_) => {
            let phase = if permission.is_granted() {
                NotifierState::Healthy
            } else {
                NotifierState::Degraded
            };
            inner.set_phase(epoch, phase);
            inner.check_epoch(epoch)?;
            start_monitor(&inner, epoch);
            info!(user = %identity.user_id, state = ?phase, "notifications initialised");
            Ok(phase)
        }
        Err(NotifyError::Superseded) => Err(NotifyError::Superseded),
        Err(e) => {
            error!(user = %identity.user_id, error = %e, "push unavailable, entering limited mode");
            {
                let mut lc = lock(&inner.lifecycle);
                if lc.epoch != epoch {
                    return Err(NotifyError::Superseded);
                }
                lc.limited = true;
                lc.phase = NotifierState::Degraded;
            }

            let report = inner.diagnose(Some(false)).await;
            inner.record(&report);
            inner.alert(epoch, &report, true);
            start_monitor(&inner, epoch);
            Ok(NotifierState::Degraded)
        }
    }
}

fn start_monitor(inner: &Arc<NotifierInner>, epoch: u64) {
    let Ok(handle) = Handle::try_current() else {
        warn!("no async runtime, health monitor not started");
        return;
    };

    let period = inner.config.health_interval;
    let weak: Weak<NotifierInner> = Arc::downgrade(inner);
    let monitor = handle.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.current_epoch() != epoch {
                break;
            }
            let manager = NotificationManager { inner };
            if let Err(e) = manager.run_health_check().await {
                debug!(error = %e, "scheduled health check skipped");
            }
        }
    });

    let previous = {
        let mut lc = lock(&inner.lifecycle);
        if lc.epoch != epoch {
            monitor.abort();
            return;
        }
        lc.monitor.replace(monitor)
    };
    if let Some(previous) = previous {
        previous.abort();
    }
}

fn spawn_health_check(inner: &Arc<NotifierInner>) {
    if !lock(&inner.lifecycle).phase.is_ready() {
        return;
    }
    let Ok(handle) = Handle::try_current() else {
        return;
    };
    let manager = NotificationManager {
        inner: inner.clone(),
    };
    handle.spawn(async move {
        if let Err(e) = manager.run_health_check().await {
            debug!(error = %e, "foreground health check skipped");
        }
    });
}

impl NotifierInner {
    fn current_epoch(&self) -> u64 {
        lock(&self.lifecycle).epoch
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), NotifyError> {
        if self.current_epoch() == epoch {
            Ok(())
        } else {
            Err(NotifyError::Superseded)
        }
    }

    fn set_phase(&self, epoch: u64, phase: NotifierState) {
        let mut lc = lock(&self.lifecycle);
        if lc.epoch == epoch && lc.phase != phase {
            debug!(from = ?lc.phase, to = ?phase, "notifier transition");
            lc.phase = phase;
        }
    }

    /// Signed-in user and the epoch of the current session.
    fn session(&self) -> Option<(String, u64)> {
        let lc = lock(&self.lifecycle);
        let epoch = lc.epoch;
        lc.identity
            .as_ref()
            .map(|identity| (identity.user_id.clone(), epoch))
    }

    /// Queue `request` with the backend, retrying transient failures with
    /// backoff until the budget runs out or the session ends.
    async fn deliver_push(&self, epoch: u64, request: &PushRequest) -> Result<(), NotifyError> {
        let policy = self.config.push_retry;
        let draw = RetryPolicy::draw_jitter();
        let mut failures = 0;
        loop {
            match self.transport.queue_push(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && !policy.is_exhausted(failures + 1) => {
                    failures += 1;
                    let delay = policy.delay_for_attempt(failures, draw);
                    warn!(
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "push not queued, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    self.check_epoch(epoch)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn settings(&self) -> NotificationSettings {
        lock(&self.db).notification_settings().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read notification settings, using defaults");
            NotificationSettings::default()
        })
    }

    fn suppression(&self, sender_id: &str) -> Option<SuppressionReason> {
        let presence = self.presence.snapshot();
        let blocked = self.blocked.borrow();
        SuppressionInput {
            sender_id,
            app_state: presence.app_state,
            viewing_chat_with: presence.viewing_chat_with.as_deref(),
            home_screen_visible: presence.home_screen_visible,
            blocked: &blocked,
        }
        .evaluate()
    }

    /// Create the required Android channels that are missing.
    async fn ensure_channels(&self) -> Vec<String> {
        if self.platform.platform() == Platform::Ios {
            return Vec::new();
        }

        let existing = self.platform.existing_channels().await;
        let mut still_missing = Vec::new();
        for channel in REQUIRED_CHANNELS {
            if existing.iter().any(|c| c == channel) {
                continue;
            }
            match self.platform.create_channel(channel).await {
                Ok(()) => info!(channel, "notification channel created"),
                Err(e) => {
                    warn!(channel, error = %e, "failed to create notification channel");
                    still_missing.push(channel.to_string());
                }
            }
        }
        still_missing
    }

    async fn missing_channels(&self) -> Vec<String> {
        if self.platform.platform() == Platform::Ios {
            return Vec::new();
        }
        let existing = self.platform.existing_channels().await;
        REQUIRED_CHANNELS
            .iter()
            .filter(|required| !existing.iter().any(|c| c == *required))
            .map(|c| c.to_string())
            .collect()
    }

    /// Produce a validated push token, regenerating with bounded retries.
    ///
    /// A token the backend rejects is cleared at once; only validated tokens
    /// are ever persisted.
    async fn ensure_token(&self, epoch: u64) -> Result<PushToken, NotifyError> {
        let platform = self.platform.platform();
        let attempts = self.config.token_retry_delays.len() + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.token_retry_delays[attempt - 1];
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying push token");
                tokio::time::sleep(delay).await;
            }
            self.check_epoch(epoch)?;

            let stored = if attempt == 0 { self.stored_token() } else { None };
            let from_store = stored.is_some();
            let candidate = match stored {
                Some(token) => token,
                None => match self.platform.obtain_token(attempt > 0).await {
                    Ok(value) => PushToken::new(value, platform),
                    Err(e) => {
                        warn!(attempt, error = %e, "push platform returned no token");
                        continue;
                    }
                },
            };

            if !candidate.format_valid {
                warn!(attempt, "malformed push token discarded");
                continue;
            }

            match self.transport.validate_token(&candidate.value).await {
                Ok(true) => {
                    self.check_epoch(epoch)?;
                    let validated = PushToken {
                        last_validated_at: Some(Utc::now()),
                        ..candidate
                    };
                    lock(&self.db).save_push_token(&validated)?;
                    info!(attempt, "push token validated");
                    return Ok(validated);
                }
                Ok(false) => {
                    warn!(attempt, from_store, "push token rejected by backend");
                    if from_store {
                        self.forget_token();
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "push token validation failed");
                }
            }
        }

        Err(NotifyError::TokenUnavailable { attempts })
    }

    /// The stored token, if present and well-formed.  A malformed one is
    /// cleared.
    fn stored_token(&self) -> Option<PushToken> {
        let stored = match lock(&self.db).load_push_token() {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(error = %e, "failed to read stored push token");
                return None;
            }
        };
        if PushToken::is_well_formed(&stored.value) {
            Some(stored)
        } else {
            warn!("stored push token is malformed");
            self.forget_token();
            None
        }
    }

    fn forget_token(&self) {
        if let Err(e) = lock(&self.db).clear_push_token() {
            error!(error = %e, "failed to clear push token");
        }
    }

    /// Token health for a diagnostic pass.  A recently validated token is
    /// trusted; otherwise the backend is probed.  A probe that fails to
    /// reach the backend does not count against the token.
    async fn check_token(&self) -> bool {
        let Some(token) = self.stored_token() else {
            return false;
        };
        let max_age = chrono::Duration::from_std(self.config.token_revalidate)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if token.validated_within(max_age, Utc::now()) {
            return true;
        }

        match self.transport.validate_token(&token.value).await {
            Ok(true) => {
                let refreshed = PushToken {
                    last_validated_at: Some(Utc::now()),
                    ..token
                };
                if let Err(e) = lock(&self.db).save_push_token(&refreshed) {
                    warn!(error = %e, "failed to store revalidated push token");
                }
                true
            }
            Ok(false) => {
                warn!("stored push token no longer valid");
                self.forget_token();
                false
            }
            Err(e) => {
                warn!(error = %e, "push token probe failed, keeping token");
                true
            }
        }
    }

    async fn diagnose(&self, token_hint: Option<bool>) -> HealthReport {
        let permission = self.platform.permission_status().await;
        let missing_channels = self.missing_channels().await;
        let token_healthy = match token_hint {
            Some(healthy) => healthy,
            None => self.check_token().await,
        };

        Findings {
            permission,
            missing_channels,
            token_healthy,
            device: self.platform.device_profile(),
        }
        .into_report(Utc::now())
    }

    /// Scoped, non-destructive fixes for the unhealthy dimensions of
    /// `report`.
    async fn remediate(&self, report: &HealthReport, epoch: u64) {
        if !report.channels_healthy {
            let missing = self.ensure_channels().await;
            if !missing.is_empty() {
                warn!(?missing, "channels still missing after remediation");
            }
        }
        if !report.permissions_healthy {
            let status = self.platform.request_permission().await;
            debug!(?status, "permission re-requested");
        }
        if !report.token_healthy {
            match self.ensure_token(epoch).await {
                Ok(_) => {
                    let mut lc = lock(&self.lifecycle);
                    if lc.epoch == epoch && lc.limited {
                        info!("push token recovered, leaving limited mode");
                        lc.limited = false;
                    }
                }
                Err(e) => warn!(error = %e, "token remediation failed"),
            }
        }
    }

    fn record(&self, report: &HealthReport) {
        if let Err(e) = lock(&self.db).append_health_report(report) {
            warn!(error = %e, "failed to persist health report");
        }
    }

    /// Apply the outcome of a pass: healthy clears the alert memory,
    /// anything else degrades and alerts once per distinct finding set.
    fn settle(&self, epoch: u64, report: &HealthReport) {
        if report.is_healthy() {
            let mut lc = lock(&self.lifecycle);
            if lc.epoch == epoch {
                lc.phase = NotifierState::Healthy;
                lc.limited = false;
                lc.last_alert = None;
            }
            return;
        }
        self.set_phase(epoch, NotifierState::Degraded);
        let limited = lock(&self.lifecycle).limited;
        self.alert(epoch, report, limited);
    }

    fn alert(&self, epoch: u64, report: &HealthReport, limited_mode: bool) {
        {
            let mut lc = lock(&self.lifecycle);
            if lc.epoch != epoch || lc.last_alert.as_ref() == Some(&report.remediation) {
                return;
            }
            lc.last_alert = Some(report.remediation.clone());
        }

        let message = alert_message(report, limited_mode);
        warn!(limited_mode, %message, "notification health alert");
        self.bus.publish(BusEvent::HealthAlert(HealthAlertPayload {
            report: report.clone(),
            limited_mode,
            message,
        }));
    }

    fn buffer_incoming(self: &Arc<Self>, message: IncomingMessage) {
        if !lock(&self.lifecycle).phase.is_ready() {
            debug!(message_id = %message.message_id, "notifier not ready, message not buffered");
            return;
        }
        if !self.settings().messages {
            return;
        }
        if let Some(reason) = self.suppression(&message.sender_id) {
            debug!(sender = %message.sender_id, ?reason, "notification suppressed");
            return;
        }
        if lock(&self.dedup).contains(&message.message_id) {
            debug!(message_id = %message.message_id, "already notified immediately");
            return;
        }

        let sender_id = message.sender_id.clone();
        let mut buffers = lock(&self.buffers);
        if let Some(buffer) = buffers.get_mut(&sender_id) {
            if !buffer.messages.iter().any(|m| m.message_id == message.message_id) {
                buffer.messages.push(message);
            }
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime, notification dropped");
            return;
        };
        let mut buffer = NotificationBuffer::new(message);
        let window = self.config.buffer_window;
        let weak = Arc::downgrade(self);
        let sender = sender_id.clone();
        buffer.flush_timer = Some(handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush_sender(&sender).await;
            }
        }));
        buffers.insert(sender_id, buffer);
    }

    async fn flush_sender(&self, sender_id: &str) -> Option<PushRequest> {
        let buffer = lock(&self.buffers).remove(sender_id)?;
        let (user_id, epoch) = self.session()?;

        let messages: Vec<IncomingMessage> = {
            let mut dedup = lock(&self.dedup);
            buffer
                .messages
                .into_iter()
                .filter(|m| !dedup.contains(&m.message_id))
                .collect()
        };
        if messages.is_empty() {
            return None;
        }
        if let Some(reason) = self.suppression(sender_id) {
            debug!(sender = %sender_id, ?reason, "buffered notification suppressed at flush");
            return None;
        }
        let settings = self.settings();
        if !settings.messages {
            return None;
        }

        let request = compose_push(&user_id, &messages, &settings);
        match self.deliver_push(epoch, &request).await {
            Ok(()) => {
                info!(
                    sender = %sender_id,
                    count = messages.len(),
                    buffered_ms = buffer.first_buffered_at.elapsed().as_millis() as u64,
                    "grouped notification queued"
                );
                Some(request)
            }
            Err(e) => {
                error!(sender = %sender_id, count = messages.len(), error = %e, "grouped notification dropped");
                None
            }
        }
    }
}
