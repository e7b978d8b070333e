#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use eclair_client::error::PlatformError;
use eclair_client::events::IncomingMessage;
use eclair_client::{
    BackendTransport, BusEvent, DeviceProfile, EventBus, MessageDraft, OutgoingMetadata,
    PermissionStatus, PushPlatform, PushRequest, SnapshotSource, Subscription,
};
use eclair_shared::types::MediaRef;
use eclair_shared::{MediaKind, TransportError};
use eclair_store::Platform;

pub const VALID_TOKEN: &str = "ExponentPushToken[device-one]";
pub const OTHER_TOKEN: &str = "ExponentPushToken[device-two]";

/// Scriptable backend double.  Failures are consumed in order; once a
/// script is empty the call succeeds.
#[derive(Default)]
pub struct MockTransport {
    upload_failures: Mutex<VecDeque<TransportError>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    push_failures: Mutex<VecDeque<TransportError>>,
    token_verdicts: Mutex<VecDeque<Result<bool, TransportError>>>,
    latency: Mutex<Duration>,
    uploads: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutgoingMetadata>>,
    pushes: Mutex<Vec<PushRequest>>,
    validated: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_uploads(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.upload_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_sends(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.send_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_pushes(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.push_failures.lock().unwrap().extend(errors);
    }

    pub fn script_token_verdicts(&self, verdicts: impl IntoIterator<Item = Result<bool, TransportError>>) {
        self.token_verdicts.lock().unwrap().extend(verdicts);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<OutgoingMetadata> {
        self.sent.lock().unwrap().clone()
    }

    /// Media refs in the order the backend accepted them for `receiver`.
    pub fn sent_to(&self, receiver: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.receiver_id == receiver)
            .map(|m| m.media_url.trim_start_matches("https://cdn.test/").to_string())
            .collect()
    }

    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn validated(&self) -> Vec<String> {
        self.validated.lock().unwrap().clone()
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn upload_media(&self, media: &MediaRef) -> Result<String, TransportError> {
        self.pause().await;
        if let Some(err) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.uploads.lock().unwrap().push(media.local_media_ref.clone());
        Ok(format!("https://cdn.test/{}", media.local_media_ref))
    }

    async fn send_message(&self, metadata: &OutgoingMetadata) -> Result<String, TransportError> {
        self.pause().await;
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(metadata.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("srv-{id}"))
    }

    async fn queue_push(&self, request: &PushRequest) -> Result<(), TransportError> {
        if let Some(err) = self.push_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.pushes.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Result<bool, TransportError> {
        self.validated.lock().unwrap().push(token.to_string());
        self.token_verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(true))
    }
}

/// Device push platform double.
pub struct MockPlatform {
    platform: Platform,
    tokens: Mutex<VecDeque<Result<String, PlatformError>>>,
    default_token: Mutex<Option<String>>,
    token_delay: Mutex<Duration>,
    obtain_calls: AtomicUsize,
    forced_calls: AtomicUsize,
    permission: Mutex<PermissionStatus>,
    permission_after_prompt: Mutex<PermissionStatus>,
    prompts: AtomicUsize,
    channels: Mutex<Vec<String>>,
    channel_creation_fails: AtomicBool,
    device: Mutex<DeviceProfile>,
}

impl MockPlatform {
    pub fn android() -> Self {
        Self {
            platform: Platform::Android,
            tokens: Mutex::new(VecDeque::new()),
            default_token: Mutex::new(Some(VALID_TOKEN.to_string())),
            token_delay: Mutex::new(Duration::ZERO),
            obtain_calls: AtomicUsize::new(0),
            forced_calls: AtomicUsize::new(0),
            permission: Mutex::new(PermissionStatus::Granted),
            permission_after_prompt: Mutex::new(PermissionStatus::Granted),
            prompts: AtomicUsize::new(0),
            channels: Mutex::new(Vec::new()),
            channel_creation_fails: AtomicBool::new(false),
            device: Mutex::new(DeviceProfile::new("Google")),
        }
    }

    pub fn ios() -> Self {
        Self {
            platform: Platform::Ios,
            ..Self::android()
        }
    }

    pub fn script_tokens(&self, tokens: impl IntoIterator<Item = Result<String, PlatformError>>) {
        self.tokens.lock().unwrap().extend(tokens);
    }

    /// Token handed out once the script is exhausted; `None` fails.
    pub fn set_default_token(&self, token: Option<&str>) {
        *self.default_token.lock().unwrap() = token.map(str::to_string);
    }

    pub fn set_token_delay(&self, delay: Duration) {
        *self.token_delay.lock().unwrap() = delay;
    }

    pub fn set_permission(&self, status: PermissionStatus, after_prompt: PermissionStatus) {
        *self.permission.lock().unwrap() = status;
        *self.permission_after_prompt.lock().unwrap() = after_prompt;
    }

    pub fn set_channels(&self, channels: &[&str]) {
        *self.channels.lock().unwrap() = channels.iter().map(|c| c.to_string()).collect();
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }

    pub fn fail_channel_creation(&self, fail: bool) {
        self.channel_creation_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_device(&self, device: DeviceProfile) {
        *self.device.lock().unwrap() = device;
    }

    pub fn obtain_calls(&self) -> usize {
        self.obtain_calls.load(Ordering::SeqCst)
    }

    pub fn forced_calls(&self) -> usize {
        self.forced_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushPlatform for MockPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn obtain_token(&self, force_new: bool) -> Result<String, PlatformError> {
        self.obtain_calls.fetch_add(1, Ordering::SeqCst);
        if force_new {
            self.forced_calls.fetch_add(1, Ordering::SeqCst);
        }
        let delay = *self.token_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(scripted) = self.tokens.lock().unwrap().pop_front() {
            return scripted;
        }
        self.default_token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PlatformError("registration unavailable".into()))
    }

    async fn permission_status(&self) -> PermissionStatus {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let after = *self.permission_after_prompt.lock().unwrap();
        *self.permission.lock().unwrap() = after;
        after
    }

    async fn existing_channels(&self) -> Vec<String> {
        if self.platform == Platform::Ios {
            return Vec::new();
        }
        self.channels.lock().unwrap().clone()
    }

    async fn create_channel(&self, id: &str) -> Result<(), PlatformError> {
        if self.channel_creation_fails.load(Ordering::SeqCst) {
            return Err(PlatformError(format!("cannot create {id}")));
        }
        let mut channels = self.channels.lock().unwrap();
        if !channels.iter().any(|c| c == id) {
            channels.push(id.to_string());
        }
        Ok(())
    }

    fn device_profile(&self) -> DeviceProfile {
        self.device.lock().unwrap().clone()
    }
}

/// Snapshot source counting fetches.
#[derive(Default)]
pub struct MockSnapshots {
    fetches: AtomicUsize,
    latency: Mutex<Duration>,
    failing: AtomicBool,
}

impl MockSnapshots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshots {
    async fn fetch_snapshot(&self, key: &str) -> Result<Value, TransportError> {
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::transient("backend unreachable"));
        }
        Ok(json!({ "key": key, "fetch": fetch }))
    }
}

/// Every event published on `topic`, in order.
pub struct Recorder {
    events: Arc<Mutex<Vec<BusEvent>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn new(bus: &EventBus, topic: &str) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = bus.subscribe(topic, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

pub fn media(name: &str) -> MediaRef {
    MediaRef {
        local_media_ref: name.to_string(),
        media_kind: MediaKind::Photo,
        size_bytes: 2_048,
    }
}

pub fn draft(receiver: &str, name: &str) -> MessageDraft {
    MessageDraft::new(receiver, media(name))
}

pub fn incoming(message_id: &str, sender_id: &str) -> IncomingMessage {
    IncomingMessage {
        message_id: message_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_pseudo: format!("{sender_id}-pseudo"),
        conversation_id: sender_id.to_string(),
        media_kind: MediaKind::Photo,
        caption_text: None,
        received_at: Utc::now(),
    }
}

pub fn no_blocked() -> tokio::sync::watch::Receiver<HashSet<String>> {
    let (tx, rx) = tokio::sync::watch::channel(HashSet::new());
    // The receiver keeps the last value after the sender is gone.
    drop(tx);
    rx
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `future` with a generous upper bound so a hang fails the test.
pub async fn bounded<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("operation timed out")
}
