//! In-process device adapter.
//!
//! Nothing leaves the process: pairing and inbound traffic are driven by
//! calling the recorded [`LoopbackDevice`] handles, and replies are kept in
//! memory. Used for local runs without a phone and to exercise supervisors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use wa_core::current_unix_timestamp_ms;

use crate::{
    DeviceError, DeviceEventSink, DeviceIdentity, DeviceOpenRequest, DeviceSession,
    DeviceSessionFactory, InboundDeviceMessage,
};

const LOOPBACK_ARTIFACT_FILE: &str = "loopback-device.json";

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackSentMessage {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct LoopbackDeviceState {
    sent: Mutex<Vec<LoopbackSentMessage>>,
    closed: AtomicBool,
    logged_out: AtomicBool,
    fail_sends: AtomicBool,
}

#[derive(Debug, Clone)]
/// One opened loopback connection attempt.
pub struct LoopbackDevice {
    tenant_id: String,
    generation: u64,
    session_dir: PathBuf,
    sink: DeviceEventSink,
    state: Arc<LoopbackDeviceState>,
}

impl LoopbackDevice {
    fn new(request: DeviceOpenRequest, sink: DeviceEventSink) -> Self {
        Self {
            tenant_id: request.tenant_id,
            generation: request.generation,
            session_dir: request.session_dir,
            sink,
            state: Arc::new(LoopbackDeviceState::default()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn sink(&self) -> &DeviceEventSink {
        &self.sink
    }

    pub fn emit_qr(&self, payload: &str) -> bool {
        self.sink.on_qr(payload)
    }

    pub fn emit_ready(&self, display_name: &str, phone_number: &str) -> bool {
        self.sink.on_ready(DeviceIdentity {
            display_name: display_name.to_string(),
            phone_number: phone_number.to_string(),
        })
    }

    pub fn emit_disconnect(&self, code: &str) -> bool {
        self.sink.on_disconnect(code, None)
    }

    /// Delivers an inbound text from `sender_id` and returns its message id.
    pub fn emit_message(&self, sender_id: &str, body: &str) -> String {
        let message_id = format!(
            "loopback-{}-{}",
            self.generation,
            MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        self.sink.on_message(InboundDeviceMessage {
            message_id: message_id.clone(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            from_me: false,
            timestamp_unix: current_unix_timestamp_ms() / 1_000,
        });
        message_id
    }

    pub fn sent_messages(&self) -> Vec<LoopbackSentMessage> {
        match self.state.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.state.logged_out.load(Ordering::SeqCst)
    }

    /// Makes subsequent `send_text` calls fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceSession for LoopbackDevice {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(DeviceError::Send {
                to: to.to_string(),
                detail: "loopback send failure".to_string(),
            });
        }
        let message = LoopbackSentMessage {
            to: to.to_string(),
            body: body.to_string(),
        };
        match self.state.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), DeviceError> {
        self.state.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct LoopbackFactoryInner {
    auto_qr: bool,
    pending_failures: AtomicUsize,
    open_count: AtomicUsize,
    opened: Mutex<Vec<LoopbackDevice>>,
    opened_tx: mpsc::UnboundedSender<LoopbackDevice>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackDevice>>,
}

#[derive(Clone)]
/// Factory for [`LoopbackDevice`] sessions.
pub struct LoopbackDeviceFactory {
    inner: Arc<LoopbackFactoryInner>,
}

impl Default for LoopbackDeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDeviceFactory {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Factory whose devices announce a pairing QR as soon as they open.
    pub fn with_auto_qr() -> Self {
        Self::build(true)
    }

    fn build(auto_qr: bool) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LoopbackFactoryInner {
                auto_qr,
                pending_failures: AtomicUsize::new(0),
                open_count: AtomicUsize::new(0),
                opened: Mutex::new(Vec::new()),
                opened_tx,
                opened_rx: tokio::sync::Mutex::new(opened_rx),
            }),
        }
    }

    /// Makes the next `count` opens fail with a handshake error.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    pub fn opened_devices(&self) -> Vec<LoopbackDevice> {
        match self.inner.opened.lock() {
            Ok(opened) => opened.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn latest_device_for(&self, tenant_id: &str) -> Option<LoopbackDevice> {
        self.opened_devices()
            .into_iter()
            .rev()
            .find(|device| device.tenant_id == tenant_id)
    }

    /// Waits for the next successfully opened device, in open order.
    pub async fn next_opened(&self) -> Option<LoopbackDevice> {
        self.inner.opened_rx.lock().await.recv().await
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl DeviceSessionFactory for LoopbackDeviceFactory {
    async fn open(
        &self,
        request: DeviceOpenRequest,
        sink: DeviceEventSink,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(DeviceError::Handshake(
                "loopback open failure injected".to_string(),
            ));
        }

        let artifact = json!({
            "tenantId": request.tenant_id,
            "generation": request.generation,
            "openedUnixMs": current_unix_timestamp_ms(),
        });
        tokio::fs::create_dir_all(&request.session_dir).await?;
        tokio::fs::write(
            request.session_dir.join(LOOPBACK_ARTIFACT_FILE),
            artifact.to_string(),
        )
        .await?;

        let device = LoopbackDevice::new(request, sink);
        if self.inner.auto_qr {
            device.emit_qr(&format!(
                "loopback:{}:{}:{}",
                device.tenant_id,
                device.generation,
                current_unix_timestamp_ms()
            ));
        }
        match self.inner.opened.lock() {
            Ok(mut opened) => opened.push(device.clone()),
            Err(poisoned) => poisoned.into_inner().push(device.clone()),
        }
        let _ = self.inner.opened_tx.send(device.clone());
        Ok(Arc::new(device))
    }
}
