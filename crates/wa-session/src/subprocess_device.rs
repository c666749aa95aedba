//! Subprocess device adapter.
//!
//! Runs one external WhatsApp Web client per connection attempt and speaks
//! newline-delimited JSON with it over stdio. The child gets the tenant's
//! session directory through `WA_BRIDGE_SESSION_DIR` and must keep its linked
//! device credentials there.
//!
//! Events read from stdout:
//! `{"type":"qr","payload":..}`, `{"type":"ready","display_name":..,"phone_number":..}`,
//! `{"type":"disconnected","reason":..}`, `{"type":"auth_failure","message":..}`,
//! `{"type":"message","message_id":..,"from":..,"body":..}`, `{"type":"error","message":..}`.
//!
//! Commands written to stdin:
//! `{"type":"send_message","to":..,"body":..}`, `{"type":"logout"}`, `{"type":"shutdown"}`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    DeviceError, DeviceEventSink, DeviceIdentity, DeviceOpenRequest, DeviceSession,
    DeviceSessionFactory, InboundDeviceMessage,
};

const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);
const PROCESS_EXITED_CODE: &str = "PROCESS_EXITED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeviceWireEvent {
    Qr {
        payload: String,
    },
    Ready {
        #[serde(default)]
        display_name: String,
        phone_number: String,
    },
    Disconnected {
        reason: String,
        #[serde(default)]
        detail: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Message {
        message_id: String,
        from: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        from_me: bool,
        #[serde(default)]
        timestamp: u64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeviceWireCommand {
    SendMessage { to: String, body: String },
    Logout,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Public struct `SubprocessDeviceConfig` used by the bridge runtime.
pub struct SubprocessDeviceConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SubprocessDeviceFactory {
    config: SubprocessDeviceConfig,
}

impl SubprocessDeviceFactory {
    pub fn new(config: SubprocessDeviceConfig) -> Self {
        Self { config }
    }

    fn spawn_child(&self, request: &DeviceOpenRequest) -> std::io::Result<Child> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .env("WA_BRIDGE_TENANT_ID", &request.tenant_id)
            .env("WA_BRIDGE_GENERATION", request.generation.to_string())
            .env("WA_BRIDGE_SESSION_DIR", &request.session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command.spawn()
    }
}

#[async_trait]
impl DeviceSessionFactory for SubprocessDeviceFactory {
    async fn open(
        &self,
        request: DeviceOpenRequest,
        sink: DeviceEventSink,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        let mut child = self.spawn_child(&request)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DeviceError::Protocol("device stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Protocol("device stdout is not piped".to_string()))?;
        info!(
            tenant_id = %request.tenant_id,
            generation = request.generation,
            command = %self.config.command,
            pid = child.id().unwrap_or_default(),
            "device process started"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let bridge = StdioBridge {
            tenant_id: request.tenant_id,
            sink,
            closing: Arc::clone(&closing),
        };
        let task = tokio::spawn(bridge.run(child, stdin, stdout, command_rx));

        Ok(Arc::new(SubprocessDeviceSession {
            command_tx,
            closing,
            task: Mutex::new(Some(task)),
        }))
    }
}

struct SubprocessDeviceSession {
    command_tx: mpsc::UnboundedSender<DeviceWireCommand>,
    closing: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubprocessDeviceSession {
    fn send_command(&self, command: DeviceWireCommand) -> Result<(), DeviceError> {
        self.command_tx
            .send(command)
            .map_err(|_| DeviceError::Closed)
    }
}

#[async_trait]
impl DeviceSession for SubprocessDeviceSession {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), DeviceError> {
        self.send_command(DeviceWireCommand::SendMessage {
            to: to.to_string(),
            body: body.to_string(),
        })
        .map_err(|_| DeviceError::Send {
            to: to.to_string(),
            detail: "device process is not running".to_string(),
        })
    }

    async fn logout(&self) -> Result<(), DeviceError> {
        self.send_command(DeviceWireCommand::Logout)
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.send_command(DeviceWireCommand::Shutdown);
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };
        if tokio::time::timeout(PROCESS_EXIT_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            // Dropping the child inside the aborted task kills the process.
            task.abort();
        }
        Ok(())
    }
}

struct StdioBridge {
    tenant_id: String,
    sink: DeviceEventSink,
    closing: Arc<AtomicBool>,
}

impl StdioBridge {
    async fn run(
        self,
        mut child: Child,
        mut stdin: ChildStdin,
        stdout: ChildStdout,
        mut command_rx: mpsc::UnboundedReceiver<DeviceWireCommand>,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        let mut commands_open = true;
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch_line(&line),
                    Ok(None) => {
                        debug!(tenant_id = %self.tenant_id, "device stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(tenant_id = %self.tenant_id, error = %e, "error reading device stdout");
                        break;
                    }
                },
                command = command_rx.recv(), if commands_open => match command {
                    Some(command) => {
                        let is_shutdown = matches!(command, DeviceWireCommand::Shutdown);
                        if let Err(e) = write_command(&mut stdin, &command).await {
                            warn!(tenant_id = %self.tenant_id, error = %e, "failed to write device command");
                            break;
                        }
                        if is_shutdown {
                            let _ = stdin.shutdown().await;
                            commands_open = false;
                        }
                    }
                    None => commands_open = false,
                },
            }
        }

        let status = match tokio::time::timeout(PROCESS_EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(tenant_id = %self.tenant_id, error = %e, "failed to wait for device process");
                None
            }
            Err(_) => {
                let _ = child.kill().await;
                None
            }
        };
        if self.closing.load(Ordering::SeqCst) {
            debug!(tenant_id = %self.tenant_id, ?status, "device process stopped");
            return;
        }
        warn!(tenant_id = %self.tenant_id, ?status, "device process exited unexpectedly");
        self.sink.on_disconnect(
            PROCESS_EXITED_CODE,
            status.map(|status| status.to_string()),
        );
    }

    fn dispatch_line(&self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let event = match serde_json::from_str::<DeviceWireEvent>(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!(tenant_id = %self.tenant_id, line = %trimmed, error = %e, "failed to parse device event");
                return;
            }
        };
        match event {
            DeviceWireEvent::Qr { payload } => {
                self.sink.on_qr(payload);
            }
            DeviceWireEvent::Ready {
                display_name,
                phone_number,
            } => {
                self.sink.on_ready(DeviceIdentity {
                    display_name,
                    phone_number,
                });
            }
            DeviceWireEvent::Disconnected { reason, detail } => {
                self.sink.on_disconnect(reason, detail);
            }
            DeviceWireEvent::AuthFailure { message } => {
                self.sink.on_auth_failure(message);
            }
            DeviceWireEvent::Message {
                message_id,
                from,
                body,
                from_me,
                timestamp,
            } => {
                self.sink.on_message(InboundDeviceMessage {
                    message_id,
                    sender_id: from,
                    body,
                    from_me,
                    timestamp_unix: timestamp,
                });
            }
            DeviceWireEvent::Error { message } => {
                self.sink.on_error(message);
            }
        }
    }
}

async fn write_command(stdin: &mut ChildStdin, command: &DeviceWireCommand) -> std::io::Result<()> {
    let mut line = serde_json::to_string(command).map_err(std::io::Error::other)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}
