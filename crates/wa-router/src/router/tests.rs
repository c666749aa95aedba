use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use wa_ai::{AssistantGateway, AssistantReply, WaAiError};
use wa_session::{
    DeviceError, DeviceSession, InboundContext, InboundDeviceMessage, InboundMessageHandler,
};

use super::{IgnoreReason, MessageRouter, RouteOutcome, FALLBACK_REPLY};
use crate::commands::BridgeCommand;

const OWNER_PHONE: &str = "5215512345678";
const OWNER_CHAT: &str = "5215512345678@c.us";
const CUSTOMER_CHAT: &str = "5215500000001@c.us";

#[derive(Clone, Copy)]
enum GatewayMode {
    Echo,
    Silent,
    Fail,
}

struct ScriptedGateway {
    mode: GatewayMode,
    calls: Mutex<Vec<(String, String, String)>>,
    forgotten: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    fn new(mode: GatewayMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl AssistantGateway for ScriptedGateway {
    async fn send_to_assistant(
        &self,
        tenant_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<AssistantReply, WaAiError> {
        self.calls.lock().expect("calls lock").push((
            tenant_id.to_string(),
            sender_id.to_string(),
            text.to_string(),
        ));
        match self.mode {
            GatewayMode::Echo => Ok(Some(format!("assistant: {text}"))),
            GatewayMode::Silent => Ok(None),
            GatewayMode::Fail => Err(WaAiError::HttpStatus {
                status: 500,
                body: "upstream exploded".to_string(),
            }),
        }
    }

    fn forget_tenant(&self, tenant_id: &str) -> usize {
        self.forgotten
            .lock()
            .expect("forgotten lock")
            .push(tenant_id.to_string());
        1
    }
}

#[derive(Default)]
struct RecordingDevice {
    sent: Mutex<Vec<(String, String)>>,
    fail_sends: bool,
}

impl RecordingDevice {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl DeviceSession for RecordingDevice {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), DeviceError> {
        if self.fail_sends {
            return Err(DeviceError::Send {
                to: to.to_string(),
                detail: "socket closed".to_string(),
            });
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn logout(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

fn router_fixture(mode: GatewayMode) -> (MessageRouter, Arc<ScriptedGateway>, TempDir) {
    let temp = tempfile::tempdir().expect("tempdir");
    let gateway = ScriptedGateway::new(mode);
    let router = MessageRouter::new(gateway.clone(), temp.path().to_path_buf());
    (router, gateway, temp)
}

fn context() -> InboundContext {
    InboundContext {
        tenant_id: "acme".to_string(),
        generation: 1,
        owner_phone: Some(OWNER_PHONE.to_string()),
    }
}

fn message(sender_id: &str, body: &str) -> InboundDeviceMessage {
    InboundDeviceMessage {
        message_id: format!("msg-{sender_id}-{body}"),
        sender_id: sender_id.to_string(),
        body: body.to_string(),
        from_me: false,
        timestamp_unix: 1_700_000_000,
    }
}

async fn deliver(router: &MessageRouter, device: &Arc<RecordingDevice>, message: InboundDeviceMessage) {
    router
        .handle_inbound(context(), device.clone(), message)
        .await;
}

#[tokio::test]
async fn functional_group_sender_is_never_forwarded() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let device = Arc::new(RecordingDevice::default());
    for sender in [
        "120363025555555555@g.us",
        "5215512345678-1600000000@c.us",
        "status@broadcast",
    ] {
        deliver(&router, &device, message(sender, "hola")).await;
    }
    assert!(gateway.calls().is_empty());
    assert!(device.sent().is_empty());
}

#[tokio::test]
async fn functional_assistant_reply_goes_back_to_sender() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let device = Arc::new(RecordingDevice::default());
    deliver(&router, &device, message(CUSTOMER_CHAT, "  ¿Tienen envío?  ")).await;

    assert_eq!(
        gateway.calls(),
        vec![(
            "acme".to_string(),
            CUSTOMER_CHAT.to_string(),
            "  ¿Tienen envío?  ".to_string()
        )]
    );
    assert_eq!(
        device.sent(),
        vec![(
            CUSTOMER_CHAT.to_string(),
            "assistant:   ¿Tienen envío?  ".to_string()
        )]
    );
}

#[tokio::test]
async fn regression_gateway_failure_sends_exact_fallback() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Fail);
    let device = Arc::new(RecordingDevice::default());
    deliver(&router, &device, message(CUSTOMER_CHAT, "hola")).await;

    assert_eq!(gateway.calls().len(), 1);
    assert_eq!(
        device.sent(),
        vec![(CUSTOMER_CHAT.to_string(), FALLBACK_REPLY.to_string())]
    );
    assert_eq!(
        FALLBACK_REPLY,
        "Lo siento, hubo un error procesando tu mensaje. Por favor intenta nuevamente."
    );
}

#[tokio::test]
async fn unit_empty_assistant_reply_sends_nothing() {
    let (router, _gateway, _temp) = router_fixture(GatewayMode::Silent);
    let outcome = router.route(&context(), &message(CUSTOMER_CHAT, "hola")).await;
    assert_eq!(outcome, RouteOutcome::NoReply);
    assert_eq!(outcome.reply_text(), None);
}

#[tokio::test]
async fn functional_paused_conversation_skips_gateway_until_resumed() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let device = Arc::new(RecordingDevice::default());

    deliver(&router, &device, message(CUSTOMER_CHAT, "Pausar")).await;
    deliver(&router, &device, message(CUSTOMER_CHAT, "hola")).await;
    assert!(gateway.calls().is_empty());
    assert!(router.pause_store("acme").is_paused("5215500000001"));

    let other = router
        .route(&context(), &message("5215500000002@c.us", "hola"))
        .await;
    assert!(matches!(other, RouteOutcome::AssistantReply(_)));

    deliver(&router, &device, message(CUSTOMER_CHAT, "reactivar")).await;
    deliver(&router, &device, message(CUSTOMER_CHAT, "hola de nuevo")).await;
    assert_eq!(gateway.calls().len(), 2);

    let sent = device.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].1.contains("pausada"));
    assert!(sent[1].1.contains("reactivada"));
    assert_eq!(sent[2].1, "assistant: hola de nuevo");
}

#[tokio::test]
async fn regression_global_commands_require_the_linked_phone() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let refused = router
        .route(&context(), &message(CUSTOMER_CHAT, "pausar todo"))
        .await;
    assert!(matches!(
        refused,
        RouteOutcome::Command { command: BridgeCommand::PauseAll, ref reply } if reply.contains("Solo el número vinculado")
    ));
    assert!(!router.pause_store("acme").is_globally_paused());

    let mut own = message(OWNER_CHAT, "pause all");
    own.from_me = true;
    let accepted = router.route(&context(), &own).await;
    assert!(matches!(
        accepted,
        RouteOutcome::Command { command: BridgeCommand::PauseAll, .. }
    ));
    assert_eq!(
        router
            .route(&context(), &message(CUSTOMER_CHAT, "hola"))
            .await,
        RouteOutcome::Paused
    );

    let resumed = router
        .route(&context(), &message(OWNER_CHAT, "activar todo"))
        .await;
    assert!(matches!(
        resumed,
        RouteOutcome::Command { ref reply, .. } if reply.contains("Se eliminaron 1 pausas")
    ));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn unit_own_messages_and_empty_bodies_are_ignored() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let mut own = message(CUSTOMER_CHAT, "te escribo yo");
    own.from_me = true;
    assert_eq!(
        router.route(&context(), &own).await,
        RouteOutcome::Ignored(IgnoreReason::FromSelf)
    );
    assert_eq!(
        router.route(&context(), &message(CUSTOMER_CHAT, "  ")).await,
        RouteOutcome::Ignored(IgnoreReason::EmptyBody)
    );
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn unit_status_command_reports_pause_state() {
    let (router, _gateway, _temp) = router_fixture(GatewayMode::Echo);
    router
        .route(&context(), &message(CUSTOMER_CHAT, "pause"))
        .await;
    let outcome = router
        .route(&context(), &message(CUSTOMER_CHAT, "ESTADO"))
        .await;
    let reply = outcome.reply_text().expect("status reply");
    assert!(reply.contains("Esta conversación: pausada"));
    assert!(reply.contains("Conversaciones pausadas: 1"));
}

#[tokio::test]
async fn regression_delivery_failure_does_not_escape() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let device = Arc::new(RecordingDevice {
        fail_sends: true,
        ..RecordingDevice::default()
    });
    deliver(&router, &device, message(CUSTOMER_CHAT, "hola")).await;
    assert_eq!(gateway.calls().len(), 1);
    assert!(device.sent().is_empty());
}

#[tokio::test]
async fn integration_pause_state_survives_router_restart() {
    let (router, _gateway, temp) = router_fixture(GatewayMode::Echo);
    router
        .route(&context(), &message(CUSTOMER_CHAT, "pausar"))
        .await;

    let gateway = ScriptedGateway::new(GatewayMode::Echo);
    let restarted = MessageRouter::new(gateway.clone(), temp.path().to_path_buf());
    assert_eq!(
        restarted
            .route(&context(), &message(CUSTOMER_CHAT, "hola"))
            .await,
        RouteOutcome::Paused
    );
    assert!(temp
        .path()
        .join("tenants/acme/conversation-pauses.json")
        .exists());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn functional_release_tenant_forgets_threads_and_reloads_pause_state() {
    let (router, gateway, _temp) = router_fixture(GatewayMode::Echo);
    let store = router.pause_store("acme");
    router.release_tenant("acme");

    assert_eq!(
        *gateway.forgotten.lock().expect("forgotten lock"),
        vec!["acme".to_string()]
    );
    assert!(!Arc::ptr_eq(&store, &router.pause_store("acme")));
}
