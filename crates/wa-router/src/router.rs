//! Inbound message routing for connected tenants.
//!
//! Direct chats go to the tenant's assistant unless the conversation is
//! paused; control commands are answered locally. Failures never leave the
//! router: gateway errors turn into the fixed fallback reply and delivery
//! errors are logged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wa_ai::AssistantGateway;
use wa_session::{DeviceSession, InboundContext, InboundDeviceMessage, InboundMessageHandler};

use crate::chat::{conversation_key, is_direct_chat, sender_is_owner};
use crate::commands::{parse_bridge_command, BridgeCommand};
use crate::pause_store::ConversationPauseStore;

pub const FALLBACK_REPLY: &str =
    "Lo siento, hubo un error procesando tu mensaje. Por favor intenta nuevamente.";
const OWNER_ONLY_REPLY: &str = "⛔ Solo el número vinculado puede usar este comando.";
const PAUSE_STORE_ERROR_REPLY: &str = "❌ No se pudo guardar el cambio. Intenta nuevamente.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `IgnoreReason` values.
pub enum IgnoreReason {
    FromSelf,
    EmptyBody,
    NotDirectChat,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FromSelf => "from_self",
            Self::EmptyBody => "empty_body",
            Self::NotDirectChat => "not_direct_chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of routing one inbound message.
pub enum RouteOutcome {
    Ignored(IgnoreReason),
    Paused,
    Command {
        command: BridgeCommand,
        reply: String,
    },
    AssistantReply(String),
    /// The assistant finished without text; nothing is sent.
    NoReply,
    Fallback,
}

impl RouteOutcome {
    /// Text to send back to the sender, if any.
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Command { reply, .. } | Self::AssistantReply(reply) => Some(reply),
            Self::Fallback => Some(FALLBACK_REPLY),
            Self::Ignored(_) | Self::Paused | Self::NoReply => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ignored(reason) => reason.as_str(),
            Self::Paused => "paused",
            Self::Command { .. } => "command",
            Self::AssistantReply(_) => "assistant_reply",
            Self::NoReply => "no_reply",
            Self::Fallback => "fallback",
        }
    }
}

/// Routes inbound messages of every tenant; shared by all supervisors.
pub struct MessageRouter {
    gateway: Arc<dyn AssistantGateway>,
    state_dir: PathBuf,
    pause_stores: Mutex<HashMap<String, Arc<ConversationPauseStore>>>,
}

impl MessageRouter {
    pub fn new(gateway: Arc<dyn AssistantGateway>, state_dir: PathBuf) -> Self {
        Self {
            gateway,
            state_dir,
            pause_stores: Mutex::new(HashMap::new()),
        }
    }

    /// Pause store for `tenant_id`, loaded on first use.
    pub fn pause_store(&self, tenant_id: &str) -> Arc<ConversationPauseStore> {
        let mut stores = match self.pause_stores.lock() {
            Ok(stores) => stores,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(store) = stores.get(tenant_id) {
            return Arc::clone(store);
        }
        let path = ConversationPauseStore::path_for_tenant(&self.state_dir, tenant_id);
        let store = match ConversationPauseStore::load(path.clone()) {
            Ok(store) => store,
            Err(error) => {
                warn!(
                    tenant_id,
                    path = %path.display(),
                    error = %error,
                    "unreadable pause state; starting with no pauses"
                );
                ConversationPauseStore::empty(path)
            }
        };
        let store = Arc::new(store);
        stores.insert(tenant_id.to_string(), Arc::clone(&store));
        store
    }

    /// Decides what to do with `message` and performs the assistant call.
    pub async fn route(
        &self,
        context: &InboundContext,
        message: &InboundDeviceMessage,
    ) -> RouteOutcome {
        let owner_phone = context.owner_phone.as_deref();
        let body = message.body.trim();
        if body.is_empty() {
            return RouteOutcome::Ignored(IgnoreReason::EmptyBody);
        }
        if !is_direct_chat(&message.sender_id) {
            return RouteOutcome::Ignored(IgnoreReason::NotDirectChat);
        }

        let command = parse_bridge_command(body);
        if message.from_me {
            // The linked phone may only issue commands, from its own chat.
            let own_chat = sender_is_owner(&message.sender_id, owner_phone);
            if !(own_chat && command.is_some()) {
                return RouteOutcome::Ignored(IgnoreReason::FromSelf);
            }
        }

        let conversation = conversation_key(&message.sender_id);
        let pause_store = self.pause_store(&context.tenant_id);
        if let Some(command) = command {
            let reply = if command.is_owner_only()
                && !sender_is_owner(&message.sender_id, owner_phone)
            {
                OWNER_ONLY_REPLY.to_string()
            } else {
                apply_command(&pause_store, command, &conversation)
            };
            info!(
                tenant_id = %context.tenant_id,
                conversation = %conversation,
                command = command.as_str(),
                "control command handled"
            );
            return RouteOutcome::Command { command, reply };
        }

        if pause_store.is_paused(&conversation) {
            debug!(
                tenant_id = %context.tenant_id,
                conversation = %conversation,
                "conversation paused; not forwarding"
            );
            return RouteOutcome::Paused;
        }

        match self
            .gateway
            .send_to_assistant(&context.tenant_id, &message.sender_id, &message.body)
            .await
        {
            Ok(Some(reply)) if !reply.trim().is_empty() => RouteOutcome::AssistantReply(reply),
            Ok(_) => RouteOutcome::NoReply,
            Err(error) => {
                warn!(
                    tenant_id = %context.tenant_id,
                    message_id = %message.message_id,
                    error = %error,
                    "assistant gateway failed; sending fallback reply"
                );
                RouteOutcome::Fallback
            }
        }
    }
}

fn apply_command(store: &ConversationPauseStore, command: BridgeCommand, conversation: &str) -> String {
    let applied = match command {
        BridgeCommand::PauseConversation => store.pause_conversation(conversation).map(|changed| {
            if changed {
                "⏸️ Conversación pausada. Para reactivar, escribe 'reactivar'.".to_string()
            } else {
                "✅ Esta conversación ya estaba pausada.".to_string()
            }
        }),
        BridgeCommand::ResumeConversation => {
            store.resume_conversation(conversation).map(|changed| {
                if changed {
                    "✅ Conversación reactivada. El asistente responderá automáticamente."
                        .to_string()
                } else {
                    "ℹ️ Esta conversación no estaba pausada.".to_string()
                }
            })
        }
        BridgeCommand::PauseAll => store.pause_all().map(|changed| {
            if changed {
                "⏸️ Todas las conversaciones pausadas. Para reactivar todo, escribe 'activar todo'."
                    .to_string()
            } else {
                "✅ El bot ya estaba completamente pausado.".to_string()
            }
        }),
        BridgeCommand::ResumeAll => store.resume_all().map(|cleared| {
            if cleared > 0 {
                format!("✅ Todas las conversaciones reactivadas. Se eliminaron {cleared} pausas.")
            } else {
                "ℹ️ El bot no tenía conversaciones pausadas.".to_string()
            }
        }),
        BridgeCommand::Status => Ok(status_reply(store, conversation)),
    };
    applied.unwrap_or_else(|error| {
        warn!(
            path = %store.path().display(),
            error = %error,
            "pause state update failed"
        );
        PAUSE_STORE_ERROR_REPLY.to_string()
    })
}

fn status_reply(store: &ConversationPauseStore, conversation: &str) -> String {
    let mut lines = vec!["📊 Estado del bot:".to_string()];
    if store.is_globally_paused() {
        lines.push("🔴 Bot: completamente pausado".to_string());
    } else if store.is_conversation_paused(conversation) {
        lines.push("🟡 Esta conversación: pausada".to_string());
        lines.push("🟢 Bot: activo para otras conversaciones".to_string());
    } else {
        lines.push("🟢 Esta conversación: activa".to_string());
    }
    let paused = store.paused_conversation_count();
    if paused > 0 {
        lines.push(format!("📱 Conversaciones pausadas: {paused}"));
    }
    lines.push(String::new());
    lines.push("Comandos: pausar, reactivar, pausar todo, activar todo, estado".to_string());
    lines.join("\n")
}

#[async_trait]
impl InboundMessageHandler for MessageRouter {
    async fn handle_inbound(
        &self,
        context: InboundContext,
        device: Arc<dyn DeviceSession>,
        message: InboundDeviceMessage,
    ) {
        let outcome = self.route(&context, &message).await;
        debug!(
            tenant_id = %context.tenant_id,
            message_id = %message.message_id,
            outcome = outcome.kind(),
            "inbound message routed"
        );
        let Some(reply) = outcome.reply_text() else {
            return;
        };
        if let Err(error) = device.send_text(&message.sender_id, reply).await {
            warn!(
                tenant_id = %context.tenant_id,
                message_id = %message.message_id,
                error = %error,
                "reply delivery failed"
            );
        }
    }

    fn release_tenant(&self, tenant_id: &str) {
        let threads = self.gateway.forget_tenant(tenant_id);
        let mut stores = match self.pause_stores.lock() {
            Ok(stores) => stores,
            Err(poisoned) => poisoned.into_inner(),
        };
        let had_pause_store = stores.remove(tenant_id).is_some();
        debug!(tenant_id, threads, had_pause_store, "released tenant routing state");
    }
}

#[cfg(test)]
mod tests;
