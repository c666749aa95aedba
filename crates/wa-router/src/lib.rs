//! Inbound message routing between WhatsApp tenants and their assistants.
//!
//! Only direct chats are answered. Control commands (`pausar`, `reactivar`,
//! `pausar todo`, `activar todo`, `estado` and their English aliases) are
//! handled here and never reach the assistant gateway.

pub mod chat;
pub mod commands;
pub mod pause_store;
pub mod router;

pub use chat::{conversation_key, is_direct_chat, sender_is_owner};
pub use commands::{parse_bridge_command, BridgeCommand};
pub use pause_store::{
    ConversationPauseFile, ConversationPauseStore, CONVERSATION_PAUSES_FILE_NAME,
};
pub use router::{IgnoreReason, MessageRouter, RouteOutcome, FALLBACK_REPLY};
