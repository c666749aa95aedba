//! Assistant gateway for the WhatsApp bridge.
//!
//! Defines the [`AssistantGateway`] contract the message router talks to, the
//! per-tenant [`AssistantDirectory`] of assistant bindings, and an OpenAI
//! Assistants (v2) client that keeps one conversation thread per sender.
mod directory;
mod openai_assistants;
mod retry;
mod thread_cache;
mod types;

pub use directory::AssistantDirectory;
pub use openai_assistants::{OpenAiAssistantClient, OpenAiAssistantConfig};
pub use retry::{
    is_retryable_http_error, next_backoff_ms, parse_retry_after_ms, retry_delay_ms,
    should_retry_status,
};
pub use types::{AssistantBinding, AssistantGateway, AssistantReply, WaAiError};
