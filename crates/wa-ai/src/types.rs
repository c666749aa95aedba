use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `WaAiError` values.
pub enum WaAiError {
    #[error("missing API key for tenant '{tenant_id}'")]
    MissingApiKey { tenant_id: String },
    #[error("tenant '{0}' has no assistant binding")]
    UnboundTenant(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("assistant API returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("assistant run {run_id} ended with status '{status}': {detail}")]
    RunFailed {
        run_id: String,
        status: String,
        detail: String,
    },
    #[error("assistant run {run_id} did not finish after {polls} polls")]
    RunTimedOut { run_id: String, polls: usize },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Assistant identity a tenant's conversations are answered by.
pub struct AssistantBinding {
    pub assistant_id: String,
    /// Tenant-specific key; falls back to the gateway default when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl AssistantBinding {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }
}

/// Assistant text produced for one inbound message. `None` means the
/// assistant finished without a text answer.
pub type AssistantReply = Option<String>;

#[async_trait]
/// Trait contract for `AssistantGateway` behavior.
///
/// Implementations keep a conversation context per `(tenant_id, sender_id)`.
pub trait AssistantGateway: Send + Sync {
    async fn send_to_assistant(
        &self,
        tenant_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<AssistantReply, WaAiError>;

    /// Drops any conversation context held for `tenant_id`, returning how
    /// many contexts were released.
    fn forget_tenant(&self, _tenant_id: &str) -> usize {
        0
    }
}
