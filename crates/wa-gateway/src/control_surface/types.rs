use serde::{Deserialize, Serialize};
use wa_session::{DisconnectReason, PendingRetry, TenantConfig, TenantStatusEntry};

use super::*;

#[derive(Debug)]
/// Error envelope returned by every control route: `{error:{type,code,message}}`.
pub(super) struct ControlApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl ControlApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        )
    }

    pub(super) fn tenant_not_found(tenant_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "tenant_not_found",
            format!("tenant '{tenant_id}' is not registered"),
        )
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<RegistryError> for ControlApiError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::SessionStore(SessionStoreError::InvalidTenantId(_)) => {
                Self::bad_request("invalid_tenant_id", error.to_string())
            }
            RegistryError::InvalidConfig { .. } => {
                Self::bad_request("invalid_tenant_config", error.to_string())
            }
            RegistryError::SessionStore(_) | RegistryError::Supervisor(_) => {
                Self::internal(error.to_string())
            }
        }
    }
}

impl IntoResponse for ControlApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterTenantRequest {
    pub(super) tenant_id: String,
    #[serde(flatten)]
    pub(super) config: TenantConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TenantUser {
    pub(super) name: String,
    pub(super) phone: String,
    pub(super) connected_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
/// Public status view of one tenant.
pub(super) struct TenantStatusResponse {
    pub(super) tenant_id: String,
    pub(super) display_name: Option<String>,
    pub(super) connected: bool,
    pub(super) user: Option<TenantUser>,
    #[serde(rename = "hasQR")]
    pub(super) has_qr: bool,
    pub(super) reconnect_attempts: u32,
    pub(super) state: &'static str,
    pub(super) generation: u64,
    pub(super) last_disconnect_reason: Option<DisconnectReason>,
    pub(super) pending_retry: Option<PendingRetry>,
    pub(super) updated_unix_ms: u64,
}

impl From<TenantStatusEntry> for TenantStatusResponse {
    fn from(entry: TenantStatusEntry) -> Self {
        let snapshot = entry.snapshot;
        Self {
            connected: snapshot.is_connected(),
            has_qr: snapshot.has_qr(),
            state: snapshot.state.as_str(),
            user: snapshot.connected_identity.map(|identity| TenantUser {
                name: identity.display_name,
                phone: identity.phone_number,
                connected_at: identity.connected_at,
            }),
            reconnect_attempts: snapshot.reconnect_attempts,
            generation: snapshot.generation,
            last_disconnect_reason: snapshot.last_disconnect_reason,
            pending_retry: snapshot.pending_retry,
            updated_unix_ms: snapshot.updated_unix_ms,
            tenant_id: entry.tenant_id,
            display_name: entry.display_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TenantQrResponse {
    /// `data:image/svg+xml;base64,...` rendering of `raw`.
    pub(super) qr: Option<String>,
    pub(super) raw: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TenantActionResponse {
    pub(super) success: bool,
    pub(super) tenant_id: String,
    pub(super) message: String,
}

impl TenantActionResponse {
    pub(super) fn accepted(tenant_id: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            tenant_id: tenant_id.to_string(),
            message: message.into(),
        }
    }
}
