use serde::{Deserialize, Serialize};
use wa_core::current_unix_timestamp_ms;

use crate::DeviceError;

const LOGGED_OUT_CODES: &[&str] = &["LOGOUT", "LOGGED_OUT"];
const SESSION_CORRUPTED_CODES: &[&str] = &[
    "UNPAIRED",
    "UNPAIRED_PHONE",
    "UNPAIRED_IDLE",
    "CONFLICT",
    "NAVIGATION",
    "TOS_BLOCK",
    "SMB_TOS_BLOCK",
    "DEPRECATED_VERSION",
    "BAD_SESSION",
];
const AUTH_FAILURE_CODES: &[&str] = &["AUTH_FAILURE", "UNAUTHORIZED"];

pub const HANDSHAKE_TIMEOUT_CODE: &str = "HANDSHAKE_TIMEOUT";
pub const HANDSHAKE_FAILED_CODE: &str = "HANDSHAKE_FAILED";
pub const ADAPTER_ERROR_CODE: &str = "ADAPTER_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DisconnectClass` values.
pub enum DisconnectClass {
    /// Network blips and unknown signals; retried with backoff.
    Transient,
    /// The account unlinked this device.
    LoggedOut,
    /// Stored credentials were rejected.
    AuthFailure,
    /// Stored credentials can no longer be trusted.
    SessionCorrupted,
}

impl DisconnectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::LoggedOut => "logged_out",
            Self::AuthFailure => "auth_failure",
            Self::SessionCorrupted => "session_corrupted",
        }
    }

    /// True for classes whose stored session must be wiped before reconnecting.
    pub fn requires_session_reset(self) -> bool {
        !matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for DisconnectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw adapter disconnect code onto a [`DisconnectClass`].
///
/// Matching ignores case and surrounding whitespace. Unknown codes are
/// treated as transient.
pub fn classify_disconnect(code: &str) -> DisconnectClass {
    let normalized = code.trim().to_ascii_uppercase();
    let normalized = normalized.as_str();
    if LOGGED_OUT_CODES.contains(&normalized) {
        DisconnectClass::LoggedOut
    } else if SESSION_CORRUPTED_CODES.contains(&normalized) {
        DisconnectClass::SessionCorrupted
    } else if AUTH_FAILURE_CODES.contains(&normalized) {
        DisconnectClass::AuthFailure
    } else {
        DisconnectClass::Transient
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Classified cause of the most recent connection loss.
pub struct DisconnectReason {
    pub class: DisconnectClass,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub observed_unix_ms: u64,
}

impl DisconnectReason {
    fn new(class: DisconnectClass, code: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            class,
            code: code.into(),
            detail,
            observed_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn from_signal(code: &str, detail: Option<String>) -> Self {
        let trimmed = code.trim();
        let code = if trimmed.is_empty() { "UNKNOWN" } else { trimmed };
        Self::new(classify_disconnect(code), code, detail)
    }

    pub fn auth_failure(detail: impl Into<String>) -> Self {
        Self::new(
            DisconnectClass::AuthFailure,
            "AUTH_FAILURE",
            Some(detail.into()),
        )
    }

    pub fn adapter_error(detail: impl Into<String>) -> Self {
        Self::new(
            DisconnectClass::Transient,
            ADAPTER_ERROR_CODE,
            Some(detail.into()),
        )
    }

    pub fn handshake_failed(error: &DeviceError) -> Self {
        Self::new(
            DisconnectClass::Transient,
            HANDSHAKE_FAILED_CODE,
            Some(error.to_string()),
        )
    }

    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::new(
            DisconnectClass::Transient,
            HANDSHAKE_TIMEOUT_CODE,
            Some(format!("no QR or ready signal within {timeout_ms}ms")),
        )
    }
}
