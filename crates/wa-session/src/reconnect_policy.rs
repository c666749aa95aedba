//! Pure reconnection policy.
//!
//! [`decide`] maps a classified disconnect and the current retry streak onto
//! the next lifecycle action. It holds no state; supervisors own the streak
//! counter and the timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DisconnectClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `BackoffStrategy` values.
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
}

impl BackoffStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Linear => "linear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `EnvironmentProfile` values.
pub enum EnvironmentProfile {
    Development,
    Production,
}

impl EnvironmentProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn reconnect_profile(self) -> ReconnectProfile {
        match self {
            Self::Development => ReconnectProfile {
                base_delay_ms: 5_000,
                max_delay_ms: 60_000,
                max_attempts: 5,
                reset_delay_ms: 5_000,
                give_up_delay_ms: 120_000,
                handshake_timeout_ms: 60_000,
                backoff: BackoffStrategy::Exponential,
            },
            Self::Production => ReconnectProfile {
                base_delay_ms: 15_000,
                max_delay_ms: 120_000,
                max_attempts: 3,
                reset_delay_ms: 10_000,
                give_up_delay_ms: 600_000,
                handshake_timeout_ms: 180_000,
                backoff: BackoffStrategy::Exponential,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Tunables consumed by [`decide`] and the supervisor handshake watchdog.
pub struct ReconnectProfile {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub reset_delay_ms: u64,
    pub give_up_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    pub backoff: BackoffStrategy,
}

impl Default for ReconnectProfile {
    fn default() -> Self {
        EnvironmentProfile::Development.reconnect_profile()
    }
}

impl ReconnectProfile {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ReconnectAction` values.
pub enum ReconnectAction {
    RetryAfterDelay,
    ResetAndRetry,
    GiveUpTemporarily,
}

impl ReconnectAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetryAfterDelay => "retry_after_delay",
            Self::ResetAndRetry => "reset_and_retry",
            Self::GiveUpTemporarily => "give_up_temporarily",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectDecision {
    pub action: ReconnectAction,
    pub delay_ms: u64,
}

/// Retry-after-delay backoff for a streak of `attempt_count` completed retries.
///
/// Non-decreasing in `attempt_count` and never above `max_delay_ms`.
pub fn backoff_delay_ms(attempt_count: u32, profile: &ReconnectProfile) -> u64 {
    let raw = match profile.backoff {
        BackoffStrategy::Exponential => {
            let factor = 1_u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
            profile.base_delay_ms.saturating_mul(factor)
        }
        BackoffStrategy::Linear => profile
            .base_delay_ms
            .saturating_mul(u64::from(attempt_count).saturating_add(1)),
    };
    raw.min(profile.max_delay_ms)
}

pub fn decide(
    class: DisconnectClass,
    attempt_count: u32,
    profile: &ReconnectProfile,
) -> ReconnectDecision {
    if attempt_count >= profile.max_attempts {
        return ReconnectDecision {
            action: ReconnectAction::GiveUpTemporarily,
            delay_ms: profile.give_up_delay_ms,
        };
    }
    if class.requires_session_reset() {
        return ReconnectDecision {
            action: ReconnectAction::ResetAndRetry,
            delay_ms: profile.reset_delay_ms.min(profile.max_delay_ms),
        };
    }
    ReconnectDecision {
        action: ReconnectAction::RetryAfterDelay,
        delay_ms: backoff_delay_ms(attempt_count, profile),
    }
}
