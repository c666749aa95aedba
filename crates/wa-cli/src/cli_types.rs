use clap::ValueEnum;

use wa_session::{BackoffStrategy, EnvironmentProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliEnvironment {
    Development,
    Production,
}

impl From<CliEnvironment> for EnvironmentProfile {
    fn from(value: CliEnvironment) -> Self {
        match value {
            CliEnvironment::Development => EnvironmentProfile::Development,
            CliEnvironment::Production => EnvironmentProfile::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBackoffStrategy {
    Exponential,
    Linear,
}

impl From<CliBackoffStrategy> for BackoffStrategy {
    fn from(value: CliBackoffStrategy) -> Self {
        match value {
            CliBackoffStrategy::Exponential => BackoffStrategy::Exponential,
            CliBackoffStrategy::Linear => BackoffStrategy::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliDeviceMode` values.
pub enum CliDeviceMode {
    /// External WhatsApp Web client speaking NDJSON over stdio.
    Subprocess,
    /// In-process device that never talks to WhatsApp; pairing is simulated.
    Loopback,
}
