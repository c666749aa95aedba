use std::path::PathBuf;

use clap::Parser;

use crate::{CliBackoffStrategy, CliDeviceMode, CliEnvironment};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "wa-bridge",
    about = "Multi-tenant WhatsApp bridge that answers direct chats with per-tenant AI assistants",
    version
)]
/// Public struct `Cli` used by the bridge binary.
pub struct Cli {
    #[arg(
        long,
        env = "WA_BRIDGE_ENVIRONMENT",
        value_enum,
        default_value_t = CliEnvironment::Development,
        help = "Reconnect profile preset: development (fast retries) or production (conservative retries)"
    )]
    pub environment: CliEnvironment,

    #[arg(
        long = "state-dir",
        env = "WA_BRIDGE_STATE_DIR",
        default_value = ".wa-bridge",
        help = "Root directory for per-tenant session credentials and pause state"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long,
        env = "WA_BRIDGE_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address for the HTTP control surface (host:port)"
    )]
    pub bind: String,

    #[arg(
        long = "tenants-file",
        env = "WA_BRIDGE_TENANTS_FILE",
        help = "Optional JSON array of tenant configs registered at startup"
    )]
    pub tenants_file: Option<PathBuf>,

    #[arg(
        long = "device-mode",
        env = "WA_BRIDGE_DEVICE_MODE",
        value_enum,
        default_value_t = CliDeviceMode::Subprocess,
        help = "Device adapter: subprocess (external WhatsApp Web client) or loopback (simulated, for local development)"
    )]
    pub device_mode: CliDeviceMode,

    #[arg(
        long = "device-command",
        env = "WA_BRIDGE_DEVICE_COMMAND",
        help = "Executable launched once per connection attempt when --device-mode=subprocess"
    )]
    pub device_command: Option<String>,

    #[arg(
        long = "device-arg",
        env = "WA_BRIDGE_DEVICE_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true,
        help = "Additional argument(s) passed to --device-command"
    )]
    pub device_args: Vec<String>,

    #[arg(
        long = "openai-api-base",
        env = "WA_BRIDGE_OPENAI_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI Assistants API"
    )]
    pub openai_api_base: String,

    #[arg(
        long = "openai-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "Default OpenAI API key for tenants registered without their own key"
    )]
    pub openai_api_key: Option<String>,

    #[arg(
        long = "openai-request-timeout-ms",
        env = "WA_BRIDGE_OPENAI_REQUEST_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for each OpenAI request in milliseconds"
    )]
    pub openai_request_timeout_ms: u64,

    #[arg(
        long = "openai-max-retries",
        env = "WA_BRIDGE_OPENAI_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for transient OpenAI failures (429, 5xx, transport errors)"
    )]
    pub openai_max_retries: usize,

    #[arg(
        long = "assistant-run-poll-interval-ms",
        env = "WA_BRIDGE_ASSISTANT_RUN_POLL_INTERVAL_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Delay between assistant run status polls in milliseconds"
    )]
    pub assistant_run_poll_interval_ms: u64,

    #[arg(
        long = "assistant-run-max-polls",
        env = "WA_BRIDGE_ASSISTANT_RUN_MAX_POLLS",
        default_value_t = 30,
        value_parser = parse_positive_usize,
        help = "Maximum run status polls before a reply is abandoned"
    )]
    pub assistant_run_max_polls: usize,

    #[arg(
        long = "assistant-thread-idle-ttl-ms",
        env = "WA_BRIDGE_ASSISTANT_THREAD_IDLE_TTL_MS",
        default_value_t = 86_400_000,
        value_parser = parse_positive_u64,
        help = "Idle time after which a sender's cached assistant thread is dropped"
    )]
    pub assistant_thread_idle_ttl_ms: u64,

    #[arg(
        long = "assistant-max-cached-threads",
        env = "WA_BRIDGE_ASSISTANT_MAX_CACHED_THREADS",
        default_value_t = 10_000,
        value_parser = parse_positive_usize,
        help = "Upper bound on cached assistant threads across all tenants"
    )]
    pub assistant_max_cached_threads: usize,

    #[arg(
        long = "control-auth-token",
        env = "WA_BRIDGE_CONTROL_AUTH_TOKEN",
        hide_env_values = true,
        help = "Bearer token required by the control surface; unset leaves it open"
    )]
    pub control_auth_token: Option<String>,

    #[arg(
        long = "reconnect-base-delay-ms",
        env = "WA_BRIDGE_RECONNECT_BASE_DELAY_MS",
        value_parser = parse_positive_u64,
        help = "Override the profile's first retry delay in milliseconds"
    )]
    pub reconnect_base_delay_ms: Option<u64>,

    #[arg(
        long = "reconnect-max-delay-ms",
        env = "WA_BRIDGE_RECONNECT_MAX_DELAY_MS",
        value_parser = parse_positive_u64,
        help = "Override the profile's retry delay cap in milliseconds"
    )]
    pub reconnect_max_delay_ms: Option<u64>,

    #[arg(
        long = "reconnect-max-attempts",
        env = "WA_BRIDGE_RECONNECT_MAX_ATTEMPTS",
        value_parser = parse_positive_u32,
        help = "Override the consecutive failures tolerated before giving up"
    )]
    pub reconnect_max_attempts: Option<u32>,

    #[arg(
        long = "reconnect-reset-delay-ms",
        env = "WA_BRIDGE_RECONNECT_RESET_DELAY_MS",
        value_parser = parse_positive_u64,
        help = "Override the delay before re-pairing after a session wipe"
    )]
    pub reconnect_reset_delay_ms: Option<u64>,

    #[arg(
        long = "reconnect-give-up-delay-ms",
        env = "WA_BRIDGE_RECONNECT_GIVE_UP_DELAY_MS",
        value_parser = parse_positive_u64,
        help = "Override the cooldown after giving up before a fresh cycle starts"
    )]
    pub reconnect_give_up_delay_ms: Option<u64>,

    #[arg(
        long = "handshake-timeout-ms",
        env = "WA_BRIDGE_HANDSHAKE_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Override how long a connection attempt may go without QR or ready"
    )]
    pub handshake_timeout_ms: Option<u64>,

    #[arg(
        long = "reconnect-backoff",
        env = "WA_BRIDGE_RECONNECT_BACKOFF",
        value_enum,
        help = "Override the retry delay growth: exponential or linear"
    )]
    pub reconnect_backoff: Option<CliBackoffStrategy>,
}
