//! Turns parsed flags into the runtime settings consumed by the bridge.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use anyhow::{bail, Result};
use wa_ai::OpenAiAssistantConfig;
use wa_session::{EnvironmentProfile, ReconnectProfile, SubprocessDeviceConfig};

use crate::{Cli, CliDeviceMode};

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
}

/// Starts from the selected environment preset and applies any overrides.
pub fn resolve_reconnect_profile(cli: &Cli) -> ReconnectProfile {
    let mut profile = EnvironmentProfile::from(cli.environment).reconnect_profile();
    if let Some(value) = cli.reconnect_base_delay_ms {
        profile.base_delay_ms = value;
    }
    if let Some(value) = cli.reconnect_max_delay_ms {
        profile.max_delay_ms = value;
    }
    if let Some(value) = cli.reconnect_max_attempts {
        profile.max_attempts = value;
    }
    if let Some(value) = cli.reconnect_reset_delay_ms {
        profile.reset_delay_ms = value;
    }
    if let Some(value) = cli.reconnect_give_up_delay_ms {
        profile.give_up_delay_ms = value;
    }
    if let Some(value) = cli.handshake_timeout_ms {
        profile.handshake_timeout_ms = value;
    }
    if let Some(value) = cli.reconnect_backoff {
        profile.backoff = value.into();
    }
    profile
}

pub fn openai_assistant_config(cli: &Cli) -> OpenAiAssistantConfig {
    OpenAiAssistantConfig {
        api_base: cli.openai_api_base.trim().trim_end_matches('/').to_string(),
        default_api_key: non_empty(cli.openai_api_key.as_deref()),
        request_timeout_ms: cli.openai_request_timeout_ms,
        max_retries: cli.openai_max_retries,
        run_poll_interval_ms: cli.assistant_run_poll_interval_ms,
        run_max_polls: cli.assistant_run_max_polls,
        thread_idle_ttl_ms: cli.assistant_thread_idle_ttl_ms,
        max_cached_threads: cli.assistant_max_cached_threads,
        ..OpenAiAssistantConfig::default()
    }
}

/// Returns the subprocess adapter settings, or `None` in loopback mode.
pub fn subprocess_device_config(cli: &Cli) -> Result<Option<SubprocessDeviceConfig>> {
    if cli.device_mode == CliDeviceMode::Loopback {
        return Ok(None);
    }
    let Some(command) = non_empty(cli.device_command.as_deref()) else {
        bail!("--device-command is required when --device-mode=subprocess");
    };
    Ok(Some(SubprocessDeviceConfig {
        command,
        args: cli.device_args.clone(),
        env: BTreeMap::new(),
    }))
}

/// Rejects flag combinations that would only fail later at runtime.
pub fn validate_cli_startup(cli: &Cli) -> Result<()> {
    if cli.bind.trim().parse::<SocketAddr>().is_err() {
        bail!("--bind must be a socket address (host:port), got '{}'", cli.bind);
    }
    if cli.openai_api_base.trim().is_empty() {
        bail!("--openai-api-base cannot be empty");
    }
    subprocess_device_config(cli)?;
    let profile = resolve_reconnect_profile(cli);
    if profile.max_delay_ms < profile.base_delay_ms {
        bail!(
            "reconnect max delay ({}ms) must be at least the base delay ({}ms)",
            profile.max_delay_ms,
            profile.base_delay_ms
        );
    }
    Ok(())
}
