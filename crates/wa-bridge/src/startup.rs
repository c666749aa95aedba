//! Wires the CLI settings into a running bridge.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use wa_ai::{AssistantDirectory, OpenAiAssistantClient};
use wa_cli::{
    load_tenants_file, openai_assistant_config, resolve_reconnect_profile,
    subprocess_device_config, validate_cli_startup, Cli, TenantSeed,
};
use wa_gateway::{run_control_surface_server, ControlSurfaceServerConfig};
use wa_router::MessageRouter;
use wa_session::{
    DeviceSessionFactory, LoopbackDeviceFactory, SubprocessDeviceFactory, TenantRegistry,
    TenantRegistryConfig,
};

pub(crate) fn build_tenant_registry(cli: &Cli) -> Result<TenantRegistry> {
    validate_cli_startup(cli)?;
    let profile = resolve_reconnect_profile(cli);
    let assistants = AssistantDirectory::new();
    let assistant_client =
        OpenAiAssistantClient::new(openai_assistant_config(cli), assistants.clone())
            .context("failed to build OpenAI assistant client")?;
    let router = MessageRouter::new(Arc::new(assistant_client), cli.state_dir.clone());

    let device_factory: Arc<dyn DeviceSessionFactory> = match subprocess_device_config(cli)? {
        Some(config) => {
            info!(command = %config.command, "using subprocess device adapter");
            Arc::new(SubprocessDeviceFactory::new(config))
        }
        None => {
            warn!("using loopback device adapter; no WhatsApp traffic will be exchanged");
            Arc::new(LoopbackDeviceFactory::with_auto_qr())
        }
    };

    info!(
        state_dir = %cli.state_dir.display(),
        base_delay_ms = profile.base_delay_ms,
        max_delay_ms = profile.max_delay_ms,
        max_attempts = profile.max_attempts,
        backoff = profile.backoff.as_str(),
        "reconnect profile resolved"
    );
    Ok(TenantRegistry::new(TenantRegistryConfig {
        state_dir: cli.state_dir.clone(),
        profile,
        device_factory,
        inbound_handler: Arc::new(router),
        assistants,
    }))
}

/// Registers every seed, skipping the ones the registry rejects.
pub(crate) async fn seed_tenants(registry: &TenantRegistry, seeds: Vec<TenantSeed>) -> usize {
    let mut registered = 0;
    for seed in seeds {
        match registry.register_tenant(&seed.tenant_id, seed.config).await {
            Ok(_) => registered += 1,
            Err(error) => warn!(
                tenant_id = %seed.tenant_id,
                error = %error,
                "failed to register tenant from tenants file"
            ),
        }
    }
    registered
}

pub(crate) async fn run_bridge<F>(cli: Cli, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = build_tenant_registry(&cli)?;
    if let Some(path) = cli.tenants_file.as_deref() {
        let seeds = load_tenants_file(path)?;
        let total = seeds.len();
        let registered = seed_tenants(&registry, seeds).await;
        info!(registered, total, "tenants file applied");
    }

    let served = run_control_surface_server(
        ControlSurfaceServerConfig {
            bind: cli.bind.clone(),
            auth_token: cli.control_auth_token.clone(),
            registry: registry.clone(),
        },
        shutdown,
    )
    .await;
    registry.shutdown_all().await;
    info!("all tenant supervisors stopped");
    served
}
