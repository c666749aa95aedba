//! Control surface server bootstrap.

use super::*;

/// Serves the control routes until `shutdown` resolves.
pub async fn run_control_surface_server<F>(
    config: ControlSurfaceServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind control surface on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound control surface address")?;
    info!(
        addr = %local_addr,
        auth = config.auth_token.is_some(),
        "control surface listening"
    );

    let state = Arc::new(ControlSurfaceState::new(config));
    let app = build_control_surface_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("control surface server exited unexpectedly")?;
    info!("control surface stopped");
    Ok(())
}
