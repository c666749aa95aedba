//! Tenant lifecycle routes. Lifecycle actions are accepted with 202 and run
//! in the background against the tenant's supervisor handle.

use wa_session::SessionState;

use super::*;

pub(super) async fn handle_health(State(state): State<Arc<ControlSurfaceState>>) -> Response {
    let statuses = state.registry().get_all_statuses().await;
    let connected = statuses
        .values()
        .filter(|snapshot| snapshot.is_connected())
        .count();
    let awaiting_qr = statuses
        .values()
        .filter(|snapshot| snapshot.state == SessionState::AwaitingQr)
        .count();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "tenants": statuses.len(),
            "connected": connected,
            "awaitingQr": awaiting_qr,
            "uptimeMs": current_unix_timestamp_ms().saturating_sub(state.started_unix_ms),
        })),
    )
        .into_response()
}

pub(super) async fn handle_tenants_list(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(error) = authorize_control_request(&state, &headers) {
        return error.into_response();
    }
    let tenants = state
        .registry()
        .list_status()
        .await
        .into_iter()
        .map(TenantStatusResponse::from)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "tenants": tenants }))).into_response()
}

pub(super) async fn handle_tenant_register(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = authorize_control_request(&state, &headers) {
        return error.into_response();
    }
    let request = match parse_control_json_body::<RegisterTenantRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let tenant_id = request.tenant_id.trim().to_string();
    if let Err(error) = state
        .registry()
        .register_tenant(&tenant_id, request.config)
        .await
    {
        return ControlApiError::from(error).into_response();
    }
    match state.registry().tenant_status(&tenant_id).await {
        Some(entry) => (
            StatusCode::CREATED,
            Json(TenantStatusResponse::from(entry)),
        )
            .into_response(),
        None => ControlApiError::internal(format!(
            "tenant '{tenant_id}' stopped during registration"
        ))
        .into_response(),
    }
}

pub(super) async fn handle_tenant_delete(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    if let Err(error) = authorize_control_request(&state, &headers) {
        return error.into_response();
    }
    if !state.registry().deregister_tenant(&tenant_id).await {
        return ControlApiError::tenant_not_found(&tenant_id).into_response();
    }
    (
        StatusCode::OK,
        Json(TenantActionResponse::accepted(&tenant_id, "tenant removed")),
    )
        .into_response()
}

pub(super) async fn handle_tenant_status(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    if let Err(error) = authorize_control_request(&state, &headers) {
        return error.into_response();
    }
    match state.registry().tenant_status(&tenant_id).await {
        Some(entry) => (StatusCode::OK, Json(TenantStatusResponse::from(entry))).into_response(),
        None => ControlApiError::tenant_not_found(&tenant_id).into_response(),
    }
}

pub(super) async fn handle_tenant_qr(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    if let Err(error) = authorize_control_request(&state, &headers) {
        return error.into_response();
    }
    let handle = match state.tenant_handle(&tenant_id).await {
        Ok(handle) => handle,
        Err(error) => return error.into_response(),
    };
    let raw = handle.status().qr_payload;
    let qr = match raw.as_deref().map(render_qr_svg_data_url).transpose() {
        Ok(qr) => qr,
        Err(error) => {
            return ControlApiError::internal(format!("failed to render pairing QR: {error}"))
                .into_response();
        }
    };
    (StatusCode::OK, Json(TenantQrResponse { qr, raw })).into_response()
}

#[derive(Clone, Copy)]
enum LifecycleAction {
    Logout,
    Restart,
    ForceRestart,
}

impl LifecycleAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Restart => "restart",
            Self::ForceRestart => "force_restart",
        }
    }

    fn accepted_message(self) -> &'static str {
        match self {
            Self::Logout => "logout started; a new QR will be required",
            Self::Restart => "restart started",
            Self::ForceRestart => "session wiped; restart started",
        }
    }
}

async fn run_lifecycle_action(handle: SupervisorHandle, action: LifecycleAction) {
    let tenant_id = handle.tenant_id().to_string();
    let result = match action {
        LifecycleAction::Logout => handle.logout().await,
        LifecycleAction::Restart => handle.restart(false).await.map(|_| ()),
        LifecycleAction::ForceRestart => handle.restart(true).await.map(|_| ()),
    };
    match result {
        Ok(()) => info!(tenant_id = %tenant_id, action = action.as_str(), "lifecycle action finished"),
        Err(error) => warn!(
            tenant_id = %tenant_id,
            action = action.as_str(),
            error = %error,
            "lifecycle action failed"
        ),
    }
}

async fn accept_lifecycle_action(
    state: &ControlSurfaceState,
    headers: &HeaderMap,
    tenant_id: &str,
    action: LifecycleAction,
) -> Response {
    if let Err(error) = authorize_control_request(state, headers) {
        return error.into_response();
    }
    let handle = match state.tenant_handle(tenant_id).await {
        Ok(handle) => handle,
        Err(error) => return error.into_response(),
    };
    tokio::spawn(run_lifecycle_action(handle, action));
    (
        StatusCode::ACCEPTED,
        Json(TenantActionResponse::accepted(
            tenant_id,
            action.accepted_message(),
        )),
    )
        .into_response()
}

pub(super) async fn handle_tenant_logout(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    accept_lifecycle_action(&state, &headers, &tenant_id, LifecycleAction::Logout).await
}

pub(super) async fn handle_tenant_restart(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    accept_lifecycle_action(&state, &headers, &tenant_id, LifecycleAction::Restart).await
}

pub(super) async fn handle_tenant_force_restart(
    State(state): State<Arc<ControlSurfaceState>>,
    headers: HeaderMap,
    AxumPath(tenant_id): AxumPath<String>,
) -> Response {
    accept_lifecycle_action(&state, &headers, &tenant_id, LifecycleAction::ForceRestart).await
}
