use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wa_core::current_unix_timestamp_ms;
use wa_session::{RegistryError, SessionStoreError, SupervisorHandle, TenantRegistry};

mod auth_runtime;
mod qr_render;
mod server_bootstrap;
mod tenant_handlers;
mod types;

use auth_runtime::authorize_control_request;
use qr_render::render_qr_svg_data_url;
pub use server_bootstrap::run_control_surface_server;
use tenant_handlers::{
    handle_health, handle_tenant_delete, handle_tenant_force_restart, handle_tenant_logout,
    handle_tenant_qr, handle_tenant_register, handle_tenant_restart, handle_tenant_status,
    handle_tenants_list,
};
use types::{
    ControlApiError, RegisterTenantRequest, TenantActionResponse, TenantQrResponse,
    TenantStatusResponse,
};

const HEALTH_ENDPOINT: &str = "/health";
const TENANTS_ENDPOINT: &str = "/tenants";
const TENANT_ENDPOINT: &str = "/tenants/{tenant_id}";
const TENANT_STATUS_ENDPOINT: &str = "/tenants/{tenant_id}/status";
const TENANT_QR_ENDPOINT: &str = "/tenants/{tenant_id}/qr";
const TENANT_LOGOUT_ENDPOINT: &str = "/tenants/{tenant_id}/logout";
const TENANT_RESTART_ENDPOINT: &str = "/tenants/{tenant_id}/restart";
const TENANT_FORCE_RESTART_ENDPOINT: &str = "/tenants/{tenant_id}/force-restart";

#[derive(Clone)]
/// Public struct `ControlSurfaceServerConfig` used by the bridge runtime.
pub struct ControlSurfaceServerConfig {
    pub bind: String,
    /// Bearer token required on every route except `/health`. `None` disables auth.
    pub auth_token: Option<String>,
    pub registry: TenantRegistry,
}

struct ControlSurfaceState {
    config: ControlSurfaceServerConfig,
    started_unix_ms: u64,
    auth_failures: AtomicU64,
}

impl ControlSurfaceState {
    fn new(config: ControlSurfaceServerConfig) -> Self {
        Self {
            config,
            started_unix_ms: current_unix_timestamp_ms(),
            auth_failures: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> &TenantRegistry {
        &self.config.registry
    }

    async fn tenant_handle(&self, tenant_id: &str) -> Result<SupervisorHandle, ControlApiError> {
        self.registry()
            .get(tenant_id)
            .await
            .ok_or_else(|| ControlApiError::tenant_not_found(tenant_id))
    }
}

fn build_control_surface_router(state: Arc<ControlSurfaceState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(
            TENANTS_ENDPOINT,
            get(handle_tenants_list).post(handle_tenant_register),
        )
        .route(TENANT_ENDPOINT, axum::routing::delete(handle_tenant_delete))
        .route(TENANT_STATUS_ENDPOINT, get(handle_tenant_status))
        .route(TENANT_QR_ENDPOINT, get(handle_tenant_qr))
        .route(TENANT_LOGOUT_ENDPOINT, post(handle_tenant_logout))
        .route(TENANT_RESTART_ENDPOINT, post(handle_tenant_restart))
        .route(
            TENANT_FORCE_RESTART_ENDPOINT,
            post(handle_tenant_force_restart),
        )
        .with_state(state)
}

fn parse_control_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ControlApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        ControlApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}
