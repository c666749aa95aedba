//! Tenant registry: at most one supervisor per tenant id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use wa_ai::{AssistantBinding, AssistantDirectory};

use crate::{
    spawn_supervisor, validate_tenant_id, DeviceSessionFactory, InboundMessageHandler,
    ReconnectProfile, SessionStore, SessionStoreError, SupervisorConfig, SupervisorError,
    SupervisorHandle, TenantSessionSnapshot,
};

fn default_auto_start() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Per-tenant settings supplied at registration.
pub struct TenantConfig {
    #[serde(default)]
    pub display_name: String,
    pub assistant_id: String,
    #[serde(default, skip_serializing)]
    pub openai_api_key: Option<String>,
    /// Initializes the device session right after registration.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

impl TenantConfig {
    pub fn new(display_name: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            assistant_id: assistant_id.into(),
            openai_api_key: None,
            auto_start: true,
        }
    }

    fn assistant_binding(&self) -> AssistantBinding {
        let binding = AssistantBinding::new(self.assistant_id.trim());
        match self.openai_api_key.as_deref() {
            Some(api_key) => binding.with_api_key(api_key),
            None => binding,
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `RegistryError` values.
pub enum RegistryError {
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("invalid tenant config for '{tenant_id}': {reason}")]
    InvalidConfig { tenant_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatusEntry {
    pub tenant_id: String,
    pub display_name: Option<String>,
    pub snapshot: TenantSessionSnapshot,
}

/// Shared collaborators every supervisor the registry spawns is built with.
pub struct TenantRegistryConfig {
    pub state_dir: PathBuf,
    pub profile: ReconnectProfile,
    pub device_factory: Arc<dyn DeviceSessionFactory>,
    pub inbound_handler: Arc<dyn InboundMessageHandler>,
    pub assistants: AssistantDirectory,
}

struct RegistryInner {
    config: TenantRegistryConfig,
    supervisors: RwLock<BTreeMap<String, SupervisorHandle>>,
    tenants: RwLock<BTreeMap<String, TenantConfig>>,
}

#[derive(Clone)]
/// Cloneable registry of tenant supervisors.
///
/// The map lock is only held while looking up or inserting handles; control
/// calls run against the cloned handle.
pub struct TenantRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tenants = self
            .inner
            .supervisors
            .try_read()
            .map(|supervisors| supervisors.len())
            .ok();
        f.debug_struct("TenantRegistry")
            .field("state_dir", &self.inner.config.state_dir)
            .field("tenants", &tenants)
            .finish()
    }
}

impl TenantRegistry {
    pub fn new(config: TenantRegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                supervisors: RwLock::new(BTreeMap::new()),
                tenants: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.inner.config.state_dir
    }

    pub fn profile(&self) -> &ReconnectProfile {
        &self.inner.config.profile
    }

    pub fn assistants(&self) -> &AssistantDirectory {
        &self.inner.config.assistants
    }

    /// Returns the live supervisor for `tenant_id`, spawning an idle one if needed.
    pub async fn get_or_create(&self, tenant_id: &str) -> Result<SupervisorHandle, RegistryError> {
        validate_tenant_id(tenant_id)?;
        if let Some(handle) = self.get(tenant_id).await {
            return Ok(handle);
        }

        let mut supervisors = self.inner.supervisors.write().await;
        if let Some(handle) = supervisors.get(tenant_id) {
            if !handle.is_stopped() {
                return Ok(handle.clone());
            }
        }
        let session_store = SessionStore::for_tenant(&self.inner.config.state_dir, tenant_id)?;
        let handle = spawn_supervisor(SupervisorConfig {
            tenant_id: tenant_id.to_string(),
            profile: self.inner.config.profile,
            session_store,
            device_factory: Arc::clone(&self.inner.config.device_factory),
            inbound_handler: Arc::clone(&self.inner.config.inbound_handler),
        });
        supervisors.insert(tenant_id.to_string(), handle.clone());
        info!(tenant_id, "tenant supervisor created");
        Ok(handle)
    }

    pub async fn get(&self, tenant_id: &str) -> Option<SupervisorHandle> {
        self.inner
            .supervisors
            .read()
            .await
            .get(tenant_id)
            .filter(|handle| !handle.is_stopped())
            .cloned()
    }

    /// Shuts the tenant's supervisor down, then forgets it. Returns false for unknown tenants.
    pub async fn remove(&self, tenant_id: &str) -> bool {
        let Some(handle) = self.inner.supervisors.read().await.get(tenant_id).cloned() else {
            return false;
        };
        if let Err(error) = handle.shutdown().await {
            warn!(tenant_id, error = %error, "tenant supervisor shutdown failed");
        }
        let mut supervisors = self.inner.supervisors.write().await;
        if supervisors
            .get(tenant_id)
            .is_some_and(|current| current.same_supervisor(&handle))
        {
            supervisors.remove(tenant_id);
        }
        info!(tenant_id, "tenant supervisor removed");
        true
    }

    /// Binds the tenant's assistant, creates its supervisor and, unless
    /// `auto_start` is off, starts the first connection attempt.
    pub async fn register_tenant(
        &self,
        tenant_id: &str,
        config: TenantConfig,
    ) -> Result<SupervisorHandle, RegistryError> {
        validate_tenant_id(tenant_id)?;
        if config.assistant_id.trim().is_empty() {
            return Err(RegistryError::InvalidConfig {
                tenant_id: tenant_id.to_string(),
                reason: "assistantId must not be empty".to_string(),
            });
        }

        self.inner
            .config
            .assistants
            .bind(tenant_id, config.assistant_binding());
        let auto_start = config.auto_start;
        self.inner
            .tenants
            .write()
            .await
            .insert(tenant_id.to_string(), config);

        let handle = self.get_or_create(tenant_id).await?;
        if auto_start {
            let outcome = handle.initialize().await?;
            info!(
                tenant_id,
                generation = outcome.generation(),
                "tenant registered and initializing"
            );
        } else {
            info!(tenant_id, "tenant registered");
        }
        Ok(handle)
    }

    /// Removes the supervisor, the tenant config and the assistant binding,
    /// then lets the inbound handler drop what it cached for the tenant.
    pub async fn deregister_tenant(&self, tenant_id: &str) -> bool {
        let had_supervisor = self.remove(tenant_id).await;
        let had_config = self.inner.tenants.write().await.remove(tenant_id).is_some();
        let had_binding = self.inner.config.assistants.unbind(tenant_id).is_some();
        self.inner.config.inbound_handler.release_tenant(tenant_id);
        had_supervisor || had_config || had_binding
    }

    pub async fn tenant_config(&self, tenant_id: &str) -> Option<TenantConfig> {
        self.inner.tenants.read().await.get(tenant_id).cloned()
    }

    pub async fn tenant_status(&self, tenant_id: &str) -> Option<TenantStatusEntry> {
        let handle = self.get(tenant_id).await?;
        let display_name = self.display_name(tenant_id).await;
        Some(TenantStatusEntry {
            tenant_id: tenant_id.to_string(),
            display_name,
            snapshot: handle.status(),
        })
    }

    /// Status of every live tenant, ordered by tenant id.
    pub async fn list_status(&self) -> Vec<TenantStatusEntry> {
        let handles = self.live_handles().await;
        let tenants = self.inner.tenants.read().await;
        handles
            .into_iter()
            .map(|(tenant_id, handle)| TenantStatusEntry {
                display_name: tenants
                    .get(&tenant_id)
                    .map(|config| config.display_name.clone())
                    .filter(|name| !name.is_empty()),
                snapshot: handle.status(),
                tenant_id,
            })
            .collect()
    }

    pub async fn get_all_statuses(&self) -> BTreeMap<String, TenantSessionSnapshot> {
        self.live_handles()
            .await
            .into_iter()
            .map(|(tenant_id, handle)| (tenant_id, handle.status()))
            .collect()
    }

    pub async fn tenant_count(&self) -> usize {
        self.live_handles().await.len()
    }

    /// Stops every supervisor concurrently and empties the registry.
    pub async fn shutdown_all(&self) {
        let drained = std::mem::take(&mut *self.inner.supervisors.write().await);
        let count = drained.len();
        join_all(drained.into_iter().map(|(tenant_id, handle)| async move {
            if let Err(error) = handle.shutdown().await {
                warn!(tenant_id = %tenant_id, error = %error, "tenant supervisor shutdown failed");
            }
        }))
        .await;
        info!(tenants = count, "all tenant supervisors shut down");
    }

    async fn display_name(&self, tenant_id: &str) -> Option<String> {
        self.inner
            .tenants
            .read()
            .await
            .get(tenant_id)
            .map(|config| config.display_name.clone())
            .filter(|name| !name.is_empty())
    }

    async fn live_handles(&self) -> Vec<(String, SupervisorHandle)> {
        self.inner
            .supervisors
            .read()
            .await
            .iter()
            .filter(|(_, handle)| !handle.is_stopped())
            .map(|(tenant_id, handle)| (tenant_id.clone(), handle.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use wa_ai::AssistantDirectory;

    use super::{RegistryError, TenantConfig, TenantRegistry, TenantRegistryConfig};
    use crate::{
        DeviceSession, EnvironmentProfile, InboundContext, InboundDeviceMessage,
        InboundMessageHandler, LoopbackDeviceFactory, SessionState, SessionStoreError,
    };

    #[derive(Default)]
    struct IgnoreInbound {
        released: Mutex<Vec<String>>,
    }

    impl IgnoreInbound {
        fn released(&self) -> Vec<String> {
            self.released.lock().expect("released lock").clone()
        }
    }

    #[async_trait]
    impl InboundMessageHandler for IgnoreInbound {
        async fn handle_inbound(
            &self,
            _context: InboundContext,
            _device: Arc<dyn DeviceSession>,
            _message: InboundDeviceMessage,
        ) {
        }

        fn release_tenant(&self, tenant_id: &str) {
            self.released
                .lock()
                .expect("released lock")
                .push(tenant_id.to_string());
        }
    }

    fn registry_fixture_with_handler() -> (
        TenantRegistry,
        LoopbackDeviceFactory,
        Arc<IgnoreInbound>,
        TempDir,
    ) {
        let temp = tempfile::tempdir().expect("tempdir");
        let factory = LoopbackDeviceFactory::with_auto_qr();
        let handler = Arc::new(IgnoreInbound::default());
        let registry = TenantRegistry::new(TenantRegistryConfig {
            state_dir: temp.path().to_path_buf(),
            profile: EnvironmentProfile::Development.reconnect_profile(),
            device_factory: Arc::new(factory.clone()),
            inbound_handler: handler.clone(),
            assistants: AssistantDirectory::new(),
        });
        (registry, factory, handler, temp)
    }

    fn registry_fixture() -> (TenantRegistry, LoopbackDeviceFactory, TempDir) {
        let (registry, factory, _handler, temp) = registry_fixture_with_handler();
        (registry, factory, temp)
    }

    #[tokio::test]
    async fn functional_register_binds_assistant_and_initializes() {
        let (registry, factory, _temp) = registry_fixture();
        let mut config = TenantConfig::new("Acme Store", "asst_acme");
        config.openai_api_key = Some("sk-acme".to_string());
        let handle = registry
            .register_tenant("acme", config)
            .await
            .expect("register");

        let binding = registry.assistants().get("acme").expect("binding");
        assert_eq!(binding.assistant_id, "asst_acme");
        assert_eq!(binding.api_key.as_deref(), Some("sk-acme"));

        factory.next_opened().await.expect("device opened");
        let mut status = handle.watch_status();
        status
            .wait_for(|snapshot| snapshot.state == SessionState::AwaitingQr)
            .await
            .expect("awaiting qr");

        let entries = registry.list_status().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, "acme");
        assert_eq!(entries[0].display_name.as_deref(), Some("Acme Store"));
        assert!(entries[0].snapshot.has_qr());
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn unit_get_or_create_returns_one_supervisor_per_tenant() {
        let (registry, factory, _temp) = registry_fixture();
        let first = registry.get_or_create("acme").await.expect("first");
        let second = registry.get_or_create("acme").await.expect("second");
        first.initialize().await.expect("initialize");
        assert_eq!(second.status().generation, 1);
        assert_eq!(registry.tenant_count().await, 1);
        assert_eq!(factory.open_count(), 1);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn regression_invalid_registrations_are_rejected() {
        let (registry, _factory, _temp) = registry_fixture();
        assert!(matches!(
            registry.get_or_create("../escape").await,
            Err(RegistryError::SessionStore(
                SessionStoreError::InvalidTenantId(_)
            ))
        ));
        assert!(matches!(
            registry
                .register_tenant("acme", TenantConfig::new("Acme", "  "))
                .await,
            Err(RegistryError::InvalidConfig { .. })
        ));
        assert!(registry.assistants().is_empty());
        assert_eq!(registry.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn functional_deregister_shuts_down_and_unbinds() {
        let (registry, _factory, _temp) = registry_fixture();
        let handle = registry
            .register_tenant("acme", TenantConfig::new("Acme", "asst_acme"))
            .await
            .expect("register");

        assert!(registry.deregister_tenant("acme").await);
        assert!(handle.is_stopped());
        assert!(registry.get("acme").await.is_none());
        assert!(registry.tenant_config("acme").await.is_none());
        assert!(registry.assistants().get("acme").is_none());
        assert!(!registry.deregister_tenant("acme").await);
    }

    #[tokio::test]
    async fn integration_shutdown_all_stops_every_tenant() {
        let (registry, _factory, _temp) = registry_fixture();
        let mut paused = TenantConfig::new("Beta", "asst_beta");
        paused.auto_start = false;
        let beta = registry
            .register_tenant("beta", paused)
            .await
            .expect("beta");
        let acme = registry
            .register_tenant("acme", TenantConfig::new("Acme", "asst_acme"))
            .await
            .expect("acme");
        assert_eq!(beta.status().state, SessionState::Idle);

        let statuses = registry.get_all_statuses().await;
        assert_eq!(statuses.keys().collect::<Vec<_>>(), vec!["acme", "beta"]);

        registry.shutdown_all().await;
        assert!(acme.is_stopped());
        assert!(beta.is_stopped());
        assert!(registry.list_status().await.is_empty());
    }

    #[test]
    fn unit_tenant_config_defaults_auto_start_and_hides_api_key() {
        let config: TenantConfig = serde_json::from_str(
            r#"{"displayName":"Acme","assistantId":"asst_1","openaiApiKey":"sk-secret"}"#,
        )
        .expect("parse");
        assert!(config.auto_start);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-secret"));
        let rendered = serde_json::to_string(&config).expect("render");
        assert!(!rendered.contains("sk-secret"));
    }

    #[tokio::test]
    async fn regression_deregister_releases_tenant_state_in_handler() {
        let (registry, _factory, handler, _temp) = registry_fixture_with_handler();
        registry
            .register_tenant("acme", TenantConfig::new("Acme", "asst_acme"))
            .await
            .expect("register");
        registry
            .register_tenant("globex", TenantConfig::new("Globex", "asst_globex"))
            .await
            .expect("register");

        assert!(registry.deregister_tenant("acme").await);
        assert_eq!(handler.released(), vec!["acme".to_string()]);
        assert!(registry.get("globex").await.is_some());
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn unit_registry_debug_reports_state_dir_and_tenant_count() {
        let (registry, _factory, temp) = registry_fixture();
        registry.get_or_create("acme").await.expect("acme");
        let rendered = format!("{registry:?}");
        assert!(rendered.contains("TenantRegistry"));
        assert!(rendered.contains(&temp.path().display().to_string()));
        assert!(rendered.contains("tenants: Some(1)"));
        registry.shutdown_all().await;
    }
}
