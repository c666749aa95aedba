//! Per-tenant WhatsApp session lifecycle.
//!
//! Each tenant gets one supervisor task that owns its device session, its
//! on-disk session store and its reconnection schedule. Device adapters talk
//! to the supervisor only through a generation-tagged [`DeviceEventSink`], so
//! events from superseded connection attempts are discarded instead of
//! corrupting the live state.

pub mod device;
pub mod disconnect;
pub mod loopback_device;
pub mod reconnect_policy;
pub mod registry;
pub mod session_store;
pub mod subprocess_device;
pub mod supervisor;

pub use device::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceIdentity, DeviceOpenRequest, DeviceSession,
    DeviceSessionFactory, InboundDeviceMessage,
};
pub use disconnect::{classify_disconnect, DisconnectClass, DisconnectReason};
pub use loopback_device::{LoopbackDevice, LoopbackDeviceFactory, LoopbackSentMessage};
pub use reconnect_policy::{
    backoff_delay_ms, decide, BackoffStrategy, EnvironmentProfile, ReconnectAction,
    ReconnectDecision, ReconnectProfile,
};
pub use registry::{
    RegistryError, TenantConfig, TenantRegistry, TenantRegistryConfig, TenantStatusEntry,
};
pub use session_store::{tenant_state_dir, validate_tenant_id, SessionStore, SessionStoreError};
pub use subprocess_device::{SubprocessDeviceConfig, SubprocessDeviceFactory};
pub use supervisor::{
    spawn_supervisor, ConnectedIdentity, InboundContext, InboundMessageHandler, InitializeOutcome,
    InitializeTrigger, PendingRetry, SessionState, SupervisorConfig, SupervisorError,
    SupervisorEvent, SupervisorHandle, TenantSessionSnapshot,
};
