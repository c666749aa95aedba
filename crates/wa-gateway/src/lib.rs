//! HTTP control surface for the WhatsApp bridge.
//!
//! Exposes per-tenant status, pairing QR and lifecycle actions (logout,
//! restart, force-restart) plus tenant registration over axum.

mod control_surface;

pub use control_surface::{run_control_surface_server, ControlSurfaceServerConfig};
