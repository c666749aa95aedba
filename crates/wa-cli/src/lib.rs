//! CLI argument models and startup resolution for the WhatsApp bridge.
//!
//! Exposes the clap-backed [`Cli`] plus helpers that turn parsed flags into
//! reconnect profiles, assistant client settings and tenant seed lists.

pub mod cli_args;
pub mod cli_types;
pub mod runtime_profile;
pub mod tenants_file;

pub use cli_args::Cli;
pub use cli_types::*;
pub use runtime_profile::*;
pub use tenants_file::*;
