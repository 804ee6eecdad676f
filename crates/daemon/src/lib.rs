// Convoy Daemon - Composition Root support
// Shared with the CLI so both read the same configuration

pub mod config;
pub mod events;

pub use config::DaemonConfig;
