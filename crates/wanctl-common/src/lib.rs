//! Shared substrate for the wanctl daemons.
//!
//! Everything both daemons need but neither owns: the congestion zone
//! model, cycle samples, EWMA math, the YAML config base layer, atomic
//! state files, the single-instance lock, shutdown signalling, and the
//! systemd notification side channel.

pub mod config;
pub mod ewma;
pub mod lock;
pub mod probe;
pub mod sample;
pub mod shutdown;
pub mod state;
pub mod systemd;
pub mod zone;

/// Crate version reported by the health endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
