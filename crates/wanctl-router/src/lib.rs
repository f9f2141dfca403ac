//! Router-facing command channel.
//!
//! The daemons speak a narrow command surface against a MikroTik-family
//! router: queue rate get/set, queue statistics, mangle rule toggling,
//! and a liveness probe. Transport is SSH with key auth; transient
//! failures are retried with exponential backoff and every failure is
//! classified so the control loops can track connectivity.

pub mod client;
pub mod connectivity;
pub mod error;
pub mod parse;
pub mod retry;
pub mod ssh;
pub mod stats;
pub mod timeouts;

pub use client::RouterClient;
pub use connectivity::RouterConnectivity;
pub use error::{FailureKind, RouterError};
