//! wanctl steering — confidence-gated WAN failover for latency traffic.
//!
//! Watches the primary WAN's congestion signals, accumulates a 0-100
//! confidence score from named contributors, and drives a two-state
//! machine through sustain, hold-down, and recovery timers. On sustained
//! degradation it enables one pre-existing mangle rule (by comment) that
//! diverts latency-sensitive traffic to the secondary WAN; after proven
//! recovery it drains back. A flap brake escalates the steer threshold
//! when transitions pile up.

pub mod classify;
pub mod confidence;
pub mod config;
pub mod daemon;
pub mod flap;
pub mod fsm;
pub mod health;
pub mod timers;
