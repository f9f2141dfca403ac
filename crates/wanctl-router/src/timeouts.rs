//! Timeout constants for router operations.
//!
//! Centralized so the autorate loop, steering loop, and calibration
//! tooling cannot drift apart.

use std::time::Duration;

/// SSH connection establishment.
pub const CONNECT: Duration = Duration::from_secs(10);

/// Command wall-clock budget for the autorate loop (tight cycle).
pub const AUTORATE_COMMAND: Duration = Duration::from_secs(15);

/// Command wall-clock budget for the steering loop (can afford more).
pub const STEERING_COMMAND: Duration = Duration::from_secs(30);

/// Command wall-clock budget for one-shot calibration reads.
pub const CALIBRATE_COMMAND: Duration = Duration::from_secs(10);
