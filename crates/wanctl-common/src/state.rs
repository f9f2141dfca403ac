//! Persistent per-WAN state file.
//!
//! A small JSON document survives daemon restarts so the controller does
//! not re-learn the baseline and rates from scratch. Writes are atomic
//! (temp file in the same directory, fsync, rename) so a concurrent
//! reader never observes a partial document.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::zone::Zone;

/// Autorate state persisted after every successful cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WanState {
    pub baseline_rtt: f64,
    pub load_rtt: f64,
    pub download_rate_bps: u64,
    pub upload_rate_bps: u64,
    pub zone: Zone,
    pub last_cycle_ts: i64,
}

impl Default for WanState {
    fn default() -> Self {
        WanState {
            baseline_rtt: 0.0,
            load_rtt: 0.0,
            download_rate_bps: 0,
            upload_rate_bps: 0,
            zone: Zone::Green,
            last_cycle_ts: 0,
        }
    }
}

/// Steering state persisted on every transition and cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringStateFile {
    pub steering_enabled: bool,
    pub fsm_state: String,
    pub last_cycle_ts: i64,
}

impl Default for SteeringStateFile {
    fn default() -> Self {
        SteeringStateFile {
            steering_enabled: false,
            fsm_state: "PRIMARY_GOOD".into(),
            last_cycle_ts: 0,
        }
    }
}

/// Atomically replace `path` with the JSON serialization of `value`.
///
/// The temp file is created in the target's directory so the final
/// rename stays on one filesystem, and is chmod'd 0600 before any data
/// lands in it.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;

    let json = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a JSON state file, falling back to `T::default()` when the file
/// is missing or unparseable. A corrupt state file is worth a warning
/// but never worth refusing to start.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, using defaults");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wan.state.json");
        let state = WanState {
            baseline_rtt: 18.4,
            load_rtt: 22.1,
            download_rate_bps: 800_000_000,
            upload_rate_bps: 35_000_000,
            zone: Zone::Yellow,
            last_cycle_ts: 1_700_000_000,
        };
        atomic_write_json(&path, &state).unwrap();

        let read: WanState = read_json_or_default(&path);
        assert_eq!(read.download_rate_bps, 800_000_000);
        assert_eq!(read.zone, Zone::Yellow);
    }

    #[test]
    fn written_file_is_owner_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wan.state.json");
        atomic_write_json(&path, &WanState::default()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let state: WanState = read_json_or_default(Path::new("/nonexistent/wan.json"));
        assert_eq!(state.download_rate_bps, 0);
        assert_eq!(state.zone, Zone::Green);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wan.state.json");
        fs::write(&path, "{not json").unwrap();
        let state: WanState = read_json_or_default(&path);
        assert_eq!(state.last_cycle_ts, 0);
    }

    #[test]
    fn overwrite_never_leaves_partials() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wan.state.json");
        for ts in 0..50 {
            let state = WanState {
                last_cycle_ts: ts,
                ..Default::default()
            };
            atomic_write_json(&path, &state).unwrap();
            // Every read between writes must parse.
            let read: WanState = read_json_or_default(&path);
            assert_eq!(read.last_cycle_ts, ts);
        }
    }
}
