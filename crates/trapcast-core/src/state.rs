//! Status and counter records for the managed subsystems.

use serde::{Deserialize, Serialize};

/// Lifecycle status of the SNMP simulator worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorStatus {
    /// Whether the worker process is alive.
    pub running: bool,
    /// Process id while running.
    pub pid: Option<u32>,
    /// UDP port the simulator answers on.
    pub port: u16,
    /// Community string the simulator accepts.
    pub community: String,
}

impl SimulatorStatus {
    /// Status of a simulator that has not been started.
    #[must_use]
    pub fn stopped(port: u16, community: impl Into<String>) -> Self {
        Self {
            running: false,
            pid: None,
            port,
            community: community.into(),
        }
    }
}

/// Simulator status enriched with uptime, as carried by `full_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorSnapshot {
    #[serde(flatten)]
    pub status: SimulatorStatus,
    /// Human readable uptime (`H:MM:SS`), `None` while stopped.
    pub uptime: Option<String>,
}

/// Lifecycle status of the trap receiver worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapReceiverStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    /// Only reported while running.
    pub resolve_mibs: Option<bool>,
}

impl TrapReceiverStatus {
    /// Status of a receiver that has not been started.
    #[must_use]
    pub const fn stopped(port: u16) -> Self {
        Self {
            running: false,
            pid: None,
            port,
            resolve_mibs: None,
        }
    }
}

/// Simulator lifecycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorCounters {
    pub start_count: u64,
    pub stop_count: u64,
    pub restart_count: u64,
    /// Accumulated run time across completed runs.
    pub simulator_run_seconds: u64,
}

/// Trap counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapCounters {
    pub received_count: u64,
    pub sent_count: u64,
}

/// SNMP walker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerCounters {
    pub walk_count: u64,
    pub get_count: u64,
    pub oids_walked: u64,
}

/// MIB management counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MibCounters {
    pub upload_count: u64,
    pub reload_count: u64,
    pub delete_count: u64,
    pub loaded_mibs: u64,
    pub failed_mibs: u64,
    pub total_mibs: u64,
}

/// Aggregate counters for every subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub simulator: SimulatorCounters,
    pub traps: TrapCounters,
    pub walker: WalkerCounters,
    pub mibs: MibCounters,
}

impl Stats {
    /// Mirror the live MIB summary into the MIB counters.
    pub const fn apply_mib_summary(&mut self, summary: &MibSummary) {
        self.mibs.loaded_mibs = summary.loaded;
        self.mibs.failed_mibs = summary.failed;
        self.mibs.total_mibs = summary.loaded + summary.failed;
    }
}

/// Compact MIB summary pushed to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MibSummary {
    pub loaded: u64,
    pub failed: u64,
    pub total: u64,
    pub traps_available: u64,
}

/// Format an uptime in seconds as `H:MM:SS`, prefixed with days past 24h.
#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    match days {
        0 => format!("{hours}:{minutes:02}:{secs:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{secs:02}"),
        n => format!("{n} days, {hours}:{minutes:02}:{secs:02}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(3_725), "1:02:05");
        assert_eq!(format_uptime(86_400 + 61), "1 day, 0:01:01");
        assert_eq!(format_uptime(3 * 86_400 + 7_200), "3 days, 2:00:00");
    }

    #[test]
    fn test_stats_missing_fields_default_to_zero() {
        let stats: Stats =
            serde_json::from_str(r#"{"simulator":{"start_count":4},"mibs":{}}"#).unwrap();
        assert_eq!(stats.simulator.start_count, 4);
        assert_eq!(stats.simulator.stop_count, 0);
        assert_eq!(stats.walker, WalkerCounters::default());
    }

    #[test]
    fn test_snapshot_flattens_status() {
        let snapshot = SimulatorSnapshot {
            status: SimulatorStatus::stopped(1061, "public"),
            uptime: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["running"], false);
        assert_eq!(value["port"], 1061);
        assert_eq!(value["community"], "public");
        assert!(value["pid"].is_null());
        assert!(value["uptime"].is_null());
    }
}
