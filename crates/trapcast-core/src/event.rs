//! Server-push event messages.

use serde::{Deserialize, Serialize};

use crate::{
    state::{MibSummary, SimulatorSnapshot, SimulatorStatus, Stats, TrapReceiverStatus},
    traits::StateSource,
};

/// One variable binding of a received trap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Varbind {
    pub oid: String,
    /// Symbolic name when the OID resolved against a loaded MIB.
    #[serde(default)]
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub resolved: bool,
}

/// A trap record as persisted and emitted by the trap receiver worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(default)]
    pub time_str: String,
    /// Sender as `ip:port`.
    pub source: String,
    pub trap_type: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub varbinds: Vec<Varbind>,
}

/// Message pushed from server to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    /// Complete snapshot, sent once right after admission.
    FullState {
        simulator: SimulatorSnapshot,
        traps: TrapReceiverStatus,
        stats: Stats,
        mibs: MibSummary,
    },
    /// Lifecycle change of either managed subsystem.
    Status {
        simulator: SimulatorStatus,
        traps: TrapReceiverStatus,
    },
    /// A newly received trap.
    Trap { trap: TrapRecord },
    /// Counters after a counter-affecting mutation.
    Stats { data: Stats },
    /// MIB summary after a MIB mutation.
    Mibs { mibs: MibSummary },
}

impl EventMessage {
    /// Build a `status` message from the current state.
    #[must_use]
    pub fn status(source: &dyn StateSource) -> Self {
        Self::Status {
            simulator: source.simulator().status,
            traps: source.trap_receiver(),
        }
    }

    /// Build a `stats` message from the current counters.
    #[must_use]
    pub fn stats(source: &dyn StateSource) -> Self {
        Self::Stats {
            data: source.stats(),
        }
    }

    /// Wrap a trap record.
    #[must_use]
    pub const fn trap(trap: TrapRecord) -> Self {
        Self::Trap { trap }
    }

    /// The wire `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FullState { .. } => "full_state",
            Self::Status { .. } => "status",
            Self::Trap { .. } => "trap",
            Self::Stats { .. } => "stats",
            Self::Mibs { .. } => "mibs",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl StateSource for Fixed {
        fn simulator(&self) -> SimulatorSnapshot {
            SimulatorSnapshot {
                status: SimulatorStatus {
                    running: true,
                    pid: Some(4242),
                    port: 1061,
                    community: "public".into(),
                },
                uptime: Some("0:00:12".into()),
            }
        }

        fn trap_receiver(&self) -> TrapReceiverStatus {
            TrapReceiverStatus::stopped(1162)
        }

        fn stats(&self) -> Stats {
            let mut stats = Stats::default();
            stats.simulator.start_count = 2;
            stats
        }
    }

    #[test]
    fn test_status_omits_uptime() {
        let json = serde_json::to_value(EventMessage::status(&Fixed)).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["simulator"]["running"], true);
        assert_eq!(json["simulator"]["pid"], 4242);
        assert!(json["simulator"].get("uptime").is_none());
        assert_eq!(json["traps"]["running"], false);
        assert!(json["traps"]["resolve_mibs"].is_null());
    }

    #[test]
    fn test_stats_wraps_counters_in_data() {
        let json = serde_json::to_value(EventMessage::stats(&Fixed)).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["data"]["simulator"]["start_count"], 2);
        assert!(json["data"]["walker"].is_object());
        assert!(json["data"]["mibs"].is_object());
    }

    #[test]
    fn test_trap_parses_worker_payload() {
        let payload = r#"{
            "type": "trap",
            "trap": {
                "timestamp": 1718000000.25,
                "time_str": "2024-06-10 06:13:20",
                "source": "192.168.1.10:52341",
                "trap_type": "linkDown",
                "resolved": true,
                "varbinds": [
                    {"oid": "1.3.6.1.2.1.2.2.1.1.3", "name": "ifIndex.3", "value": "3", "resolved": true}
                ]
            }
        }"#;
        let msg: EventMessage = serde_json::from_str(payload).unwrap();
        assert_eq!(msg.kind(), "trap");
        let EventMessage::Trap { trap } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(trap.source, "192.168.1.10:52341");
        assert_eq!(trap.trap_type, "linkDown");
        assert_eq!(trap.varbinds[0].name, "ifIndex.3");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<EventMessage>(r#"{"type":"bogus"}"#).is_err());
    }
}
