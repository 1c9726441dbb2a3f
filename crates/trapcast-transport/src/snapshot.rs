//! Full-state snapshot for newly admitted connections.

use trapcast_core::{EventMessage, StateSource};

/// Compose a `full_state` message from the current state.
///
/// Counters are taken as the source reports them, so later `stats`
/// messages built from the same source carry the same figures.
#[must_use]
pub fn full_state(source: &dyn StateSource) -> EventMessage {
    EventMessage::FullState {
        simulator: source.simulator(),
        traps: source.trap_receiver(),
        stats: source.stats(),
        mibs: source.mibs(),
    }
}

#[cfg(test)]
mod tests {
    use trapcast_core::{
        MibSummary, SimulatorSnapshot, SimulatorStatus, Stats, TrapReceiverStatus,
    };

    use super::*;

    struct Idle;

    impl StateSource for Idle {
        fn simulator(&self) -> SimulatorSnapshot {
            SimulatorSnapshot {
                status: SimulatorStatus::stopped(1061, "public"),
                uptime: None,
            }
        }

        fn trap_receiver(&self) -> TrapReceiverStatus {
            TrapReceiverStatus::stopped(1162)
        }

        fn stats(&self) -> Stats {
            let mut stats = Stats::default();
            stats.mibs.upload_count = 5;
            stats
        }

        fn mibs(&self) -> MibSummary {
            MibSummary {
                loaded: 7,
                failed: 2,
                total: 9,
                traps_available: 31,
            }
        }
    }

    #[test]
    fn test_full_state_schema() {
        let json = serde_json::to_value(full_state(&Idle)).unwrap();
        assert_eq!(json["type"], "full_state");
        assert_eq!(json["simulator"]["running"], false);
        assert!(json["simulator"]["uptime"].is_null());
        assert_eq!(json["traps"]["port"], 1162);
        assert_eq!(json["stats"]["mibs"]["upload_count"], 5);
        assert_eq!(json["mibs"]["traps_available"], 31);
        for section in ["simulator", "traps", "walker", "mibs"] {
            assert!(json["stats"][section].is_object(), "missing stats.{section}");
        }
    }

    #[derive(Default)]
    struct Recorder(std::sync::Mutex<Vec<EventMessage>>);

    impl trapcast_core::Broadcaster for Recorder {
        fn broadcast(&self, message: &EventMessage) -> usize {
            self.0.lock().unwrap().push(message.clone());
            1
        }
    }

    #[test]
    fn test_mib_counters_match_between_snapshot_and_later_stats() {
        use trapcast_supervisor::{StatsStore, Supervisor, WorkerSettings};

        let supervisor = Supervisor::new(WorkerSettings::default(), StatsStore::in_memory());
        let recorder = Recorder::default();
        supervisor.set_mib_summary(
            MibSummary {
                loaded: 7,
                failed: 2,
                total: 9,
                traps_available: 31,
            },
            &recorder,
        );

        let EventMessage::FullState { stats: snapshot, .. } = full_state(&supervisor) else {
            panic!("expected full_state");
        };
        let updated = supervisor.update_stats(|s| s.walker.walk_count += 1, &recorder);

        assert_eq!(snapshot.mibs.loaded_mibs, 7);
        assert_eq!(snapshot.mibs.failed_mibs, 2);
        assert_eq!(snapshot.mibs.total_mibs, 9);
        assert_eq!(updated.mibs, snapshot.mibs);

        let events = recorder.0.lock().unwrap();
        let Some(EventMessage::Stats { data }) = events.last() else {
            panic!("expected stats event");
        };
        assert_eq!(data.mibs, snapshot.mibs);
        assert_eq!(data.walker.walk_count, 1);
    }
}
