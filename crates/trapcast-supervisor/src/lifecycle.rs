//! Subsystem lifecycle for the simulator and trap receiver workers.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use trapcast_core::{
    Broadcaster, EventMessage, MibSummary, SimulatorSnapshot, SimulatorStatus, StateSource, Stats,
    TrapReceiverStatus, format_uptime,
};

use crate::{
    command::{CommandBuildError, CommandBuilder},
    process::WorkerProcess,
    stats::StatsStore,
};

/// Supervisor error.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Command build error: {0}")]
    Command(#[from] CommandBuildError),
    #[error("Failed to spawn {worker}: {source}")]
    SpawnFailed {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker state lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for SupervisorError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

/// Worker command lines and defaults.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Base command of the SNMP simulator worker.
    pub simulator_command: String,
    /// Base command of the trap receiver worker.
    pub trap_receiver_command: String,
    pub simulator_port: u16,
    pub community: String,
    pub trap_port: u16,
    /// How long a worker gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
    /// Pause between the stop and start legs of a restart.
    pub restart_pause: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            simulator_command: "python workers/snmp_simulator.py".into(),
            trap_receiver_command: "python workers/trap_receiver.py".into(),
            simulator_port: 1061,
            community: "public".into(),
            trap_port: 1162,
            stop_grace: Duration::from_secs(2),
            restart_pause: Duration::from_millis(500),
        }
    }
}

/// Optional overrides for a simulator start.
#[derive(Debug, Clone, Default)]
pub struct SimulatorOverrides {
    pub port: Option<u16>,
    pub community: Option<String>,
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Started { pid: Option<u32> },
    Restarted { pid: Option<u32> },
    AlreadyRunning { pid: Option<u32> },
    Stopped,
    NotRunning,
}

struct SimulatorSlot {
    process: Option<WorkerProcess>,
    port: u16,
    community: String,
}

struct TrapReceiverSlot {
    process: Option<WorkerProcess>,
    port: u16,
    community: String,
    resolve_mibs: bool,
}

fn live_pid(process: &mut Option<WorkerProcess>) -> Option<Option<u32>> {
    let p = process.as_mut()?;
    p.is_alive().then(|| p.pid())
}

/// Owns the worker processes and the counters, and serves as the
/// `StateSource` for snapshots.
///
/// Every mutating operation takes the broadcaster to publish through,
/// and publishes `status` first, then `stats` when a counter changed.
pub struct Supervisor {
    settings: WorkerSettings,
    simulator: Mutex<SimulatorSlot>,
    traps: Mutex<TrapReceiverSlot>,
    stats: StatsStore,
    mibs: Mutex<MibSummary>,
}

impl Supervisor {
    /// Create a supervisor with nothing running.
    #[must_use]
    pub fn new(settings: WorkerSettings, stats: StatsStore) -> Self {
        let simulator = SimulatorSlot {
            process: None,
            port: settings.simulator_port,
            community: settings.community.clone(),
        };
        let traps = TrapReceiverSlot {
            process: None,
            port: settings.trap_port,
            community: settings.community.clone(),
            resolve_mibs: true,
        };
        Self {
            settings,
            simulator: Mutex::new(simulator),
            traps: Mutex::new(traps),
            stats,
            mibs: Mutex::new(MibSummary::default()),
        }
    }

    /// Access the counters.
    #[must_use]
    pub const fn stats_store(&self) -> &StatsStore {
        &self.stats
    }

    /// Start the simulator.
    ///
    /// # Errors
    /// Returns error if the worker cannot be spawned.
    pub fn start_simulator(
        &self,
        overrides: SimulatorOverrides,
        broadcaster: &dyn Broadcaster,
    ) -> Result<LifecycleOutcome, SupervisorError> {
        let pid = {
            let mut slot = self.simulator.lock()?;
            if let Some(pid) = live_pid(&mut slot.process) {
                return Ok(LifecycleOutcome::AlreadyRunning { pid });
            }
            if let Some(port) = overrides.port {
                slot.port = port;
            }
            if let Some(community) = overrides.community {
                slot.community = community;
            }
            self.spawn_simulator(&mut slot)?
        };

        self.stats.update(|s| s.simulator.start_count += 1);
        self.publish(broadcaster, true);
        Ok(LifecycleOutcome::Started { pid })
    }

    /// Stop the simulator, accumulating its run time.
    ///
    /// # Errors
    /// Returns error if the worker state lock is poisoned.
    pub async fn stop_simulator(
        &self,
        broadcaster: &dyn Broadcaster,
    ) -> Result<LifecycleOutcome, SupervisorError> {
        let process = self.simulator.lock()?.process.take();
        let Some(process) = process else {
            return Ok(LifecycleOutcome::NotRunning);
        };

        let ran_for = self.stop_worker(process).await;
        self.stats.update(|s| {
            s.simulator.stop_count += 1;
            s.simulator.simulator_run_seconds += ran_for.as_secs();
        });
        self.publish(broadcaster, true);
        Ok(LifecycleOutcome::Stopped)
    }

    /// Restart the simulator with its last port and community.
    ///
    /// # Errors
    /// Returns error if the worker cannot be spawned.
    pub async fn restart_simulator(
        &self,
        broadcaster: &dyn Broadcaster,
    ) -> Result<LifecycleOutcome, SupervisorError> {
        let process = self.simulator.lock()?.process.take();
        if let Some(process) = process {
            let ran_for = self.stop_worker(process).await;
            self.stats.update(|s| {
                s.simulator.stop_count += 1;
                s.simulator.simulator_run_seconds += ran_for.as_secs();
            });
        }

        tokio::time::sleep(self.settings.restart_pause).await;

        let spawned = {
            let mut slot = self.simulator.lock()?;
            self.spawn_simulator(&mut slot)
        };
        let pid = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                // The stop leg already changed state.
                self.publish(broadcaster, true);
                return Err(e);
            }
        };

        self.stats.update(|s| s.simulator.restart_count += 1);
        self.publish(broadcaster, true);
        Ok(LifecycleOutcome::Restarted { pid })
    }

    /// Start the trap receiver.
    ///
    /// # Errors
    /// Returns error if the worker cannot be spawned.
    pub fn start_trap_receiver(
        &self,
        port: u16,
        community: &str,
        resolve_mibs: bool,
        broadcaster: &dyn Broadcaster,
    ) -> Result<LifecycleOutcome, SupervisorError> {
        let pid = {
            let mut slot = self.traps.lock()?;
            if let Some(pid) = live_pid(&mut slot.process) {
                return Ok(LifecycleOutcome::AlreadyRunning { pid });
            }
            slot.port = port;
            slot.community = community.to_string();
            slot.resolve_mibs = resolve_mibs;

            let parts = CommandBuilder::new(&self.settings.trap_receiver_command)
                .flag("--port", slot.port)
                .flag("--community", &slot.community)
                .flag("--resolve-mibs", resolve_mibs)
                .build()?;
            let process = WorkerProcess::spawn("trap-receiver", &parts).map_err(|source| {
                SupervisorError::SpawnFailed {
                    worker: "trap-receiver",
                    source,
                }
            })?;
            let pid = process.pid();
            slot.process = Some(process);
            pid
        };

        self.publish(broadcaster, false);
        Ok(LifecycleOutcome::Started { pid })
    }

    /// Stop the trap receiver.
    ///
    /// # Errors
    /// Returns error if the worker state lock is poisoned.
    pub async fn stop_trap_receiver(
        &self,
        broadcaster: &dyn Broadcaster,
    ) -> Result<LifecycleOutcome, SupervisorError> {
        let process = self.traps.lock()?.process.take();
        let Some(process) = process else {
            return Ok(LifecycleOutcome::NotRunning);
        };

        self.stop_worker(process).await;
        self.publish(broadcaster, false);
        Ok(LifecycleOutcome::Stopped)
    }

    /// Apply a counter mutation made by external glue and publish `stats`.
    pub fn update_stats<F>(&self, f: F, broadcaster: &dyn Broadcaster) -> Stats
    where
        F: FnOnce(&mut Stats),
    {
        self.stats.update(f);
        let updated = StateSource::stats(self);
        broadcaster.broadcast(&EventMessage::Stats {
            data: updated.clone(),
        });
        updated
    }

    /// Record a new MIB summary and publish `mibs`.
    pub fn set_mib_summary(&self, summary: MibSummary, broadcaster: &dyn Broadcaster) {
        *lock_or_recover(&self.mibs) = summary;
        broadcaster.broadcast(&EventMessage::Mibs { mibs: summary });
    }

    /// Stop both workers without publishing anything.
    pub async fn shutdown(&self) {
        let simulator = lock_or_recover(&self.simulator).process.take();
        if let Some(process) = simulator {
            self.stop_worker(process).await;
            tracing::info!("Shutdown: simulator stopped");
        }
        let traps = lock_or_recover(&self.traps).process.take();
        if let Some(process) = traps {
            self.stop_worker(process).await;
            tracing::info!("Shutdown: trap receiver stopped");
        }
        if let Err(e) = self.stats.persist() {
            tracing::warn!("Failed to flush stats on shutdown: {e}");
        }
    }

    fn spawn_simulator(&self, slot: &mut SimulatorSlot) -> Result<Option<u32>, SupervisorError> {
        let parts = CommandBuilder::new(&self.settings.simulator_command)
            .flag("--port", slot.port)
            .flag("--community", &slot.community)
            .build()?;
        let process = WorkerProcess::spawn("simulator", &parts).map_err(|source| {
            SupervisorError::SpawnFailed {
                worker: "simulator",
                source,
            }
        })?;
        let pid = process.pid();
        slot.process = Some(process);
        Ok(pid)
    }

    async fn stop_worker(&self, process: WorkerProcess) -> Duration {
        let ran_for = process.uptime();
        if let Err(e) = process.stop(self.settings.stop_grace).await {
            tracing::warn!("Failed to stop worker cleanly: {e}");
        }
        ran_for
    }

    fn publish(&self, broadcaster: &dyn Broadcaster, counters_changed: bool) {
        broadcaster.broadcast(&EventMessage::status(self));
        if counters_changed {
            broadcaster.broadcast(&EventMessage::stats(self));
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateSource for Supervisor {
    fn simulator(&self) -> SimulatorSnapshot {
        let mut slot = lock_or_recover(&self.simulator);
        let alive = slot.process.as_mut().is_some_and(WorkerProcess::is_alive);
        let status = SimulatorStatus::stopped(slot.port, slot.community.clone());
        match slot.process.as_ref().filter(|_| alive) {
            Some(p) => SimulatorSnapshot {
                status: SimulatorStatus {
                    running: true,
                    pid: p.pid(),
                    ..status
                },
                uptime: Some(format_uptime(p.uptime().as_secs())),
            },
            None => SimulatorSnapshot {
                status,
                uptime: None,
            },
        }
    }

    fn trap_receiver(&self) -> TrapReceiverStatus {
        let mut slot = lock_or_recover(&self.traps);
        let alive = slot.process.as_mut().is_some_and(WorkerProcess::is_alive);
        match slot.process.as_ref().filter(|_| alive) {
            Some(p) => TrapReceiverStatus {
                running: true,
                pid: p.pid(),
                port: slot.port,
                resolve_mibs: Some(slot.resolve_mibs),
            },
            None => TrapReceiverStatus::stopped(slot.port),
        }
    }

    /// Stored counters with the MIB figures taken from the live summary.
    fn stats(&self) -> Stats {
        let mut stats = self.stats.snapshot();
        stats.apply_mib_summary(&lock_or_recover(&self.mibs));
        stats
    }

    fn mibs(&self) -> MibSummary {
        *lock_or_recover(&self.mibs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventMessage>>);

    impl Broadcaster for Recorder {
        fn broadcast(&self, message: &EventMessage) -> usize {
            self.0.lock().unwrap().push(message.clone());
            1
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<EventMessage> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            // Extra params land in the shell's positional args.
            simulator_command: "sh -c 'sleep 30' simulator".into(),
            trap_receiver_command: "sh -c 'sleep 30' trap-receiver".into(),
            stop_grace: Duration::from_secs(2),
            restart_pause: Duration::from_millis(10),
            ..WorkerSettings::default()
        }
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let supervisor = Supervisor::new(WorkerSettings::default(), StatsStore::in_memory());
        let sim = supervisor.simulator();
        assert!(!sim.status.running);
        assert_eq!(sim.status.port, 1061);
        assert_eq!(sim.status.community, "public");
        assert!(sim.uptime.is_none());
        assert_eq!(supervisor.trap_receiver(), TrapReceiverStatus::stopped(1162));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_publishes_status_then_stats() {
        let supervisor = Supervisor::new(settings(), StatsStore::in_memory());
        let recorder = Recorder::default();

        let outcome = supervisor
            .start_simulator(SimulatorOverrides::default(), &recorder)
            .unwrap();
        assert!(matches!(outcome, LifecycleOutcome::Started { pid: Some(_) }));

        let events = recorder.take();
        assert_eq!(events.len(), 2);
        let EventMessage::Status { simulator, traps } = &events[0] else {
            panic!("expected status first, got {:?}", events[0].kind());
        };
        assert!(simulator.running);
        assert!(!traps.running);
        let EventMessage::Stats { data } = &events[1] else {
            panic!("expected stats second");
        };
        assert_eq!(data.simulator.start_count, 1);

        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_already_running_publishes_nothing() {
        let supervisor = Supervisor::new(settings(), StatsStore::in_memory());
        let recorder = Recorder::default();

        supervisor
            .start_simulator(SimulatorOverrides::default(), &recorder)
            .unwrap();
        recorder.take();

        let outcome = supervisor
            .start_simulator(SimulatorOverrides::default(), &recorder)
            .unwrap();
        assert!(matches!(outcome, LifecycleOutcome::AlreadyRunning { .. }));
        assert!(recorder.take().is_empty());
        assert_eq!(supervisor.stats().simulator.start_count, 1);

        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_and_restart_counters() {
        let supervisor = Supervisor::new(settings(), StatsStore::in_memory());
        let recorder = Recorder::default();

        supervisor
            .start_simulator(
                SimulatorOverrides {
                    port: Some(2061),
                    community: Some("private".into()),
                },
                &recorder,
            )
            .unwrap();
        let outcome = supervisor.restart_simulator(&recorder).await.unwrap();
        assert!(matches!(outcome, LifecycleOutcome::Restarted { .. }));

        let sim = supervisor.simulator();
        assert!(sim.status.running);
        assert_eq!(sim.status.port, 2061);
        assert_eq!(sim.status.community, "private");

        let outcome = supervisor.stop_simulator(&recorder).await.unwrap();
        assert_eq!(outcome, LifecycleOutcome::Stopped);

        let stats = supervisor.stats();
        assert_eq!(stats.simulator.start_count, 1);
        assert_eq!(stats.simulator.restart_count, 1);
        assert_eq!(stats.simulator.stop_count, 2);

        let events = recorder.take();
        let kinds: Vec<_> = events.iter().map(EventMessage::kind).collect();
        assert_eq!(kinds, ["status", "stats", "status", "stats", "status", "stats"]);
        let EventMessage::Status { simulator, .. } = &events[4] else {
            panic!("expected status");
        };
        assert!(!simulator.running);

        assert_eq!(
            supervisor.stop_simulator(&recorder).await.unwrap(),
            LifecycleOutcome::NotRunning
        );
        assert!(recorder.take().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trap_receiver_publishes_status_only() {
        let supervisor = Supervisor::new(settings(), StatsStore::in_memory());
        let recorder = Recorder::default();

        supervisor
            .start_trap_receiver(1162, "public", false, &recorder)
            .unwrap();
        let status = supervisor.trap_receiver();
        assert!(status.running);
        assert_eq!(status.resolve_mibs, Some(false));

        supervisor.stop_trap_receiver(&recorder).await.unwrap();
        let kinds: Vec<_> = recorder.take().iter().map(EventMessage::kind).collect();
        assert_eq!(kinds, ["status", "status"]);
        assert_eq!(supervisor.trap_receiver().resolve_mibs, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_publishes_nothing() {
        let supervisor = Supervisor::new(
            WorkerSettings {
                simulator_command: "definitely-not-a-real-binary-xyz".into(),
                ..WorkerSettings::default()
            },
            StatsStore::in_memory(),
        );
        let recorder = Recorder::default();

        let err = supervisor
            .start_simulator(SimulatorOverrides::default(), &recorder)
            .unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { worker: "simulator", .. }));
        assert!(recorder.take().is_empty());
        assert_eq!(supervisor.stats().simulator.start_count, 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_stats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let supervisor = Supervisor::new(WorkerSettings::default(), StatsStore::open(&path));
        assert!(!path.exists());

        supervisor.shutdown().await;
        let written: Stats = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, Stats::default());
    }

    #[test]
    fn test_mib_summary_and_stats_updates_publish() {
        let supervisor = Supervisor::new(WorkerSettings::default(), StatsStore::in_memory());
        let recorder = Recorder::default();

        let summary = MibSummary {
            loaded: 12,
            failed: 1,
            total: 13,
            traps_available: 40,
        };
        supervisor.set_mib_summary(summary, &recorder);
        supervisor.update_stats(|s| s.mibs.upload_count += 2, &recorder);

        assert_eq!(supervisor.mibs(), summary);
        let events = recorder.take();
        assert_eq!(events[0], EventMessage::Mibs { mibs: summary });
        let EventMessage::Stats { data } = &events[1] else {
            panic!("expected stats");
        };
        assert_eq!(data.mibs.upload_count, 2);
        assert_eq!(data.mibs.loaded_mibs, 12);
        assert_eq!(data.mibs.total_mibs, 13);
    }
}
