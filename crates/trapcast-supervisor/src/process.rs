//! Worker process handles.

use std::{
    io,
    time::{Duration, Instant},
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};

use crate::command::CommandParts;

/// A spawned worker running in its own process group.
pub struct WorkerProcess {
    name: &'static str,
    child: AsyncGroupChild,
    pid: Option<u32>,
    started_at: Instant,
}

impl WorkerProcess {
    /// Spawn `parts` as a new process group.
    ///
    /// # Errors
    /// Returns error if the program cannot be spawned.
    pub fn spawn(name: &'static str, parts: &CommandParts) -> io::Result<Self> {
        let child = parts.to_command().group_spawn()?;
        let pid = child.id();
        tracing::info!(worker = name, ?pid, program = %parts.program, "Worker started");
        Ok(Self {
            name,
            child,
            pid,
            started_at: Instant::now(),
        })
    }

    /// Process id of the group leader.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Time since spawn.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the process has not exited yet.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::debug!(worker = self.name, %status, "Worker has exited");
                false
            }
            Err(e) => {
                tracing::warn!(worker = self.name, "Failed to poll worker: {e}");
                false
            }
        }
    }

    /// Terminate the process group, killing it if it outlives `grace`.
    ///
    /// Returns how long the worker ran.
    ///
    /// # Errors
    /// Returns error if the group cannot be signalled or reaped.
    pub async fn stop(mut self, grace: Duration) -> io::Result<Duration> {
        let ran_for = self.uptime();
        if !self.is_alive() {
            return Ok(ran_for);
        }

        self.terminate()?;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(worker = self.name, %status, "Worker stopped");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(
                    worker = self.name,
                    grace_ms = grace.as_millis(),
                    "Worker ignored terminate, killing"
                );
                self.child.kill().await?;
            }
        }
        Ok(ran_for)
    }

    #[cfg(unix)]
    fn terminate(&self) -> io::Result<()> {
        use command_group::{Signal, UnixChildExt};

        self.child.signal(Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let parts = CommandBuilder::new("sleep 30").build().unwrap();
        let mut worker = WorkerProcess::spawn("test", &parts).unwrap();
        assert!(worker.pid().is_some());
        assert!(worker.is_alive());

        worker.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let parts = CommandBuilder::new("sh -c \"trap '' TERM; sleep 30\"")
            .build()
            .unwrap();
        let worker = WorkerProcess::spawn("stubborn", &parts).unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        worker.stop(Duration::from_millis(200)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let parts = CommandBuilder::new("definitely-not-a-real-binary-xyz")
            .build()
            .unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(WorkerProcess::spawn("missing", &parts).is_err());
    }
}
