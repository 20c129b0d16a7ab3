//! Real worker process spawning
//!
//! Spawns the worker with piped stdio and relays its output lines into the
//! supervisor's own logs under a `[worker_N]` tag, so one terminal shows the
//! whole system.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{WorkerExit, WorkerLaunchSpec, WorkerProcess, WorkerSpawner};
use shared::{process_debug, ProcessId};

/// Spawner backed by `tokio::process`
///
/// Launch arguments and environment come entirely from the launch spec; the spawner
/// only owns stdio wiring and process handles.
pub struct RealWorkerSpawner;

impl RealWorkerSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealWorkerSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerSpawner for RealWorkerSpawner {
    async fn spawn(&self, spec: &WorkerLaunchSpec) -> SupervisorResult<Box<dyn WorkerProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            worker_id: spec.worker_id,
            message: format!("{}: {e}", spec.program),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            worker_id: spec.worker_id,
            message: "process exited before a pid was assigned".to_string(),
        })?;

        spawn_output_relays(&mut child, spec.worker_id);

        process_debug!(
            ProcessId::current(),
            "🚀 Spawned worker_{} (PID: {}) via {}",
            spec.worker_id,
            pid,
            spec.program
        );

        Ok(Box::new(RealWorkerProcess { pid, child }))
    }
}

/// Forward the child's stdout/stderr line-by-line into our tracing output
///
/// Keeps the pipes drained so the worker never blocks on a full pipe, and
/// tags every line with the worker id.
fn spawn_output_relays(child: &mut Child, worker_id: u32) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(target: "worker_output", "[worker_{worker_id}] {line}");
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "worker_output", "[worker_{worker_id}] {line}");
            }
        });
    }
}

/// Handle for a spawned worker process
struct RealWorkerProcess {
    pid: u32,
    child: Child,
}

#[async_trait]
impl WorkerProcess for RealWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> WorkerExit {
        match self.child.wait().await {
            Ok(status) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;

                WorkerExit {
                    code: status.code(),
                    signal,
                }
            }
            // wait() only fails if the handle was already reaped
            Err(_) => WorkerExit {
                code: None,
                signal: None,
            },
        }
    }

    async fn terminate(&mut self) -> SupervisorResult<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
                Err(e) => Err(SupervisorError::process(format!(
                    "SIGTERM to pid {} failed: {e}",
                    self.pid
                ))),
            }
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| SupervisorError::process(format!("terminate failed: {e}")))
        }
    }

    async fn kill(&mut self) -> SupervisorResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| SupervisorError::process(format!("kill pid {} failed: {e}", self.pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let spawner = RealWorkerSpawner::new();
        let spec = WorkerLaunchSpec::new(1, "/nonexistent/worker-binary");

        let result = spawner.spawn(&spec).await;
        assert!(matches!(result, Err(SupervisorError::SpawnFailed { worker_id: 1, .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_wait_and_kill_real_process() {
        let spawner = RealWorkerSpawner::new();
        let spec = WorkerLaunchSpec::new(1, "sleep").with_args(vec!["30".to_string()]);

        let mut process = spawner.spawn(&spec).await.unwrap();
        assert!(process.pid() > 0);

        process.kill().await.unwrap();
        let exit = process.wait().await;
        assert!(!exit.is_clean());
    }
}
