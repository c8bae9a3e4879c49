// Subprocess lifecycle: Running -> Terminating -> Exited
//
// Termination is always graceful first (SIGTERM), then SIGKILL once the
// grace window lapses. Children are spawned with kill_on_drop so a panic or
// an early return still reaps them.

use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminating,
    Exited,
}

struct Inner {
    child: Child,
    state: ProcessState,
    exit_code: Option<i32>,
}

/// Owned child process handle
pub struct ManagedProcess {
    name: String,
    pid: Option<u32>,
    grace: Duration,
    inner: Mutex<Inner>,
}

impl ManagedProcess {
    pub fn new(name: &str, child: Child, grace: Duration) -> Self {
        Self {
            name: name.to_string(),
            pid: child.id(),
            grace,
            inner: Mutex::new(Inner {
                child,
                state: ProcessState::Running,
                exit_code: None,
            }),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current state, polling the child for an exit it has not reported yet
    pub async fn state(&self) -> ProcessState {
        let mut inner = self.inner.lock().await;
        if inner.state == ProcessState::Running {
            if let Ok(Some(status)) = inner.child.try_wait() {
                inner.exit_code = status.code();
                inner.state = ProcessState::Exited;
            }
        }
        inner.state
    }

    /// Stop the process and reap it. Idempotent; returns the exit code when
    /// the process reported one.
    pub async fn terminate(&self) -> Option<i32> {
        let mut inner = self.inner.lock().await;
        if inner.state == ProcessState::Exited {
            return inner.exit_code;
        }
        inner.state = ProcessState::Terminating;

        if let Ok(Some(status)) = inner.child.try_wait() {
            debug!(target: "process", backend = %self.name, "Process already exited");
            inner.exit_code = status.code();
            inner.state = ProcessState::Exited;
            return inner.exit_code;
        }

        self.signal_term();

        let waited = tokio::time::timeout(self.grace, inner.child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                info!(target: "process", backend = %self.name, code = ?status.code(), "Process exited after SIGTERM");
                inner.exit_code = status.code();
            }
            Ok(Err(e)) => {
                warn!(target: "process", backend = %self.name, error = %e, "Wait failed after SIGTERM");
                self.force_kill(&mut inner).await;
            }
            Err(_) => {
                warn!(
                    target: "process",
                    backend = %self.name,
                    grace = ?self.grace,
                    "Process ignored SIGTERM, sending SIGKILL"
                );
                self.force_kill(&mut inner).await;
            }
        }

        inner.state = ProcessState::Exited;
        inner.exit_code
    }

    #[cfg(unix)]
    fn signal_term(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(target: "process", backend = %self.name, pid, error = %e, "SIGTERM failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_term(&self) {
        // No graceful signal off unix; the grace wait is followed by a kill
    }

    async fn force_kill(&self, inner: &mut Inner) {
        if let Err(e) = inner.child.kill().await {
            warn!(target: "process", backend = %self.name, error = %e, "SIGKILL failed");
        }
        if let Ok(status) = inner.child.wait().await {
            inner.exit_code = status.code();
        }
    }
}
