// ── Bridge child process ──
//
// Runs the bridge alongside the proxy. The child shares the terminal's
// stdio, and on Linux it gets its own process group so a Ctrl+C aimed
// at bbctl doesn't reach it before the proxy has shut down.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// What to launch.
#[derive(Debug, Clone)]
pub struct BridgeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl BridgeCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[derive(Debug)]
pub struct BridgeProcess {
    child: Child,
    program: String,
}

impl BridgeProcess {
    pub fn spawn(command: &BridgeCommand) -> Result<Self, CoreError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &command.workdir {
            cmd.current_dir(dir);
        }
        #[cfg(target_os = "linux")]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| CoreError::SpawnFailed {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;
        info!(program = %command.program, pid = child.id(), "Started bridge process");
        Ok(Self {
            child,
            program: command.program.clone(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the bridge to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus, CoreError> {
        Ok(self.child.wait().await?)
    }

    /// Ask the bridge to exit, then kill it if it's still running after
    /// `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, CoreError> {
        if let Some(status) = self.child.try_wait()? {
            debug!(program = %self.program, %status, "Bridge already exited");
            return Ok(status);
        }

        self.send_terminate();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    program = %self.program,
                    grace_secs = grace.as_secs(),
                    "Bridge did not exit in time, killing"
                );
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }

    /// Only Linux bridges run in their own process group; elsewhere the
    /// child already got the terminal's signal and is just waited on.
    #[cfg(target_os = "linux")]
    fn send_terminate(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        info!(program = %self.program, pid, "Sending SIGTERM to bridge");
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(program = %self.program, error = %e, "Failed to send SIGTERM to bridge");
        }
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn send_terminate(&mut self) {
        debug!(program = %self.program, "Waiting for bridge to exit");
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(program = %self.program, error = %e, "Failed to stop bridge");
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let cmd = BridgeCommand::new("sh").args(["-c", "exit 3"]);
        let mut bridge = BridgeProcess::spawn(&cmd).unwrap();
        let status = bridge.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn terminate_stops_a_running_bridge() {
        let cmd = BridgeCommand::new("sleep").args(["30"]);
        let mut bridge = BridgeProcess::spawn(&cmd).unwrap();
        assert!(bridge.id().is_some());

        let status = bridge.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn terminate_sends_sigterm_on_linux() {
        use std::os::unix::process::ExitStatusExt;

        let cmd = BridgeCommand::new("sleep").args(["30"]);
        let mut bridge = BridgeProcess::spawn(&cmd).unwrap();

        let status = bridge.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn terminate_kills_after_grace() {
        let cmd = BridgeCommand::new("sh").args(["-c", "trap '' TERM; sleep 30"]);
        let mut bridge = BridgeProcess::spawn(&cmd).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = bridge.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn terminate_after_exit_returns_status() {
        let cmd = BridgeCommand::new("true");
        let mut bridge = BridgeProcess::spawn(&cmd).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = bridge.terminate(Duration::from_secs(1)).await.unwrap();
        assert!(status.success());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let cmd = BridgeCommand::new("bbctl-definitely-not-a-bridge");
            let err = BridgeProcess::spawn(&cmd).unwrap_err();
            assert!(matches!(err, CoreError::SpawnFailed { .. }));
        });
    }
}
