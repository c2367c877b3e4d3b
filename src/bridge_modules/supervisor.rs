//! Entrypoint supervision: the container's PID 1 starts the bridge as a single
//! child, relays termination signals to it, and exits with its status.

use crate::bridge_modules::config::BridgeOptions;
use crate::bridge_modules::error::SupervisorError;
use crate::bridge_modules::signals::{ShutdownSignal, ShutdownSignals};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub const SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Exit code to report for `status`; a child killed by signal N maps to `128 + N`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
}

impl Supervisor {
    pub fn new<I, A>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    /// Prepares `<this executable> run --options <path>` for already validated options.
    pub fn for_options(
        options_path: &Path,
        options: &BridgeOptions,
    ) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|e| SupervisorError::Spawn {
            program: PathBuf::from("k1max-ws-bridge"),
            source: e,
        })?;

        let mut supervisor = Self::new(
            program,
            [
                OsString::from("run"),
                OsString::from("--options"),
                options_path.as_os_str().to_os_string(),
            ],
        );

        if std::env::var_os("RUST_LOG").is_none() {
            if let Some(level) = options.log_filter() {
                supervisor = supervisor.env("RUST_LOG", level);
            }
        }
        Ok(supervisor)
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs the child to completion and returns the exit code to propagate.
    pub async fn run(self) -> Result<i32, SupervisorError> {
        let mut signals = ShutdownSignals::install().map_err(SupervisorError::Signal)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;
        info!(program = ?self.program, pid = ?child.id(), "Application started.");

        let status = tokio::select! {
            status = child.wait() => status.map_err(SupervisorError::Wait)?,
            signal = signals.recv() => {
                info!(?signal, "Shutdown requested. Forwarding to application.");
                let grace = Duration::from_secs(SHUTDOWN_GRACE_SECONDS);
                terminate_child(&mut child, signal, grace).await?
            }
        };

        let code = exit_code(status);
        info!(code, "Application exited.");
        Ok(code)
    }
}

/// Relays `signal` to the child and waits up to `grace` before killing it.
pub async fn terminate_child(
    child: &mut Child,
    signal: ShutdownSignal,
    grace: Duration,
) -> Result<ExitStatus, SupervisorError> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let sig = match signal {
                ShutdownSignal::Terminate => Signal::SIGTERM,
                ShutdownSignal::Interrupt => Signal::SIGINT,
            };
            if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
                warn!(pid, error = %e, "Failed to forward signal to application.");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal;
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "Failed to stop application.");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(SupervisorError::Wait),
        Err(_) => {
            warn!(
                grace_seconds = grace.as_secs(),
                "Application did not exit in time. Killing it."
            );
            child.kill().await.map_err(SupervisorError::Wait)?;
            child.wait().await.map_err(SupervisorError::Wait)
        }
    }
}
