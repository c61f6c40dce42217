//! The app that writes the snapshot file, and keeping the host awake while
//! we watch it.

use crate::config::KeepAwakeConfig;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Check whether a process with this name is running (via `pgrep`).
///
/// An empty name disables the check. A `pgrep` that cannot be run counts as
/// "not running".
pub async fn is_running(process_name: &str) -> bool {
    if process_name.is_empty() {
        return true;
    }

    let status = Command::new("pgrep")
        .arg(process_name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(process = %process_name, error = %e, "Failed to run pgrep");
            false
        }
    }
}

/// Change in producer liveness between two observations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Same state as last time
    Unchanged,
    /// Was running (or unknown), now absent
    WentAbsent,
    /// Was absent, now running again
    Recovered,
}

/// Tracks producer liveness so the absence warning fires once per outage
#[derive(Debug, Default)]
pub struct ProducerWatch {
    absent: bool,
}

impl ProducerWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, running: bool) -> Transition {
        match (self.absent, running) {
            (false, false) => {
                self.absent = true;
                Transition::WentAbsent
            }
            (true, true) => {
                self.absent = false;
                Transition::Recovered
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.absent
    }
}

/// Helper process that keeps the machine from sleeping while we run.
///
/// The child is killed on `stop()`, and also when dropped.
pub struct KeepAwake {
    child: Option<Child>,
}

impl KeepAwake {
    /// A helper that does nothing
    pub fn disabled() -> Self {
        Self { child: None }
    }

    /// Spawn the configured helper.
    ///
    /// If the program is not installed, logs a warning and returns an
    /// inactive helper; tracking works without it.
    pub fn start(config: &KeepAwakeConfig) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            return Ok(Self::disabled());
        };
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let pid = std::process::id().to_string();
        let args: Vec<&str> = args
            .iter()
            .map(|arg| if arg == "{pid}" { pid.as_str() } else { arg.as_str() })
            .collect();

        let spawned = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                info!(program = %program, pid = ?child.id(), "Keep-awake helper started");
                Ok(Self { child: Some(child) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program = %program, "Keep-awake helper not found, the system may sleep");
                Ok(Self::disabled())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to start {}", program)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate the helper and wait for it to exit
    pub async fn stop(mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .context("Failed to stop keep-awake helper")?;
            info!("Keep-awake helper stopped");
        }
        Ok(())
    }
}
