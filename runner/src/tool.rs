//! Invocation of the external computation.
//!
//! The tool is opaque: it gets a rendered command line, runs inside the
//! replica's private workspace and leaves one subtree per mutation plus an
//! index file behind. It is always asked for exactly one replica and names
//! that replica `1`, the worker relabels it afterwards.


use crate::config::ToolConfig;
use once_cell::sync::Lazy;
use signal_hook::consts::{SIGTERM, SIGUSR1};
use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// set once the scheduler announced the end of our wall-clock time
pub static INTERRUPTED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

/// used when `tool.params` is empty
pub const DEFAULT_PARAMS: [&str; 4] = ["{positions}", "{structure}", "{nstruct}", "{residues}"];

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn {exec:?}: {source}")]
    Spawn {
        exec: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open tool log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for the tool")]
    Wait(#[source] std::io::Error),
    #[error("Failed to install signal handler")]
    Signal(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    /// non-zero exit, `None` when killed by a signal
    Failed(Option<i32>),
    /// stopped by us after the near-timeout warning
    Interrupted,
}

/// Inputs of one tool run, all paths point into the private workspace.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub tool: &'a ToolConfig,
    pub workdir: &'a Path,
    pub structure: &'a Path,
    pub positions: &'a Path,
    pub residues: Option<&'a Path>,
    pub cores: u32,
}

/// Route SIGUSR1 (slurm `--signal`) and SIGTERM (scancel, node drain) to [`INTERRUPTED`].
pub fn install_signal_handlers() -> Result<(), ToolError> {
    for signal in [SIGUSR1, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&INTERRUPTED)).map_err(ToolError::Signal)?;
    }

    debug!("Installed timeout warning handlers");

    Ok(())
}

impl Invocation<'_> {
    /// Substitute placeholders, arguments that render empty are dropped.
    pub fn args(&self) -> Vec<String> {
        let params: Vec<&str> = if self.tool.params.is_empty() {
            DEFAULT_PARAMS.to_vec()
        } else {
            self.tool.params.iter().map(String::as_str).collect()
        };
        let residues = self
            .residues
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        params
            .into_iter()
            .map(|param| {
                param
                    .replace("{structure}", &self.structure.to_string_lossy())
                    .replace("{positions}", &self.positions.to_string_lossy())
                    .replace("{residues}", &residues)
                    .replace("{workdir}", &self.workdir.to_string_lossy())
                    .replace("{cores}", &self.cores.to_string())
                    // the tool always produces exactly one replica per invocation
                    .replace("{nstruct}", "1")
            })
            .filter(|arg| !arg.is_empty())
            .collect()
    }

    /// Run the tool to completion, or until `cancel` is raised.
    #[tracing::instrument(level = "debug", skip(self, cancel))]
    pub fn run(&self, log: &Path, cancel: &AtomicBool) -> Result<ToolOutcome, ToolError> {
        let open_log = |path: &Path| {
            File::create(path).map_err(|source| ToolError::Log {
                path: path.to_path_buf(),
                source,
            })
        };
        let stdout = open_log(log)?;
        let stderr = stdout.try_clone().map_err(|source| ToolError::Log {
            path: log.to_path_buf(),
            source,
        })?;
        let args = self.args();
        let start = Instant::now();

        debug!(exec = ?self.tool.exec, args = ?args, "Starting tool");

        let mut child = Command::new(&self.tool.exec)
            .args(&args)
            .current_dir(self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| ToolError::Spawn {
                exec: self.tool.exec.clone(),
                source,
            })?;

        loop {
            if let Some(status) = child.wait_timeout(POLL_INTERVAL).map_err(ToolError::Wait)? {
                let outcome = outcome(status);
                info!(elapsed = ?start.elapsed(), outcome = ?outcome, "Tool finished");

                return Ok(outcome);
            }

            if cancel.load(Ordering::SeqCst) {
                warn!(pid = child.id(), "Stopping tool after timeout warning");

                if let Err(error) = child.kill() {
                    warn!(error = ?error, "Failed to kill tool, it may have exited already");
                }
                child.wait().map_err(ToolError::Wait)?;

                return Ok(ToolOutcome::Interrupted);
            }
        }
    }
}

fn outcome(status: ExitStatus) -> ToolOutcome {
    if status.success() {
        ToolOutcome::Success
    } else {
        ToolOutcome::Failed(status.code())
    }
}
