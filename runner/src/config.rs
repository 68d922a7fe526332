
use crate::executors::ExecutorKind;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    Preflight,
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Submit-time configuration, read from YAML.
///
/// Everything in here is frozen into the project's `metadata.json` on submit,
/// later stages never read the YAML file again.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub inputs: InputConfig,
    #[serde(default)]
    pub parameters: Parameters,
    pub tool: ToolConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub structure: Option<PathBuf>,
    pub positions: Option<PathBuf>,
    pub residues: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Parameters {
    // expected replicas per mutation (nstruct)
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    // upper bound of simultaneously running tasks per array
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_cores")]
    pub cores_per_replica: u32,
    #[serde(default = "default_memory")]
    pub memory_mb: u64,
    #[serde(default = "default_scratch")]
    pub scratch_mb: u64,
    #[serde(default = "default_walltime")]
    pub walltime: String,
    // seconds before the wall-clock limit the scheduler warns the worker
    #[serde(default = "default_warning_signal")]
    pub warning_signal_secs: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    // detect/resubmit/merge-restore rounds before giving up
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    pub exec: PathBuf,
    // placeholders: {structure} {positions} {residues} {nstruct} {workdir} {cores}
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "default_result_artifact")]
    pub result_artifact: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub name: ExecutorKind,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    // passed to sbatch verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default = "default_chunk_dir")]
    pub chunk_dir: PathBuf,
    #[serde(default = "default_run_root")]
    pub run_root: PathBuf,
    #[serde(default = "default_redo_root")]
    pub redo_root: PathBuf,
    #[serde(default = "default_aggregate_root")]
    pub aggregate_root: PathBuf,
    // node local scratch, TMPDIR of the worker when unset
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    // binary invoked by array tasks, the running executable when unset
    #[serde(default)]
    pub worker_script: Option<PathBuf>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            max_concurrent: default_max_concurrent(),
            cores_per_replica: default_cores(),
            memory_mb: default_memory(),
            scratch_mb: default_scratch(),
            walltime: default_walltime(),
            warning_signal_secs: default_warning_signal(),
            lock_timeout_secs: default_lock_timeout(),
            max_cycles: default_max_cycles(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: ExecutorKind::default(),
            partition: None,
            account: None,
            poll_interval_secs: default_poll_interval(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            chunk_dir: default_chunk_dir(),
            run_root: default_run_root(),
            redo_root: default_redo_root(),
            aggregate_root: default_aggregate_root(),
            scratch_root: None,
            worker_script: None,
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|_| ConfigErrors::FileNotFound(path.to_path_buf()))?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// minimal config for a tool, everything else on defaults
    pub fn for_tool(exec: PathBuf) -> Self {
        Self {
            project: None,
            inputs: InputConfig::default(),
            parameters: Parameters::default(),
            tool: ToolConfig {
                exec,
                params: Vec::new(),
                result_artifact: default_result_artifact(),
                index_file: default_index_file(),
            },
            executor: ExecutorConfig::default(),
            layout: LayoutConfig::default(),
        }
    }

    /// Check the whole config and report every problem at once.
    ///
    /// Returns `true` if any error was found.
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        match self.project.as_deref() {
            None | Some("") => {
                error!("No project name was given");
                contains_error = true;
            }
            Some(name) if name.contains(|c: char| c == '/' || c.is_whitespace()) => {
                error!("Project name {name:?} must not contain slashes or whitespace");
                contains_error = true;
            }
            Some(_) => {}
        }

        for (name, input) in [
            ("structure", &self.inputs.structure),
            ("positions", &self.inputs.positions),
        ] {
            match input {
                None => {
                    error!("inputs.{name} is required");
                    contains_error = true;
                }
                Some(path) if !path.is_file() => {
                    error!("inputs.{name} not found at {}", path.to_string_lossy());
                    contains_error = true;
                }
                Some(_) => {}
            }
        }

        if let Some(residues) = &self.inputs.residues {
            if !residues.is_file() {
                error!("inputs.residues not found at {}", residues.to_string_lossy());
                contains_error = true;
            }
        }

        match check_executable(&self.tool.exec) {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    "tool.exec {} is not executable",
                    self.tool.exec.to_string_lossy()
                );
                contains_error = true;
            }
            Err(e) => {
                error!(
                    "Failed to determine if tool.exec ({}) is an executable: {e}",
                    self.tool.exec.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if self.tool.result_artifact.is_empty() || self.tool.index_file.is_empty() {
            error!("tool.result_artifact and tool.index_file must not be empty");
            contains_error = true;
        }

        if self.parameters.replicas == 0 {
            error!("parameters.replicas cannot be 0, a mutation needs at least one replica");
            contains_error = true;
        }

        if self.parameters.max_concurrent == 0 {
            warn!("parameters.max_concurrent is 0, falling back to the replica count");
            self.parameters.max_concurrent = self.parameters.replicas.max(1);
        }

        if self.parameters.cores_per_replica == 0 {
            error!("parameters.cores_per_replica cannot be 0");
            contains_error = true;
        }

        if self.parameters.max_cycles == 0 {
            warn!("parameters.max_cycles is 0, missing replicas will only be reported");
        }

        if self.executor.poll_interval_secs == 0 {
            warn!("executor.poll_interval_secs is 0, polling once per second instead");
            self.executor.poll_interval_secs = 1;
        }

        contains_error
    }
}

fn default_replicas() -> u32 {
    35
}

fn default_max_concurrent() -> u32 {
    50
}

fn default_cores() -> u32 {
    1
}

fn default_memory() -> u64 {
    4000
}

fn default_scratch() -> u64 {
    2000
}

fn default_walltime() -> String {
    String::from("24:00:00")
}

fn default_warning_signal() -> u64 {
    300
}

fn default_lock_timeout() -> u64 {
    600
}

fn default_max_cycles() -> u32 {
    3
}

fn default_result_artifact() -> String {
    String::from("ddg.db3")
}

fn default_index_file() -> String {
    String::from("mutinfo.txt")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_chunk_dir() -> PathBuf {
    PathBuf::from("chunks")
}

fn default_run_root() -> PathBuf {
    PathBuf::from("runs")
}

fn default_redo_root() -> PathBuf {
    PathBuf::from("redo_runs")
}

fn default_aggregate_root() -> PathBuf {
    PathBuf::from("aggregate")
}
