//! The per-project metadata descriptor (`metadata.json`).
//!
//! Written once on submit from the [`RunnerConfig`], then read by every
//! downstream stage as its immutable configuration. The only mutation after
//! submit is appending to `aggregations`, which happens under the project
//! lock and re-reads the file first so concurrent appends are never lost.


use crate::{
    config::{ConfigErrors, ExecutorConfig, Parameters, RunnerConfig, ToolConfig},
    distributed::{
        fs::{atomic_write, FsError},
        util::get_tmp_dir,
    },
    sync::locking::{LockError, RunLock},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

pub const METADATA_FILE: &str = "metadata.json";
/// ordered list of run directories consumed by the fan-in array
pub const RUNLIST_FILE: &str = "runlist.txt";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata descriptor not found at {0:?}")]
    NotFound(PathBuf),
    #[error("Input file not found: {0:?}")]
    InputMissing(PathBuf),
    #[error("Failed to (de)serialize metadata descriptor")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error("{0:?} already describes a project with different settings")]
    Conflict(PathBuf),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InputFile {
    pub path: PathBuf,
    pub filename: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Inputs {
    pub structure: InputFile,
    pub positions: InputFile,
    #[serde(default)]
    pub residues: Option<InputFile>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    pub project_root: PathBuf,
    pub chunk_dir: PathBuf,
    pub run_root: PathBuf,
    pub redo_root: PathBuf,
    pub aggregate_root: PathBuf,
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    pub worker_script: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AggregationEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub records: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub project: String,
    pub inputs: Inputs,
    pub parameters: Parameters,
    pub tool: ToolConfig,
    pub executor: ExecutorConfig,
    pub layout: Layout,
    #[serde(default)]
    pub aggregations: Vec<AggregationEvent>,
}

impl InputFile {
    pub fn resolve(path: &Path) -> Result<Self, MetadataError> {
        let path =
            fs::canonicalize(path).map_err(|_| MetadataError::InputMissing(path.to_path_buf()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| MetadataError::InputMissing(path.clone()))?;

        Ok(Self { path, filename })
    }
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl Metadata {
    /// Freeze a checked config into a descriptor rooted at `project_root`.
    pub fn from_config(config: &RunnerConfig, project_root: &Path) -> Result<Self, MetadataError> {
        let project = config
            .project
            .clone()
            .ok_or(ConfigErrors::Missing("project"))?;
        let structure = config
            .inputs
            .structure
            .as_deref()
            .ok_or(ConfigErrors::Missing("inputs.structure"))?;
        let positions = config
            .inputs
            .positions
            .as_deref()
            .ok_or(ConfigErrors::Missing("inputs.positions"))?;

        let project_root = if project_root.is_absolute() {
            project_root.to_path_buf()
        } else {
            env::current_dir()
                .map_err(|error| FsError::io(project_root, error))?
                .join(project_root)
        };

        let worker_script = match &config.layout.worker_script {
            Some(script) => absolute(&project_root, script),
            None => env::current_exe().map_err(|error| FsError::io("current_exe", error))?,
        };

        let mut tool = config.tool.clone();
        tool.exec = fs::canonicalize(&tool.exec)
            .map_err(|_| MetadataError::InputMissing(tool.exec.clone()))?;

        Ok(Self {
            project,
            inputs: Inputs {
                structure: InputFile::resolve(structure)?,
                positions: InputFile::resolve(positions)?,
                residues: config
                    .inputs
                    .residues
                    .as_deref()
                    .map(InputFile::resolve)
                    .transpose()?,
            },
            parameters: config.parameters.clone(),
            tool,
            executor: config.executor.clone(),
            layout: Layout {
                chunk_dir: absolute(&project_root, &config.layout.chunk_dir),
                run_root: absolute(&project_root, &config.layout.run_root),
                redo_root: absolute(&project_root, &config.layout.redo_root),
                aggregate_root: absolute(&project_root, &config.layout.aggregate_root),
                scratch_root: config
                    .layout
                    .scratch_root
                    .as_deref()
                    .map(|scratch| absolute(&project_root, scratch)),
                worker_script,
                project_root,
            },
            aggregations: Vec::new(),
        })
    }

    /// [`Metadata::from_config`] and write it, unless the project root already
    /// holds a descriptor.
    ///
    /// An existing descriptor with the same settings is reused as is, keeping
    /// its aggregation events. One with different settings is refused.
    pub fn freeze(config: &RunnerConfig, project_root: &Path) -> Result<Self, MetadataError> {
        let fresh = Self::from_config(config, project_root)?;
        let path = fresh.path();

        if !path.is_file() {
            fresh.save()?;

            return Ok(fresh);
        }

        let existing = Self::load(&path)?;
        if !existing.same_settings(&fresh) {
            return Err(MetadataError::Conflict(path));
        }

        info!(path = ?path, events = existing.aggregations.len(), "Reusing existing metadata descriptor");

        Ok(existing)
    }

    /// equal apart from the recorded aggregation events
    fn same_settings(&self, other: &Self) -> bool {
        self.project == other.project
            && self.inputs == other.inputs
            && self.parameters == other.parameters
            && self.tool == other.tool
            && self.executor == other.executor
            && self.layout == other.layout
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let bytes = fs::read(path).map_err(|_| MetadataError::NotFound(path.to_path_buf()))?;
        let metadata: Self = serde_json::from_slice(&bytes)?;

        debug!(path = ?path, project = %metadata.project, "Loaded metadata descriptor");

        Ok(metadata)
    }

    pub fn path(&self) -> PathBuf {
        self.layout.project_root.join(METADATA_FILE)
    }

    pub fn save(&self) -> Result<(), MetadataError> {
        let bytes = serde_json::to_vec_pretty(self)?;

        atomic_write(&self.path(), &bytes)?;
        info!(path = ?self.path(), "Wrote metadata descriptor");

        Ok(())
    }

    /// Append an aggregation event to the descriptor on disk.
    pub fn record_aggregation(
        &self,
        source: &str,
        records: usize,
    ) -> Result<AggregationEvent, MetadataError> {
        let _lock = RunLock::acquire(&self.layout.project_root, self.lock_timeout())?;
        let mut current = Self::load(&self.path())?;
        let event = AggregationEvent {
            timestamp: Utc::now(),
            source: source.to_owned(),
            records,
        };

        current.aggregations.push(event.clone());
        current.save()?;

        Ok(event)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.parameters.lock_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.executor.poll_interval_secs.max(1))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.layout.scratch_root.clone().unwrap_or_else(get_tmp_dir)
    }

    pub fn runlist_path(&self) -> PathBuf {
        self.layout.project_root.join(RUNLIST_FILE)
    }

    pub fn master_index(&self) -> PathBuf {
        self.layout.aggregate_root.join(&self.tool.index_file)
    }
}
