pub mod local;
pub mod slurm;


use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    thread,
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Scheduler {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("Scheduler returned an unparseable job id {0:?}")]
    InvalidJobId(String),
    #[error("Unknown job {0}")]
    UnknownJob(JobId),
    #[error("Failed to build local thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to prepare scheduler log directory")]
    LogDirectory(#[from] crate::distributed::fs::FsError),
}

/// Name of the selected executor, stored in the metadata descriptor.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Slurm,
    Local,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
}

/// Work carried out by every element of an array job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// one replica of the site in `chunk`; `replica` pins the index, otherwise
    /// the array index is used
    Replica {
        chunk: PathBuf,
        replica: Option<u32>,
        redo: bool,
    },
    /// fan-in copy of the run directory at the array index of the run list
    Aggregate,
    /// merge all partial index fragments
    Finalize,
}

impl Task {
    /// command line of the worker binary that performs this task
    pub fn args(&self, metadata: &Path) -> Vec<String> {
        let metadata = metadata.to_string_lossy().into_owned();

        match self {
            Self::Replica {
                chunk,
                replica,
                redo,
            } => {
                let mut args = vec![
                    String::from("worker"),
                    String::from("--metadata"),
                    metadata,
                    String::from("--chunk"),
                    chunk.to_string_lossy().into_owned(),
                ];

                if let Some(replica) = replica {
                    args.push(String::from("--replica"));
                    args.push(replica.to_string());
                }
                if *redo {
                    args.push(String::from("--redo"));
                }

                args
            }
            Self::Aggregate => vec![String::from("aggregate"), String::from("--metadata"), metadata],
            Self::Finalize => vec![String::from("finalize"), String::from("--metadata"), metadata],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArrayJob {
    pub name: String,
    pub task: Task,
    /// array indices, `None` submits a single task
    pub array: Option<RangeInclusive<u32>>,
    /// jobs that have to leave the queue before this one starts
    pub dependencies: Vec<JobId>,
}

impl ArrayJob {
    pub fn single(name: impl Into<String>, task: Task) -> Self {
        Self {
            name: name.into(),
            task,
            array: None,
            dependencies: Vec::new(),
        }
    }

    pub fn array(name: impl Into<String>, task: Task, array: RangeInclusive<u32>) -> Self {
        Self {
            name: name.into(),
            task,
            array: Some(array),
            dependencies: Vec::new(),
        }
    }

    pub fn after(mut self, dependencies: impl IntoIterator<Item = JobId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }
}

/// All possible executor variants
/// (this is deliberately not made with dynamic dispatch)
#[derive(Debug)]
pub enum Executors {
    Slurm(slurm::SlurmExecutor),
    Local(local::LocalExecutor),
}

impl Executors {
    pub fn load(metadata: &Metadata) -> Result<Self, ExecutorError> {
        match metadata.executor.name {
            ExecutorKind::Slurm => Ok(Self::Slurm(slurm::SlurmExecutor::load(metadata))),
            ExecutorKind::Local => Ok(Self::Local(local::LocalExecutor::load(metadata)?)),
        }
    }

    pub fn submit(&self, job: &ArrayJob) -> Result<JobId, ExecutorError> {
        let id = match self {
            Self::Slurm(executor) => executor.submit(job)?,
            Self::Local(executor) => executor.submit(job)?,
        };

        info!(job = %id, name = %job.name, array = ?job.array, "Submitted job");

        Ok(id)
    }

    pub fn state(&self, id: JobId) -> Result<JobState, ExecutorError> {
        match self {
            Self::Slurm(executor) => executor.state(id),
            Self::Local(executor) => executor.state(id),
        }
    }

    /// whether a job with this name is still queued or running
    pub fn is_active(&self, name: &str) -> Result<bool, ExecutorError> {
        match self {
            Self::Slurm(executor) => executor.is_active(name),
            Self::Local(executor) => Ok(executor.is_active(name)),
        }
    }

    /// Poll until every job in `ids` left the queue.
    pub fn wait(&self, ids: &[JobId], interval: std::time::Duration) -> Result<(), ExecutorError> {
        let start = Instant::now();
        let mut pending: Vec<JobId> = ids.to_vec();

        while !pending.is_empty() {
            let mut still_pending = Vec::with_capacity(pending.len());

            for id in pending {
                match self.state(id)? {
                    JobState::Done => debug!(job = %id, "Job left the queue"),
                    state => {
                        debug!(job = %id, state = ?state, "Job still in the queue");
                        still_pending.push(id);
                    }
                }
            }

            pending = still_pending;

            if !pending.is_empty() {
                info!(
                    pending = pending.len(),
                    elapsed = ?start.elapsed(),
                    "Waiting for jobs to finish"
                );
                thread::sleep(interval);
            }
        }

        Ok(())
    }
}
