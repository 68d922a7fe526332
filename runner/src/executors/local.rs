use super::{ArrayJob, ExecutorError, JobId, JobState, Task};
use crate::{
    aggregate::{aggregate_task, finalize_project},
    metadata::Metadata,
    worker::{run_replica, RunTarget},
};
use parking_lot::FairMutex;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, error, info, instrument, warn};

/// Executor that runs every task in this process on a private thread pool.
///
/// Submission blocks until all tasks of the job finished, so dependencies are
/// satisfied by submission order and every known job is `Done` afterwards.
#[derive(Debug)]
pub struct LocalExecutor {
    metadata: Metadata,
    pool: ThreadPool,
    jobs: FairMutex<BTreeMap<JobId, (String, JobState)>>,
    next_id: AtomicU64,
}

impl LocalExecutor {
    pub fn load(metadata: &Metadata) -> Result<Self, ExecutorError> {
        let threads = metadata.parameters.max_concurrent.max(1) as usize;

        debug!("Starting local thread pool with {threads} threads");

        Ok(Self {
            metadata: metadata.clone(),
            pool: ThreadPoolBuilder::new().num_threads(threads).build()?,
            jobs: FairMutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    #[instrument(skip_all, level = "info", fields(name = %job.name))]
    pub fn submit(&self, job: &ArrayJob) -> Result<JobId, ExecutorError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs
            .lock()
            .insert(id, (job.name.clone(), JobState::Running));

        if !job.dependencies.is_empty() {
            debug!(dependencies = ?job.dependencies, "Dependencies already finished");
        }

        let indices: Vec<u32> = match (&job.task, &job.array) {
            (Task::Replica { replica: Some(replica), .. }, _) => vec![*replica],
            (_, Some(range)) => range.clone().collect(),
            (_, None) => vec![1],
        };
        let total = indices.len();
        let processed = AtomicU64::new(0);

        self.pool.install(|| {
            indices.into_par_iter().for_each(|index| {
                self.run_task(&job.task, index);

                info!(
                    "Done with {}/{total}",
                    processed.fetch_add(1, Ordering::SeqCst) + 1
                );
            })
        });

        self.jobs.lock().insert(id, (job.name.clone(), JobState::Done));

        Ok(id)
    }

    /// Task failures are logged, the job itself always completes.
    fn run_task(&self, task: &Task, index: u32) {
        match task {
            Task::Replica { chunk, replica, redo } => {
                let target = if *redo {
                    RunTarget::Redo
                } else {
                    RunTarget::Primary
                };

                match run_replica(&self.metadata, chunk, replica.unwrap_or(index), target) {
                    Ok(outcome) if outcome.succeeded() => {
                        debug!(site = %outcome.site, replica = outcome.replica, "Replica finished")
                    }
                    Ok(outcome) => warn!(
                        site = %outcome.site,
                        replica = outcome.replica,
                        tool = ?outcome.tool,
                        "Replica finished without a successful tool run"
                    ),
                    Err(error) => error!(error = ?error, chunk = ?chunk, "Replica task failed"),
                }
            }
            Task::Aggregate => {
                if let Err(error) = aggregate_task(&self.metadata, index) {
                    error!(error = ?error, task = index, "Aggregation task failed");
                }
            }
            Task::Finalize => {
                if let Err(error) = finalize_project(&self.metadata) {
                    error!(error = ?error, "Finalize failed");
                }
            }
        }
    }

    pub fn state(&self, id: JobId) -> Result<JobState, ExecutorError> {
        self.jobs
            .lock()
            .get(&id)
            .map(|(_, state)| *state)
            .ok_or(ExecutorError::UnknownJob(id))
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.jobs
            .lock()
            .values()
            .any(|(job, state)| job == name && *state != JobState::Done)
    }
}
