//! The driver: submit, wait, fan in, then repair until nothing is missing.
//!
//! Every step works on the [`Metadata`] written by [`submit_project`], so a
//! driver that died can be restarted with [`resume`] from the descriptor
//! alone.


use crate::{
    aggregate::{list_runs, write_runlist, AggregateError},
    config::{ConfigErrors, RunnerConfig},
    detect::{detect, DetectError, DetectOptions},
    distributed::fs::{create_dir_all, FsError},
    executors::{ArrayJob, ExecutorError, Executors, JobId, Task},
    metadata::{Metadata, MetadataError},
    mutation::MutationSite,
    redo::RedoError,
    restore::{merge_restore, RestoreError, RestoreOptions},
    resubmit::{resubmit, ResubmitError},
    split::{split_positions, SplitError},
    tool::ToolError,
    worker::{chunk_site, WorkerError},
    ExitStatus,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Redo(#[from] RedoError),
    #[error(transparent)]
    Resubmit(#[from] ResubmitError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("{missing} replicas still missing after {cycles} repair cycles")]
    NotConverged { missing: usize, cycles: u32 },
}

impl PipelineError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Config(ConfigErrors::FileNotFound(_))
            | Self::Metadata(MetadataError::NotFound(_) | MetadataError::InputMissing(_))
            | Self::Split(SplitError::NotFound(_))
            | Self::Worker(WorkerError::ChunkMissing(_))
            | Self::Aggregate(AggregateError::RootMissing(_) | AggregateError::RunListMissing(_))
            | Self::Detect(DetectError::RootMissing(_))
            | Self::Redo(RedoError::NotFound(_))
            | Self::Resubmit(ResubmitError::Unresolved(_))
            | Self::Restore(RestoreError::RootMissing(_)) => ExitStatus::MissingInput,
            Self::Config(_)
            | Self::Metadata(MetadataError::Conflict(_))
            | Self::Split(SplitError::Site { .. })
            | Self::Detect(DetectError::InvalidExpected)
            | Self::Redo(RedoError::Malformed { .. } | RedoError::Mutation { .. }) => {
                ExitStatus::Usage
            }
            _ => ExitStatus::Internal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub sites: usize,
    pub cycles: u32,
    pub missing: usize,
}

/// Freeze a checked config into `project_root` and split the position list.
///
/// Returns the descriptor and the chunk files, one per site.
#[instrument(level = "info", skip(config))]
pub fn submit_project(
    config: &RunnerConfig,
    project_root: &Path,
) -> Result<(Metadata, Vec<PathBuf>), PipelineError> {
    create_dir_all(project_root)?;

    let metadata = Metadata::freeze(config, project_root)?;

    let stats = split_positions(&metadata.inputs.positions.path, &metadata.layout.chunk_dir)?;

    Ok((metadata, stats.chunks))
}

fn site_job_name(metadata: &Metadata, site: &MutationSite) -> String {
    format!("{}_{site}", metadata.project)
}

/// One worker array `1..=replicas` per chunk.
pub fn submit_workers(
    metadata: &Metadata,
    executors: &Executors,
    chunks: &[PathBuf],
) -> Result<Vec<JobId>, PipelineError> {
    let mut ids = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let site = chunk_site(chunk)?;
        let job = ArrayJob::array(
            site_job_name(metadata, &site),
            Task::Replica {
                chunk: chunk.clone(),
                replica: None,
                redo: false,
            },
            1..=metadata.parameters.replicas,
        );

        ids.push(executors.submit(&job)?);
    }

    info!(arrays = ids.len(), "Submitted worker arrays");

    Ok(ids)
}

/// Write the run list and submit the fan-in array followed by finalize.
///
/// Returns the finalize job, `None` when no run directory exists.
pub fn submit_fan_in(
    metadata: &Metadata,
    executors: &Executors,
    after: &[JobId],
) -> Result<Option<JobId>, PipelineError> {
    let runs = list_runs(&metadata.layout.run_root)?;

    if runs.is_empty() {
        warn!(root = ?metadata.layout.run_root, "No run directories to aggregate");

        return Ok(None);
    }

    create_dir_all(&metadata.layout.aggregate_root)?;
    write_runlist(&metadata.runlist_path(), &runs)?;

    let copy = executors.submit(
        &ArrayJob::array(
            format!("{}_aggregate", metadata.project),
            Task::Aggregate,
            1..=runs.len() as u32,
        )
        .after(after.iter().copied()),
    )?;
    let finalize = executors.submit(
        &ArrayJob::single(format!("{}_finalize", metadata.project), Task::Finalize).after([copy]),
    )?;

    Ok(Some(finalize))
}

/// Detect, resubmit and merge until nothing is missing or `max_cycles` ran out.
///
/// Returns the number of replicas still missing and the cycles used.
#[instrument(level = "info", skip_all, fields(project = %metadata.project))]
pub fn repair(metadata: &Metadata, executors: &Executors) -> Result<(usize, u32), PipelineError> {
    let aggregate_root = &metadata.layout.aggregate_root;
    let options = DetectOptions {
        expected: metadata.parameters.replicas,
        artifact: &metadata.tool.result_artifact,
        index_file: &metadata.tool.index_file,
        inplace: true,
    };
    let max_cycles = metadata.parameters.max_cycles;
    let mut cycle = 0;

    loop {
        let report = detect(aggregate_root, &options)?;

        if report.missing.is_empty() {
            info!(cycles = cycle, "All replicas present");

            return Ok((0, cycle));
        }
        if cycle >= max_cycles {
            return Ok((report.missing.len(), cycle));
        }

        cycle += 1;
        info!(
            cycle = cycle,
            missing = report.missing.len(),
            "Starting repair cycle"
        );

        let submitted = resubmit(metadata, executors, &report.missing)?;
        let ids: Vec<JobId> = submitted.submitted.iter().map(|(_, id)| *id).collect();
        executors.wait(&ids, metadata.poll_interval())?;

        merge_restore(
            &RestoreOptions::from_metadata(metadata, aggregate_root),
            Some(&report.missing),
        )?;
    }
}

fn converged(report: PipelineReport) -> Result<PipelineReport, PipelineError> {
    if report.missing == 0 {
        Ok(report)
    } else {
        error!(
            missing = report.missing,
            cycles = report.cycles,
            "Replicas still missing, giving up"
        );

        Err(PipelineError::NotConverged {
            missing: report.missing,
            cycles: report.cycles,
        })
    }
}

/// Full run: workers, fan-in, finalize and the repair loop.
#[instrument(level = "info", skip_all, fields(project = %metadata.project))]
pub fn run(
    metadata: &Metadata,
    executors: &Executors,
    chunks: &[PathBuf],
) -> Result<PipelineReport, PipelineError> {
    let workers = submit_workers(metadata, executors, chunks)?;
    executors.wait(&workers, metadata.poll_interval())?;

    if let Some(finalize) = submit_fan_in(metadata, executors, &workers)? {
        executors.wait(&[finalize], metadata.poll_interval())?;
    } else {
        create_dir_all(&metadata.layout.aggregate_root)?;
    }

    let (missing, cycles) = repair(metadata, executors)?;

    converged(PipelineReport {
        sites: chunks.len(),
        cycles,
        missing,
    })
}

/// Pick up an existing project at the repair loop.
pub fn resume(metadata: &Metadata, executors: &Executors) -> Result<PipelineReport, PipelineError> {
    let (missing, cycles) = repair(metadata, executors)?;

    converged(PipelineReport {
        sites: list_runs(&metadata.layout.run_root)?.len(),
        cycles,
        missing,
    })
}
