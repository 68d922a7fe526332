//! The body of one array task: compute a single replica of a single site.
//!
//! Nothing the tool writes goes to shared storage directly. The tool runs in a
//! private workspace on node-local scratch and the result is published by
//! [`stage_out`] afterwards, which runs on every exit path that still has a
//! workspace, including tool failure and the near-timeout signal.

#[cfg(test)]
mod worker_test;

use crate::{
    distributed::{
        fs::{claim_dir_all, copy_file, create_dir_all, Claim, FsError, Overwrite, Workspace},
        util::{job_id, workspace_name},
    },
    metadata::{InputFile, Metadata},
    mutation::{Mutation, MutationSite},
    replica::replica_path,
    split::{parse_positions, SplitError},
    stageout::{stage_out, StageOutError, StageOutReport, LOG_DIR},
    tool::{Invocation, ToolError, ToolOutcome, INTERRUPTED},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Chunk file not found at {0:?}")]
    ChunkMissing(PathBuf),
    #[error("Chunk file {0:?} names no site")]
    EmptyChunk(PathBuf),
    #[error("Invalid chunk file")]
    Chunk(#[from] SplitError),
    #[error("Replica index must be at least 1")]
    InvalidReplica,
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("Stage-out failed")]
    StageOut(#[from] StageOutError),
}

/// Where a replica publishes its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    Primary,
    /// resubmitted replicas, kept apart until merge/restore
    Redo,
}

impl RunTarget {
    pub fn root<'a>(&self, metadata: &'a Metadata) -> &'a Path {
        match self {
            Self::Primary => &metadata.layout.run_root,
            Self::Redo => &metadata.layout.redo_root,
        }
    }
}

#[derive(Debug)]
pub struct ReplicaOutcome {
    pub site: MutationSite,
    pub replica: u32,
    pub run_dir: PathBuf,
    /// `None` if the tool never started
    pub tool: Option<ToolOutcome>,
    pub relabeled: usize,
    pub staged: StageOutReport,
}

impl ReplicaOutcome {
    pub fn succeeded(&self) -> bool {
        self.tool == Some(ToolOutcome::Success)
    }
}

/// site of a chunk file, taken from its first entry
pub fn chunk_site(chunk: &Path) -> Result<MutationSite, WorkerError> {
    let content =
        fs::read_to_string(chunk).map_err(|_| WorkerError::ChunkMissing(chunk.to_path_buf()))?;

    parse_positions(&content)?
        .into_iter()
        .next()
        .map(|entry| entry.site)
        .ok_or_else(|| WorkerError::EmptyChunk(chunk.to_path_buf()))
}

/// Rename every `<mutation>/1` to `<mutation>/<replica>`.
///
/// An existing target is left alone, so relabeling twice is a no-op.
pub fn relabel_replica(workspace: &Path, replica: u32) -> Result<usize, FsError> {
    if replica == 1 {
        return Ok(0);
    }

    let mut relabeled = 0;

    for entry in fs::read_dir(workspace).map_err(|error| FsError::io(workspace, error))? {
        let entry = entry.map_err(|error| FsError::io(workspace, error))?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }
        if entry.file_name().to_str().and_then(|name| name.parse::<Mutation>().ok()).is_none() {
            continue;
        }

        let source = replica_path(&path, 1);
        let target = replica_path(&path, replica);

        if target.exists() {
            debug!(path = ?target, "Replica already relabeled");
        } else if source.is_dir() {
            fs::rename(&source, &target).map_err(|error| FsError::io(&source, error))?;
            relabeled += 1;
        }
    }

    Ok(relabeled)
}

fn stage_input(input: &InputFile, workspace: &Path) -> Result<PathBuf, FsError> {
    let target = workspace.join(&input.filename);
    copy_file(&input.path, &target, Overwrite::Never)?;

    Ok(target)
}

/// Copy the referenced inputs and run the tool, errors here never skip stage-out.
fn compute(
    metadata: &Metadata,
    chunk: &Path,
    workspace: &Path,
    replica: u32,
) -> Result<ToolOutcome, WorkerError> {
    let structure = stage_input(&metadata.inputs.structure, workspace)?;
    let chunk_name = chunk
        .file_name()
        .ok_or_else(|| WorkerError::ChunkMissing(chunk.to_path_buf()))?;
    let positions = workspace.join(chunk_name);
    copy_file(chunk, &positions, Overwrite::Never)?;
    let residues = metadata
        .inputs
        .residues
        .as_ref()
        .map(|residues| stage_input(residues, workspace))
        .transpose()?;

    let logs = workspace.join(LOG_DIR);
    create_dir_all(&logs)?;

    let invocation = Invocation {
        tool: &metadata.tool,
        workdir: workspace,
        structure: &structure,
        positions: &positions,
        residues: residues.as_deref(),
        cores: metadata.parameters.cores_per_replica,
    };

    match invocation.run(&logs.join(format!("replica_{replica}.log")), &INTERRUPTED) {
        Ok(outcome) => Ok(outcome),
        Err(ToolError::Spawn { exec, source }) => {
            error!(exec = ?exec, error = ?source, "Tool could not be started");

            Ok(ToolOutcome::Failed(None))
        }
        Err(error) => {
            error!(error = ?error, "Tool invocation failed");

            Ok(ToolOutcome::Failed(None))
        }
    }
}

/// Compute replica `replica` of the site in `chunk` and publish it.
#[instrument(level = "info", skip(metadata), fields(project = %metadata.project))]
pub fn run_replica(
    metadata: &Metadata,
    chunk: &Path,
    replica: u32,
    target: RunTarget,
) -> Result<ReplicaOutcome, WorkerError> {
    if replica == 0 {
        return Err(WorkerError::InvalidReplica);
    }

    let site = chunk_site(chunk)?;
    let run_dir = target.root(metadata).join(site.to_string());

    match claim_dir_all(&run_dir)? {
        Claim::Created => info!(run = ?run_dir, "Created run directory"),
        Claim::Existing => debug!(run = ?run_dir, "Joined existing run directory"),
    }

    // local runs share one job id across sites
    let job = format!("{}.{site}", job_id());
    let workspace = Workspace::allocate(
        &metadata.scratch_root(),
        &workspace_name(&metadata.project, &job, replica),
    )?;

    let tool = match compute(metadata, chunk, &workspace, replica) {
        Ok(outcome) => Some(outcome),
        Err(error) => {
            error!(error = ?error, "Failed to prepare the workspace, staging out what exists");

            None
        }
    };

    match tool {
        Some(ToolOutcome::Success) => {}
        Some(ToolOutcome::Interrupted) => {
            warn!("Tool stopped before the wall-clock limit, staging out partial results")
        }
        Some(ToolOutcome::Failed(code)) => warn!(code = ?code, "Tool failed"),
        None => {}
    }

    let relabeled = match relabel_replica(&workspace, replica) {
        Ok(count) => count,
        Err(error) => {
            error!(error = ?error, "Failed to relabel replica output");

            0
        }
    };

    let staged = stage_out(
        &workspace,
        &run_dir,
        replica,
        &metadata.tool.index_file,
        metadata.lock_timeout(),
    )?;

    if INTERRUPTED.load(Ordering::SeqCst) {
        info!("Finished stage-out after the timeout warning");
    }

    Ok(ReplicaOutcome {
        site,
        replica,
        run_dir,
        tool,
        relabeled,
        staged,
    })
}
