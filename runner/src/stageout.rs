//! Stage-out: publishing one replica's private workspace into the shared run
//! directory of its site.
//!
//! Everything happens under the run directory's [`RunLock`], so replicas of the
//! same site serialize only this copy step and never the computation. Each
//! replica owns `<mutation>/<replica>/` and `logs/replica_<replica>.log`, every
//! other shared target is either written no-clobber or merged line-wise, so the
//! published result is the union of all contributions in any arrival order and
//! staging the same workspace twice changes nothing.

#[cfg(test)]
mod stageout_test;

use crate::{
    distributed::fs::{copy_file, copy_tree, CopyStats, FsError, Overwrite},
    index::{append_missing, read_index},
    mutation::Mutation,
    replica::{replica_path, ReplicaMarker, ReplicaState},
    sync::locking::{LockError, RunLock},
};
use std::{
    fs,
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// per-replica logs inside workspaces and run directories
pub const LOG_DIR: &str = "logs";

#[derive(Error, Debug)]
pub enum StageOutError {
    #[error("Failed to acquire the run lock")]
    Lock(#[from] LockError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutReport {
    /// mutations whose replica subtree was published
    pub mutations: Vec<Mutation>,
    pub index_lines: usize,
    pub copied: CopyStats,
}

/// Publish `workspace` into `run_dir` as replica `replica`.
#[instrument(level = "info", skip(workspace, run_dir, lock_timeout), fields(run = ?run_dir.file_name()))]
pub fn stage_out(
    workspace: &Path,
    run_dir: &Path,
    replica: u32,
    index_file: &str,
    lock_timeout: Duration,
) -> Result<StageOutReport, StageOutError> {
    let lock = RunLock::acquire(run_dir, lock_timeout)?;
    debug!(waited = ?lock.waited(), "Entered stage-out critical section");

    let mut report = StageOutReport::default();
    let mut entries: Vec<_> = fs::read_dir(workspace)
        .map_err(|error| FsError::io(workspace, error))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let source = entry.path();
        let target = run_dir.join(name.as_ref());
        let is_dir = entry
            .file_type()
            .map_err(|error| FsError::io(&source, error))?
            .is_dir();

        if !is_dir {
            if name == index_file {
                let lines = read_index(&source)?;
                report.index_lines += append_missing(&target, &lines)?;
            } else if copy_file(&source, &target, Overwrite::Never)?.is_some() {
                report.copied.files += 1;
            } else {
                report.copied.skipped += 1;
            }

            continue;
        }

        if name == LOG_DIR {
            report.copied.merge(copy_tree(&source, &target, Overwrite::Always)?);
        } else if let Ok(mutation) = name.parse::<Mutation>() {
            let produced = replica_path(&source, replica);

            if !produced.is_dir() {
                debug!(mutation = %mutation, "No output for this replica, nothing to publish");
                continue;
            }

            let published = replica_path(&target, replica);
            report
                .copied
                .merge(copy_tree(&produced, &published, Overwrite::Always)?);
            ReplicaMarker::new(ReplicaState::Staged, &mutation, replica).write(&published)?;
            report.mutations.push(mutation);
        } else {
            report.copied.merge(copy_tree(&source, &target, Overwrite::Never)?);
        }
    }

    drop(lock);

    info!(
        replica = replica,
        mutations = report.mutations.len(),
        index_lines = report.index_lines,
        files = report.copied.files,
        skipped = report.copied.skipped,
        "Staged out replica"
    );

    Ok(report)
}
