//! Merge/restore: folding redo runs back into the aggregation tree.
//!
//! Replica subtrees from `redo_root` are copied into the aggregation tree
//! where the replica is still absent, or where only an invalid leftover sits.
//! Once a mutation is complete again, the index lines detection pulled from
//! the master are put back.

#[cfg(test)]
mod restore_test;

use crate::{
    aggregate::list_runs,
    database::check_artifact,
    detect::{missing_replicas, BACKUP_FILE},
    distributed::fs::{claim_dir, copy_tree, create_dir_all, Claim, FsError, Overwrite},
    index::{append_missing, dedup, line_matches, read_index},
    metadata::Metadata,
    mutation::Mutation,
    redo::RedoList,
    replica::{replica_dirs, replica_path},
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Aggregation root not found at {0:?}")]
    RootMissing(PathBuf),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone)]
pub struct RestoreOptions<'a> {
    pub aggregate_root: &'a Path,
    pub redo_root: &'a Path,
    pub expected: u32,
    pub artifact: &'a str,
    pub index_file: &'a str,
}

impl<'a> RestoreOptions<'a> {
    pub fn from_metadata(metadata: &'a Metadata, aggregate_root: &'a Path) -> Self {
        Self {
            aggregate_root,
            redo_root: &metadata.layout.redo_root,
            expected: metadata.parameters.replicas,
            artifact: &metadata.tool.result_artifact,
            index_file: &metadata.tool.index_file,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub copied: usize,
    /// invalid leftovers in the aggregation tree overwritten by a redo replica
    pub replaced: usize,
    pub skipped: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub restored_lines: usize,
}

/// Copy every replica of one redo run that the aggregation tree lacks.
fn merge_run(
    run: &Path,
    options: &RestoreOptions,
    seen: &mut BTreeSet<Mutation>,
    report: &mut RestoreReport,
) -> Result<(), FsError> {
    let mut entries: Vec<_> = fs::read_dir(run)
        .map_err(|error| FsError::io(run, error))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let Some(mutation) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<Mutation>().ok())
        else {
            continue;
        };
        seen.insert(mutation);

        let target_dir = options.aggregate_root.join(mutation.dir_name());
        create_dir_all(&target_dir)?;

        for replica in replica_dirs(&entry.path()) {
            let source = replica_path(&entry.path(), replica);
            let target = replica_path(&target_dir, replica);

            match claim_dir(&target)? {
                Claim::Created => {
                    copy_tree(&source, &target, Overwrite::Always)?;
                    report.copied += 1;
                }
                Claim::Existing
                    if !check_artifact(&target.join(options.artifact)).is_valid()
                        && check_artifact(&source.join(options.artifact)).is_valid() =>
                {
                    warn!(mutation = %mutation, replica = replica, "Replacing invalid replica");
                    copy_tree(&source, &target, Overwrite::Always)?;
                    report.replaced += 1;
                }
                Claim::Existing => {
                    debug!(mutation = %mutation, replica = replica, "Replica already aggregated");
                    report.skipped += 1;
                }
            }
        }
    }

    Ok(())
}

/// Merge `redo_root` into the aggregation tree and restore index lines.
///
/// Only mutations in `list` are restored when a redo list is given, otherwise
/// every mutation found in the redo runs.
#[instrument(level = "info", skip_all, fields(root = ?options.aggregate_root))]
pub fn merge_restore(
    options: &RestoreOptions,
    list: Option<&RedoList>,
) -> Result<RestoreReport, RestoreError> {
    if !options.aggregate_root.is_dir() {
        return Err(RestoreError::RootMissing(options.aggregate_root.to_path_buf()));
    }

    let mut report = RestoreReport::default();
    let mut seen = BTreeSet::new();
    let mut redo_lines = Vec::new();

    for run in list_runs(options.redo_root)? {
        redo_lines.extend(read_index(&run.join(options.index_file))?);
        merge_run(&run, options, &mut seen, &mut report)?;
    }

    let redo_lines = dedup(redo_lines);
    let backup = read_index(&options.aggregate_root.join(BACKUP_FILE))?;
    let master = options.aggregate_root.join(options.index_file);
    let targets = list.map(RedoList::mutations).unwrap_or(seen);

    for mutation in &targets {
        let missing =
            missing_replicas(options.aggregate_root, mutation, options.expected, options.artifact);

        if !missing.is_empty() {
            debug!(mutation = %mutation, missing = missing.len(), "Mutation still incomplete");
            report.incomplete += 1;
            continue;
        }

        let mut lines: Vec<&String> = backup
            .iter()
            .filter(|line| line_matches(line, mutation))
            .collect();

        if lines.is_empty() {
            lines = redo_lines
                .iter()
                .filter(|line| line_matches(line, mutation))
                .collect();
        }
        if lines.is_empty() {
            warn!(mutation = %mutation, "No index line to restore for completed mutation");
        }

        report.restored_lines += append_missing(&master, &lines)?;
        report.completed += 1;
    }

    info!(
        copied = report.copied,
        replaced = report.replaced,
        skipped = report.skipped,
        completed = report.completed,
        incomplete = report.incomplete,
        restored_lines = report.restored_lines,
        "Merged redo runs"
    );

    Ok(report)
}
