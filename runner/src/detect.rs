//! Missing-replica detection over the aggregation tree.
//!
//! A mutation is complete once every replica `1..=N` holds a valid result
//! artifact. Index lines of incomplete mutations are pulled from the master so
//! downstream consumers never see a partial mutation, and every missing
//! replica ends up in the redo list.


use crate::{
    distributed::fs::FsError,
    index::{append_missing, line_matches, parse_mutation, read_index, write_index},
    mutation::Mutation,
    redo::{RedoEntry, RedoError, RedoList, REDO_FILE},
    replica::{observe, replica_path, settle, ReplicaMarker, ReplicaSnapshot, ReplicaState},
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// original master index, kept by in-place detection
pub const BACKUP_FILE: &str = "mutinfo.bak";
/// filtered master index written when not running in place
pub const CLEANED_FILE: &str = "mutinfo.cleaned.txt";

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Aggregation root not found at {0:?}")]
    RootMissing(PathBuf),
    #[error("Expected replica count must be at least 1")]
    InvalidExpected,
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Redo(#[from] RedoError),
}

#[derive(Debug, Clone)]
pub struct DetectOptions<'a> {
    pub expected: u32,
    pub artifact: &'a str,
    pub index_file: &'a str,
    pub inplace: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DetectReport {
    pub candidates: usize,
    pub complete: usize,
    pub missing: RedoList,
    /// missing replicas that were staged out but hold no valid artifact
    pub invalid: usize,
    pub removed_lines: usize,
    pub unparseable_lines: usize,
    /// cleaned index that was written
    pub index: PathBuf,
    pub redo_list: PathBuf,
}

/// mutation directories present in the aggregation tree
fn mutation_dirs(aggregate_root: &Path) -> Result<BTreeSet<Mutation>, FsError> {
    Ok(fs::read_dir(aggregate_root)
        .map_err(|error| FsError::io(aggregate_root, error))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
        .collect())
}

/// Replicas of `mutation` that did not settle as verified.
pub fn missing_replicas(
    aggregate_root: &Path,
    mutation: &Mutation,
    expected: u32,
    artifact: &str,
) -> Vec<(u32, ReplicaSnapshot)> {
    let mutation_dir = aggregate_root.join(mutation.dir_name());
    let mut missing = Vec::new();

    for replica in 1..=expected {
        let snapshot = ReplicaSnapshot::capture(&mutation_dir, replica, artifact);

        match settle(&snapshot) {
            ReplicaState::Verified => mark_verified(&mutation_dir, mutation, replica),
            _ => missing.push((replica, snapshot)),
        }
    }

    missing
}

fn mark_verified(mutation_dir: &Path, mutation: &Mutation, replica: u32) {
    let directory = replica_path(mutation_dir, replica);

    if ReplicaMarker::read(&directory).map(|marker| marker.state) == Some(ReplicaState::Verified) {
        return;
    }
    if let Err(error) = ReplicaMarker::new(ReplicaState::Verified, mutation, replica).write(&directory)
    {
        warn!(error = ?error, path = ?directory, "Failed to update replica marker");
    }
}

#[instrument(level = "info", skip(options), fields(expected = options.expected, inplace = options.inplace))]
pub fn detect(aggregate_root: &Path, options: &DetectOptions) -> Result<DetectReport, DetectError> {
    if !aggregate_root.is_dir() {
        return Err(DetectError::RootMissing(aggregate_root.to_path_buf()));
    }
    if options.expected == 0 {
        return Err(DetectError::InvalidExpected);
    }

    let master = aggregate_root.join(options.index_file);
    let lines = read_index(&master)?;
    let mut report = DetectReport::default();

    let mut candidates = mutation_dirs(aggregate_root)?;
    for line in &lines {
        match parse_mutation(line) {
            Some(mutation) => {
                candidates.insert(mutation);
            }
            None => {
                warn!(line = %line, "Keeping index line without a parseable mutation");
                report.unparseable_lines += 1;
            }
        }
    }
    report.candidates = candidates.len();

    let mut incomplete = Vec::new();
    for mutation in &candidates {
        let missing = missing_replicas(aggregate_root, mutation, options.expected, options.artifact);

        if missing.is_empty() {
            report.complete += 1;
            continue;
        }

        for (replica, snapshot) in missing {
            let state = observe(&snapshot);
            if state == ReplicaState::Staged {
                report.invalid += 1;
            }

            debug!(
                mutation = %mutation,
                replica = replica,
                state = ?state,
                check = ?snapshot.artifact,
                "Replica missing"
            );
            report.missing.insert(RedoEntry::new(*mutation, replica));
        }
        incomplete.push(*mutation);
    }

    let kept: Vec<&String> = lines
        .iter()
        .filter(|line| !incomplete.iter().any(|mutation| line_matches(line, mutation)))
        .collect();
    report.removed_lines = lines.len() - kept.len();

    if options.inplace {
        let backup = aggregate_root.join(BACKUP_FILE);

        if backup.exists() {
            // earlier cycles already removed lines from the master, keep theirs
            append_missing(&backup, &lines)?;
        } else {
            write_index(&backup, &lines)?;
        }
        write_index(&master, &kept)?;
        report.index = master;
    } else {
        let cleaned = aggregate_root.join(CLEANED_FILE);
        write_index(&cleaned, &kept)?;
        report.index = cleaned;
    }

    report.redo_list = aggregate_root.join(REDO_FILE);
    report.missing.save(&report.redo_list)?;

    info!(
        candidates = report.candidates,
        complete = report.complete,
        incomplete = incomplete.len(),
        missing = report.missing.len(),
        invalid = report.invalid,
        removed_lines = report.removed_lines,
        "Checked aggregation tree for missing replicas"
    );

    Ok(report)
}
