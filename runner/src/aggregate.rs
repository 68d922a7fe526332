//! Fan-in: copying run directories into the aggregation tree and merging the
//! index fragments into the master index.
//!
//! Every fan-in task works on exactly one run directory and never touches the
//! master index. It parks its fragment under `.partial/<task>.mutinfo` and
//! claims mutation subtrees with an exclusive `mkdir`, so tasks can finish in
//! any order. The single finalize step afterwards merges the fragments in task
//! order, which makes the master independent of completion order.


use crate::{
    distributed::fs::{
        atomic_write, claim_dir, copy_file, copy_tree, create_dir_all, Claim, CopyStats, FsError,
        Overwrite,
    },
    index::{dedup, read_index, write_index},
    metadata::{Metadata, MetadataError},
    mutation::Mutation,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// holds one index fragment per fan-in task until finalize
pub const PARTIAL_DIR: &str = ".partial";
const FRAGMENT_EXTENSION: &str = "mutinfo";

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Run list not found at {0:?}")]
    RunListMissing(PathBuf),
    #[error("Task {task} is outside of the run list ({entries} entries)")]
    TaskOutOfRange { task: u32, entries: usize },
    #[error("Run directory not found at {0:?}")]
    RunMissing(PathBuf),
    #[error("Aggregation root not found at {0:?}")]
    RootMissing(PathBuf),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// mutation subtrees this task created in the aggregation tree
    pub published: usize,
    /// mutation subtrees another task got first
    pub skipped: usize,
    pub fragments: usize,
    pub copied: CopyStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub fragments: usize,
    pub lines_read: usize,
    pub records: usize,
}

/// run directories below `run_root`, sorted
pub fn list_runs(run_root: &Path) -> Result<Vec<PathBuf>, FsError> {
    let entries = match fs::read_dir(run_root) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(FsError::io(run_root, error)),
    };
    let mut runs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    runs.sort();

    Ok(runs)
}

pub fn write_runlist(path: &Path, runs: &[PathBuf]) -> Result<(), FsError> {
    let mut sorted = runs.to_vec();
    sorted.sort();
    sorted.dedup();

    let content: String = sorted
        .iter()
        .map(|run| format!("{}\n", run.to_string_lossy()))
        .collect();

    atomic_write(path, content.as_bytes())
}

pub fn read_runlist(path: &Path) -> Result<Vec<PathBuf>, AggregateError> {
    let content =
        fs::read_to_string(path).map_err(|_| AggregateError::RunListMissing(path.to_path_buf()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn fragment_path(aggregate_root: &Path, task: u32) -> PathBuf {
    aggregate_root
        .join(PARTIAL_DIR)
        .join(format!("{task}.{FRAGMENT_EXTENSION}"))
}

/// Copy one run directory into the aggregation tree as fan-in task `task`.
#[instrument(level = "info", skip(aggregate_root, index_file), fields(run = ?run_dir.file_name()))]
pub fn copy_run(
    run_dir: &Path,
    aggregate_root: &Path,
    task: u32,
    index_file: &str,
) -> Result<CopyReport, AggregateError> {
    if !run_dir.is_dir() {
        return Err(AggregateError::RunMissing(run_dir.to_path_buf()));
    }

    let mut report = CopyReport::default();
    create_dir_all(&aggregate_root.join(PARTIAL_DIR))?;

    let fragment = run_dir.join(index_file);
    if fragment.is_file() {
        copy_file(&fragment, &fragment_path(aggregate_root, task), Overwrite::Always)?;
        report.fragments += 1;
    } else {
        warn!(run = ?run_dir, "Run directory has no index fragment");
    }

    let mut entries: Vec<_> = fs::read_dir(run_dir)
        .map_err(|error| FsError::io(run_dir, error))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let Some(mutation) = name.to_str().and_then(|name| name.parse::<Mutation>().ok()) else {
            continue;
        };
        let target = aggregate_root.join(mutation.dir_name());

        match claim_dir(&target)? {
            Claim::Created => {
                report
                    .copied
                    .merge(copy_tree(&entry.path(), &target, Overwrite::Always)?);
                report.published += 1;
            }
            Claim::Existing => {
                debug!(mutation = %mutation, "Mutation already aggregated by another task");
                report.skipped += 1;
            }
        }
    }

    info!(
        task = task,
        published = report.published,
        skipped = report.skipped,
        fragments = report.fragments,
        files = report.copied.files,
        "Aggregated run directory"
    );

    Ok(report)
}

/// Fan-in task `task` (1-based ordinal into the run list).
pub fn aggregate_task(metadata: &Metadata, task: u32) -> Result<CopyReport, AggregateError> {
    let runs = read_runlist(&metadata.runlist_path())?;
    let run = task
        .checked_sub(1)
        .and_then(|index| runs.get(index as usize))
        .ok_or(AggregateError::TaskOutOfRange {
            task,
            entries: runs.len(),
        })?;

    copy_run(
        run,
        &metadata.layout.aggregate_root,
        task,
        &metadata.tool.index_file,
    )
}

/// partial fragments in ascending task order
fn fragments(aggregate_root: &Path) -> Result<Vec<(u32, PathBuf)>, FsError> {
    let partial = aggregate_root.join(PARTIAL_DIR);
    let entries = match fs::read_dir(&partial) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(FsError::io(partial, error)),
    };
    let mut fragments: Vec<(u32, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(FRAGMENT_EXTENSION))
        .filter_map(|path| {
            let task = path.file_stem()?.to_str()?.parse().ok()?;
            Some((task, path))
        })
        .collect();

    fragments.sort();

    Ok(fragments)
}

/// Merge the existing master and every partial fragment into the master index.
#[instrument(level = "info", skip(index_file))]
pub fn finalize(aggregate_root: &Path, index_file: &str) -> Result<FinalizeReport, AggregateError> {
    if !aggregate_root.is_dir() {
        return Err(AggregateError::RootMissing(aggregate_root.to_path_buf()));
    }

    let master = aggregate_root.join(index_file);
    let fragments = fragments(aggregate_root)?;
    let mut lines = read_index(&master)?;

    for (task, fragment) in &fragments {
        let fragment_lines = read_index(fragment)?;
        debug!(task = task, lines = fragment_lines.len(), "Merging fragment");
        lines.extend(fragment_lines);
    }

    let report = FinalizeReport {
        fragments: fragments.len(),
        lines_read: lines.len(),
        records: 0,
    };
    let merged = dedup(lines);
    write_index(&master, &merged)?;

    let partial = aggregate_root.join(PARTIAL_DIR);
    match fs::remove_dir_all(&partial) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(FsError::io(partial, error).into()),
    }

    info!(
        fragments = report.fragments,
        lines = report.lines_read,
        records = merged.len(),
        "Finalized master index"
    );

    Ok(FinalizeReport {
        records: merged.len(),
        ..report
    })
}

/// [`finalize`] plus an aggregation event in the metadata descriptor.
pub fn finalize_project(metadata: &Metadata) -> Result<FinalizeReport, AggregateError> {
    let report = finalize(&metadata.layout.aggregate_root, &metadata.tool.index_file)?;
    metadata.record_aggregation("finalize", report.records)?;

    Ok(report)
}
