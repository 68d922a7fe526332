//! Resubmission of the replicas listed in a redo list.
//!
//! Each entry becomes its own single-task job with the replica index pinned,
//! writing into the redo root so a late original can never collide with its
//! replacement. Chunks are resolved for every entry before the first job is
//! submitted: either all of the list goes out or none of it does.

#[cfg(test)]
mod resubmit_test;

use crate::{
    distributed::fs::{create_dir_all, FsError},
    executors::{ArrayJob, ExecutorError, Executors, JobId, Task},
    metadata::Metadata,
    mutation::MutationSite,
    redo::{RedoEntry, RedoList},
    split::{find_site_line, write_chunk, SplitError},
};
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ResubmitError {
    #[error("No chunk file found or reconstructable for site {0}")]
    Unresolved(MutationSite),
    #[error("Invalid chunk discovery pattern")]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Where the chunk of a resubmitted site came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    Existing,
    Reconstructed,
    Discovered,
}

#[derive(Debug, Clone, Default)]
pub struct ResubmitReport {
    pub submitted: Vec<(RedoEntry, JobId)>,
    /// entries whose job is still queued or running
    pub active: usize,
}

fn discover_chunk(root: &Path, site: &MutationSite) -> Result<Option<PathBuf>, ResubmitError> {
    let matcher = GlobBuilder::new(&format!("**/{}", site.chunk_file_name()))
        .literal_separator(true)
        .build()?
        .compile_matcher();

    Ok(WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(DirEntry::into_path)
        .find(|path| {
            path.strip_prefix(root)
                .map(|relative| matcher.is_match(relative))
                .unwrap_or(false)
        }))
}

/// Find the chunk file of `site`, rebuilding it from the position list if needed.
pub fn resolve_chunk(
    metadata: &Metadata,
    site: &MutationSite,
) -> Result<Option<(PathBuf, ChunkSource)>, ResubmitError> {
    let chunk_dir = &metadata.layout.chunk_dir;
    let chunk = chunk_dir.join(site.chunk_file_name());

    if chunk.is_file() {
        return Ok(Some((chunk, ChunkSource::Existing)));
    }

    match find_site_line(&metadata.inputs.positions.path, site) {
        Ok(Some(entry)) => {
            create_dir_all(chunk_dir)?;
            write_chunk(chunk_dir, &entry)?;
            info!(site = %site, chunk = ?chunk, "Reconstructed chunk from the position list");

            return Ok(Some((chunk, ChunkSource::Reconstructed)));
        }
        Ok(None) => debug!(site = %site, "Site not in the position list"),
        Err(error) => warn!(error = ?error, "Position list unusable for chunk reconstruction"),
    }

    Ok(discover_chunk(&metadata.layout.project_root, site)?.map(|path| {
        info!(site = %site, chunk = ?path, "Discovered chunk below the project root");

        (path, ChunkSource::Discovered)
    }))
}

/// Submit one pinned single-replica job per entry of `list`.
#[instrument(level = "info", skip_all, fields(entries = list.len()))]
pub fn resubmit(
    metadata: &Metadata,
    executors: &Executors,
    list: &RedoList,
) -> Result<ResubmitReport, ResubmitError> {
    let mut report = ResubmitReport::default();

    if list.is_empty() {
        info!("Redo list is empty, nothing to resubmit");

        return Ok(report);
    }

    let mut chunks: BTreeMap<MutationSite, PathBuf> = BTreeMap::new();
    for entry in list.iter() {
        let site = entry.mutation.site;

        if chunks.contains_key(&site) {
            continue;
        }

        let (chunk, _) = resolve_chunk(metadata, &site)?.ok_or(ResubmitError::Unresolved(site))?;
        chunks.insert(site, chunk);
    }

    for entry in list.iter() {
        let name = entry.job_name();

        if executors.is_active(&name)? {
            info!(job = %name, "Replacement already queued, skipping");
            report.active += 1;
            continue;
        }

        let Some(chunk) = chunks.get(&entry.mutation.site) else {
            return Err(ResubmitError::Unresolved(entry.mutation.site));
        };
        let job = ArrayJob::single(
            name,
            Task::Replica {
                chunk: chunk.clone(),
                replica: Some(entry.replica),
                redo: true,
            },
        );

        report.submitted.push((*entry, executors.submit(&job)?));
    }

    info!(
        submitted = report.submitted.len(),
        active = report.active,
        "Resubmitted missing replicas"
    );

    Ok(report)
}
