//! Replica lifecycle.
//!
//! The state of a replica is never stored as the source of truth, it is
//! derived from what is visible on shared storage:
//!
//! ```text
//! Pending --(stage-out)--> Staged --(task ended, artifact valid)---> Verified
//!                                 \-(task ended, artifact invalid)-> Missing
//! Pending --(task ended, nothing published)------------------------> Missing
//! ```
//!
//! A missing replica is redone by discarding everything and starting over at
//! `Pending`. Markers written next to the results only record the last
//! observed state for humans, [`settle`] always looks at the artifact itself.


use crate::{
    database::{check_artifact, ArtifactCheck},
    distributed::{
        fs::{atomic_write, FsError},
        util::hostname,
    },
    mutation::Mutation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

pub const MARKER_FILE: &str = ".replica.json";

#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum ReplicaState {
    Pending = 0,
    Staged = 1,
    Verified = 2,
    Missing = 3,
}

/// What shared storage shows for one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub directory: bool,
    pub artifact: ArtifactCheck,
}

impl ReplicaSnapshot {
    pub fn capture(mutation_dir: &Path, replica: u32, artifact: &str) -> Self {
        let directory = replica_path(mutation_dir, replica);

        Self {
            directory: directory.is_dir(),
            artifact: check_artifact(&directory.join(artifact)),
        }
    }
}

/// state while the replica's task may still be running
pub fn observe(snapshot: &ReplicaSnapshot) -> ReplicaState {
    if snapshot.directory {
        ReplicaState::Staged
    } else {
        ReplicaState::Pending
    }
}

/// final state once the replica's task has ended
pub fn settle(snapshot: &ReplicaSnapshot) -> ReplicaState {
    if snapshot.directory && snapshot.artifact.is_valid() {
        ReplicaState::Verified
    } else {
        ReplicaState::Missing
    }
}

pub fn replica_path(mutation_dir: &Path, replica: u32) -> PathBuf {
    mutation_dir.join(replica.to_string())
}

/// numeric subdirectories of a mutation directory
pub fn replica_dirs(mutation_dir: &Path) -> BTreeSet<u32> {
    let Ok(entries) = fs::read_dir(mutation_dir) else {
        return BTreeSet::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReplicaMarker {
    pub state: ReplicaState,
    pub mutation: String,
    pub replica: u32,
    pub host: String,
    pub timestamp: DateTime<Utc>,
}

impl ReplicaMarker {
    pub fn new(state: ReplicaState, mutation: &Mutation, replica: u32) -> Self {
        Self {
            state,
            mutation: mutation.dir_name(),
            replica,
            host: hostname().to_owned(),
            timestamp: Utc::now(),
        }
    }

    pub fn write(&self, replica_dir: &Path) -> Result<(), FsError> {
        let path = replica_dir.join(MARKER_FILE);
        let bytes = serde_json::to_vec(self).map_err(|error| FsError::io(&path, error.into()))?;

        atomic_write(&path, &bytes)
    }

    pub fn read(replica_dir: &Path) -> Option<Self> {
        let path = replica_dir.join(MARKER_FILE);
        let bytes = fs::read(&path).ok()?;

        match serde_json::from_slice(&bytes) {
            Ok(marker) => Some(marker),
            Err(error) => {
                warn!(error = ?error, path = ?path, "Ignoring unreadable replica marker");

                None
            }
        }
    }
}
