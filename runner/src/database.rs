//! Validation of the per-replica result database.
//!
//! A replica only counts once its result artifact exists, is not empty and,
//! when built with the `rusqlite` feature, opens as an SQLite database that
//! passes `pragma quick_check`. Truncated files left behind by killed workers
//! are treated exactly like missing ones.

#[cfg(feature = "rusqlite")]
pub mod sqlite;


use std::{fs, io, path::Path};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCheck {
    Absent,
    Empty,
    Corrupt(String),
    Valid,
}

impl ArtifactCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

pub fn check_artifact(path: &Path) -> ArtifactCheck {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return ArtifactCheck::Absent,
        Err(error) => return ArtifactCheck::Corrupt(error.to_string()),
    };

    if !metadata.is_file() {
        return ArtifactCheck::Corrupt(String::from("not a regular file"));
    }
    if metadata.len() == 0 {
        return ArtifactCheck::Empty;
    }

    #[cfg(feature = "rusqlite")]
    if let Err(reason) = sqlite::quick_check(path) {
        debug!(path = ?path, reason = %reason, "Result database failed validation");

        return ArtifactCheck::Corrupt(reason);
    }

    debug!(path = ?path, "Result database is valid");

    ArtifactCheck::Valid
}
