//! Work splitting: one chunk file per mutation site.
//!
//! A position list holds one site per line (`A.S.133 B`: the site token
//! followed by free-form fields the tool understands). Every site becomes a
//! chunk file `<site>.txt` containing its source line verbatim, which is what
//! one worker array hands to the tool.


use crate::{
    distributed::fs::{atomic_write, create_dir_all, FsError},
    mutation::{MutationParseError, MutationSite},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Position list not found at {0:?}")]
    NotFound(PathBuf),
    #[error("Line {line}: {source}")]
    Site {
        line: usize,
        #[source]
        source: MutationParseError,
    },
    #[error("Chunk {path:?} already exists with different content, sites are immutable")]
    Conflict { path: PathBuf },
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// One site of a position list together with its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLine {
    pub site: MutationSite,
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// chunk files in the order their sites appear
    pub chunks: Vec<PathBuf>,
    pub written: usize,
    pub unchanged: usize,
}

/// Parse every non-blank, non-comment line of a position list.
pub fn parse_positions(content: &str) -> Result<Vec<SiteLine>, SplitError> {
    content
        .lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(number, line)| -> Result<SiteLine, SplitError> {
            // only the first token names the site, the rest belongs to the tool
            let token = line.split_whitespace().next().unwrap_or_default();
            let site = token.parse().map_err(|source| SplitError::Site {
                line: number,
                source,
            })?;

            Ok(SiteLine {
                site,
                line: line.to_owned(),
            })
        })
        .collect()
}

fn read_positions(positions: &Path) -> Result<Vec<SiteLine>, SplitError> {
    let content = fs::read_to_string(positions)
        .map_err(|_| SplitError::NotFound(positions.to_path_buf()))?;

    parse_positions(&content)
}

/// Write one chunk, leaving an identical existing chunk untouched.
///
/// Returns `true` if the file was written.
pub fn write_chunk(chunk_dir: &Path, entry: &SiteLine) -> Result<bool, SplitError> {
    let path = chunk_dir.join(entry.site.chunk_file_name());
    let content = format!("{}\n", entry.line);

    match fs::read_to_string(&path) {
        Ok(existing) if existing == content => {
            debug!(path = ?path, "Chunk already up to date");

            Ok(false)
        }
        Ok(_) => Err(SplitError::Conflict { path }),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            atomic_write(&path, content.as_bytes())?;

            Ok(true)
        }
        Err(error) => Err(FsError::io(&path, error).into()),
    }
}

/// Split `positions` into chunk files under `chunk_dir`.
#[instrument(level = "info", skip_all, fields(positions = ?positions))]
pub fn split_positions(positions: &Path, chunk_dir: &Path) -> Result<SplitStats, SplitError> {
    let sites = read_positions(positions)?;
    let mut stats = SplitStats::default();

    create_dir_all(chunk_dir)?;

    for entry in &sites {
        if write_chunk(chunk_dir, entry)? {
            stats.written += 1;
        } else {
            stats.unchanged += 1;
        }

        let chunk = chunk_dir.join(entry.site.chunk_file_name());

        // a site listed twice with the same line maps to the same chunk
        if !stats.chunks.contains(&chunk) {
            stats.chunks.push(chunk);
        }
    }

    info!(
        sites = sites.len(),
        written = stats.written,
        unchanged = stats.unchanged,
        "Split position list"
    );

    Ok(stats)
}

/// Look up the position-list line of `site`, used to rebuild a lost chunk.
pub fn find_site_line(positions: &Path, site: &MutationSite) -> Result<Option<SiteLine>, SplitError> {
    Ok(read_positions(positions)?
        .into_iter()
        .find(|entry| entry.site == *site))
}
