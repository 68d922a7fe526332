use super::util::{hostname, process_tag};
use ignore::WalkBuilder;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    ops::Deref,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0:?} exists but is not a directory")]
    NotADirectory(PathBuf),
    #[error("Workspace {0:?} is already in use")]
    WorkspaceTaken(PathBuf),
    #[error("Failed to walk directory tree")]
    Walk(#[from] ignore::Error),
}

impl FsError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Outcome of an exclusive create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// this caller created the path and owns populating it
    Created,
    /// somebody else got there first
    Existing,
}

/// How file collisions are handled while copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

impl CopyStats {
    pub fn merge(&mut self, other: CopyStats) {
        self.files += other.files;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// Create `path` with a single `mkdir`, the parent must exist.
///
/// Never check-then-create: the `EEXIST` of `mkdir` is the only signal used to
/// decide ownership.
pub fn claim_dir(path: &Path) -> Result<Claim, FsError> {
    match fs::create_dir(path) {
        Ok(()) => {
            trace!(path = ?path, "Claimed directory");

            Ok(Claim::Created)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(Claim::Existing)
            } else {
                Err(FsError::NotADirectory(path.to_path_buf()))
            }
        }
        Err(error) => Err(FsError::io(path, error)),
    }
}

/// like `claim_dir` but creates missing parents first
pub fn claim_dir_all(path: &Path) -> Result<Claim, FsError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    claim_dir(path)
}

pub fn create_dir_all(path: &Path) -> Result<(), FsError> {
    fs::create_dir_all(path).map_err(|error| FsError::io(path, error))
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());

    path.with_file_name(format!(".{name}.tmp.{}", process_tag()))
}

/// Write `bytes` to a temporary sibling and rename it over `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    let temporary = temporary_sibling(path);

    let result = File::create(&temporary)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temporary, path));

    if let Err(error) = result {
        let _ = fs::remove_file(&temporary);

        return Err(FsError::io(path, error));
    }

    Ok(())
}

/// Stream `source` into `destination`.
///
/// With `Overwrite::Always` the data goes through a temporary sibling that is
/// renamed into place, so readers never observe a torn file. With
/// `Overwrite::Never` the destination is opened with `O_EXCL` and an existing
/// file is left untouched (returns `Ok(None)`).
pub fn copy_file(
    source: &Path,
    destination: &Path,
    overwrite: Overwrite,
) -> Result<Option<u64>, FsError> {
    let mut reader = File::open(source).map_err(|error| FsError::io(source, error))?;

    match overwrite {
        Overwrite::Never => {
            let mut writer = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(destination)
            {
                Ok(file) => file,
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    trace!(path = ?destination, "Kept existing file");

                    return Ok(None);
                }
                Err(error) => return Err(FsError::io(destination, error)),
            };

            io::copy(&mut reader, &mut writer)
                .map(Some)
                .map_err(|error| FsError::io(destination, error))
        }
        Overwrite::Always => {
            let temporary = temporary_sibling(destination);
            let result = File::create(&temporary)
                .and_then(|mut writer| io::copy(&mut reader, &mut writer))
                .and_then(|bytes| fs::rename(&temporary, destination).map(|()| bytes));

            match result {
                Ok(bytes) => Ok(Some(bytes)),
                Err(error) => {
                    let _ = fs::remove_file(&temporary);

                    Err(FsError::io(destination, error))
                }
            }
        }
    }
}

/// Recursively copy the contents of `source` into `destination`.
///
/// Directories are merged, files follow `overwrite`. Symlinks are not
/// followed and not copied. Entries are visited in file name order so two
/// copies of the same tree perform the same operations.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    overwrite: Overwrite,
) -> Result<CopyStats, FsError> {
    let mut stats = CopyStats::default();

    create_dir_all(destination)?;

    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .build();

    for entry in walker {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) if relative.as_os_str().is_empty() => continue,
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                warn!(path = ?entry.path(), "Walked outside of copy source, skipping");
                continue;
            }
        };
        let target = destination.join(&relative);

        match entry.file_type() {
            Some(kind) if kind.is_dir() => create_dir_all(&target)?,
            Some(kind) if kind.is_file() => {
                match copy_file(entry.path(), &target, overwrite)? {
                    Some(bytes) => {
                        stats.files += 1;
                        stats.bytes += bytes;
                    }
                    None => stats.skipped += 1,
                }
            }
            _ => debug!(path = ?entry.path(), "Skipped non regular file"),
        }
    }

    Ok(stats)
}

/// Private scratch directory, removed with all of its contents on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Allocate `root/name` exclusively. Two replicas never share a
    /// workspace, even on the same node.
    pub fn allocate(root: &Path, name: &str) -> Result<Self, FsError> {
        create_dir_all(root)?;
        let path = root.join(name);

        match claim_dir(&path)? {
            Claim::Created => {
                debug!(path = ?path, host = %hostname(), "Allocated private workspace");

                Ok(Self { path })
            }
            Claim::Existing => Err(FsError::WorkspaceTaken(path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for Workspace {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Released workspace"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => error!(error = ?error, path = ?self.path, "Failed to clean up workspace"),
        }
    }
}
