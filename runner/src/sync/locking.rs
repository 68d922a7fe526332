use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};
use std::{
    fs::{File, OpenOptions},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, trace};

/// name of the lock file inside every run directory
pub const LOCK_FILE: &str = ".stage.lock";

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to open lock file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to lock {path:?}: {errno}")]
    Flock { path: PathBuf, errno: Errno },
    #[error("Timed out after {waited:?} waiting for {path:?}")]
    Timeout { path: PathBuf, waited: Duration },
}

/// Exclusive advisory lock over one directory, released on drop.
///
/// The lock file holds no data, only its `flock` matters. Locks are bound to
/// the open file description, so two `RunLock`s on the same directory exclude
/// each other across nodes, processes and threads alike.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
    waited: Duration,
}

impl RunLock {
    /// Block until the lock on `directory` is held or `timeout` elapsed.
    pub fn acquire(directory: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = directory.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {
                    let waited = start.elapsed();
                    trace!(path = ?path, waited = ?waited, "Acquired run lock");

                    return Ok(Self { file, path, waited });
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EWOULDBLOCK) => {
                    let waited = start.elapsed();

                    if waited >= timeout {
                        return Err(LockError::Timeout { path, waited });
                    }

                    thread::sleep(backoff.min(timeout - waited));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(errno) => return Err(LockError::Flock { path, errno }),
            }
        }
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // closing the descriptor releases the lock as well, unlocking first keeps the intent explicit
        match flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            Ok(()) => debug!(path = ?self.path, "Released run lock"),
            Err(errno) => error!(errno = ?errno, path = ?self.path, "Failed to release run lock"),
        }
    }
}
