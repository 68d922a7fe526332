use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::{error, trace};

/// Open `path` read-only and run `pragma quick_check`.
pub fn quick_check(path: &Path) -> Result<(), String> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|error| error.to_string())?;

    let verdict: String = connection
        .query_row("pragma quick_check", [], |row| row.get(0))
        .map_err(|error| error.to_string())?;

    trace!(path = ?path, verdict = %verdict, "quick_check finished");

    if let Err((_, error)) = connection.close() {
        error!(error = ?error, path = ?path, "Failed to close SQLite connection: {error}");
    }

    if verdict == "ok" {
        Ok(())
    } else {
        Err(verdict)
    }
}
