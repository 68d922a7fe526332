//! Index (mutinfo) files: one opaque line per processed mutation.
//!
//! Only two things about a line are interpreted: exact equality, for
//! de-duplication, and the comma separated mutation field (column 1), for
//! filtering by mutation. Everything else is passed through untouched.

#[cfg(test)]
mod index_test;

use crate::{
    distributed::fs::{atomic_write, FsError},
    mutation::Mutation,
};
use itertools::Itertools;
use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

/// Read all non-blank lines, a missing file reads as empty.
pub fn read_index(path: &Path) -> Result<Vec<String>, FsError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(FsError::io(path, error)),
    }
}

/// Replace `path` atomically with `lines`.
pub fn write_index<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<(), FsError> {
    let mut content = String::with_capacity(lines.iter().map(|l| l.as_ref().len() + 1).sum());

    for line in lines {
        content.push_str(line.as_ref());
        content.push('\n');
    }

    atomic_write(path, content.as_bytes())
}

/// Exact-match de-duplication keeping the first occurrence.
pub fn dedup<I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    lines.into_iter().unique().collect()
}

/// Append the lines of `lines` that `path` does not contain yet.
///
/// Not atomic on its own, callers hold the run lock.
pub fn append_missing<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<usize, FsError> {
    let mut present: HashSet<String> = read_index(path)?.into_iter().collect();
    let fresh: Vec<&str> = lines
        .iter()
        .map(|line| -> &str { line.as_ref() })
        .filter(|line| !line.trim().is_empty())
        .filter(|line| present.insert((*line).to_owned()))
        .collect();

    if fresh.is_empty() {
        return Ok(0);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|error| FsError::io(path, error))?;
    let mut buffer = String::new();

    for line in &fresh {
        buffer.push_str(line);
        buffer.push('\n');
    }

    file.write_all(buffer.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|error| FsError::io(path, error))?;

    Ok(fresh.len())
}

/// the raw mutation field of a line
pub fn mutation_field(line: &str) -> Option<&str> {
    line.split(',').nth(1).map(str::trim).filter(|field| !field.is_empty())
}

pub fn parse_mutation(line: &str) -> Option<Mutation> {
    mutation_field(line).and_then(|field| field.parse().ok())
}

/// Delimiter-bounded match of `dir_name` against the mutation field.
pub fn references(line: &str, dir_name: &str) -> bool {
    line.contains(&format!(",{dir_name},")) || line.ends_with(&format!(",{dir_name}"))
}

/// Whether `line` belongs to `mutation`.
///
/// Parseable fields are compared as typed identities, so `E-N-654-P` and
/// `E-N654P` name the same mutation. Anything else falls back to [`references`].
pub fn line_matches(line: &str, mutation: &Mutation) -> bool {
    match parse_mutation(line) {
        Some(parsed) => parsed == *mutation,
        None => references(line, &mutation.dir_name()),
    }
}
