//! Redo lists: newline separated `<mutation>:<replica>` pairs.


use crate::{
    distributed::fs::{atomic_write, FsError},
    mutation::{Mutation, MutationParseError},
};
use std::{collections::BTreeSet, fmt, fs, path::Path, str::FromStr};
use thiserror::Error;

/// file name of the redo list written next to the master index
pub const REDO_FILE: &str = "missing_replicas.txt";

#[derive(Error, Debug)]
pub enum RedoError {
    #[error("Redo list not found at {0:?}")]
    NotFound(std::path::PathBuf),
    #[error("Line {line}: expected <mutation>:<replica>, got {content:?}")]
    Malformed { line: usize, content: String },
    #[error("Line {line}: {source}")]
    Mutation {
        line: usize,
        #[source]
        source: MutationParseError,
    },
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RedoEntry {
    pub mutation: Mutation,
    pub replica: u32,
}

impl RedoEntry {
    pub fn new(mutation: Mutation, replica: u32) -> Self {
        Self { mutation, replica }
    }

    /// deterministic scheduler job name
    pub fn job_name(&self) -> String {
        format!("redo_{}_{}", self.mutation.dir_name(), self.replica)
    }
}

impl fmt::Display for RedoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mutation.dir_name(), self.replica)
    }
}

impl FromStr for RedoEntry {
    type Err = RedoError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse_line(1, input)
    }
}

fn parse_line(line: usize, content: &str) -> Result<RedoEntry, RedoError> {
    let malformed = || RedoError::Malformed {
        line,
        content: content.to_owned(),
    };
    let (mutation, replica) = content.trim().rsplit_once(':').ok_or_else(malformed)?;
    let replica: u32 = replica.trim().parse().map_err(|_| malformed())?;

    if replica == 0 {
        return Err(malformed());
    }

    Ok(RedoEntry {
        mutation: mutation
            .parse()
            .map_err(|source| RedoError::Mutation { line, source })?,
        replica,
    })
}

/// Sorted, duplicate free set of redo entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedoList(BTreeSet<RedoEntry>);

impl RedoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, RedoError> {
        let content =
            fs::read_to_string(path).map_err(|_| RedoError::NotFound(path.to_path_buf()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, RedoError> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| parse_line(number + 1, line))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// Always writes, an empty list truncates the file.
    pub fn save(&self, path: &Path) -> Result<(), RedoError> {
        atomic_write(path, self.to_string().as_bytes())?;

        Ok(())
    }

    pub fn insert(&mut self, entry: RedoEntry) -> bool {
        self.0.insert(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RedoEntry> {
        self.0.iter()
    }

    /// distinct mutations in the list
    pub fn mutations(&self) -> BTreeSet<Mutation> {
        self.0.iter().map(|entry| entry.mutation).collect()
    }
}

impl fmt::Display for RedoList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.0 {
            writeln!(f, "{entry}")?;
        }

        Ok(())
    }
}

impl FromIterator<RedoEntry> for RedoList {
    fn from_iter<T: IntoIterator<Item = RedoEntry>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
