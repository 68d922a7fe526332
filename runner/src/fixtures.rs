//! Throwaway projects for unit tests.

use crate::{
    config::RunnerConfig,
    executors::ExecutorKind,
    metadata::Metadata,
};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub const POSITIONS: &str = "E.N.654 PIKAA P\nA.S.133 PIKAA A\n";

pub struct Project {
    pub root: TempDir,
    pub metadata: Metadata,
}

impl Project {
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// chunk file of `site`, written from the fixture position list
    pub fn chunk(&self, site: &str) -> PathBuf {
        let line = POSITIONS
            .lines()
            .find(|line| {
                line.split_whitespace()
                    .next()
                    .and_then(|token| token.parse::<crate::mutation::MutationSite>().ok())
                    .map(|parsed| parsed.to_string() == site)
                    .unwrap_or(false)
            })
            .unwrap();
        let path = self.metadata.layout.chunk_dir.join(format!("{site}.txt"));

        fs::create_dir_all(&self.metadata.layout.chunk_dir).unwrap();
        fs::write(&path, format!("{line}\n")).unwrap();

        path
    }
}

pub fn executable(path: &Path, body: &str) -> PathBuf {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();

    path.to_path_buf()
}

/// A small, valid result database.
pub fn result_database(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }

    #[cfg(feature = "rusqlite")]
    {
        let connection = rusqlite::Connection::open(path).unwrap();
        connection
            .execute_batch(
                "create table ddg (id integer primary key, score real);
                 insert into ddg (score) values (-1.5);",
            )
            .unwrap();
    }

    #[cfg(not(feature = "rusqlite"))]
    fs::write(path, b"ddg result").unwrap();
}

/// Project on the local executor whose tool runs `tool_body` in the workspace.
///
/// `$TEMPLATE` in the body expands to a valid result database.
pub fn project(tool_body: &str, replicas: u32) -> Project {
    let root = tempfile::tempdir().unwrap();
    let template = root.path().join("template.db3");
    result_database(&template);

    let structure = root.path().join("input.pdb");
    let positions = root.path().join("positions.txt");
    fs::write(&structure, "ATOM      1  N   SER A 133\n").unwrap();
    fs::write(&positions, POSITIONS).unwrap();

    let body = tool_body.replace("$TEMPLATE", &template.to_string_lossy());
    let exec = executable(&root.path().join("tool.sh"), &body);

    let config = project_config(root.path(), exec, replicas);
    let metadata = Metadata::from_config(&config, root.path()).unwrap();
    metadata.save().unwrap();

    Project { root, metadata }
}

/// config of a [`project`] rooted at `root`, inputs and tool must exist already
pub fn project_config(root: &Path, tool: PathBuf, replicas: u32) -> RunnerConfig {
    let mut config = RunnerConfig::for_tool(tool);
    config.project = Some(String::from("kinase"));
    config.inputs.structure = Some(root.join("input.pdb"));
    config.inputs.positions = Some(root.join("positions.txt"));
    config.parameters.replicas = replicas;
    config.parameters.lock_timeout_secs = 30;
    config.executor.name = ExecutorKind::Local;
    config.executor.poll_interval_secs = 1;
    config.layout.scratch_root = Some(PathBuf::from("scratch"));

    config
}

/// tool producing one valid replica of `E-N654P` and its index line
pub const GOOD_TOOL: &str = "mkdir -p E-N654P/1\ncp $TEMPLATE E-N654P/1/ddg.db3\necho \"1,E-N654P,-1.5\" >> mutinfo.txt";

/// Publish replica `replica` of `mutation` into a run or aggregation directory.
pub fn publish(dir: &Path, mutation: &str, replica: u32) {
    result_database(&dir.join(mutation).join(replica.to_string()).join("ddg.db3"));
}
