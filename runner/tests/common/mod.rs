#![allow(dead_code)]

use ddg_runner::{config::RunnerConfig, executors::ExecutorKind, metadata::Metadata};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;

pub const POSITIONS: &str = "# two sites\nE.N.654 PIKAA P\nA.S.133 PIKAA A\n";

/// Tool deriving the mutation from the chunk, failing once per `fail.*` token
/// next to the template database.
pub const FLAKY_TOOL: &str = r#"for token in "$(dirname TEMPLATE)"/fail.*; do
  if rm "$token" 2>/dev/null; then echo "injected failure"; exit 1; fi
done
m=$(awk '{split($1, a, "."); print a[1] "-" a[2] a[3] $3}' "$1")
mkdir -p "$m/1"
cp TEMPLATE "$m/1/ddg.db3"
echo "1,$m,-1.5" >> mutinfo.txt"#;

pub struct Scratch {
    pub root: TempDir,
    pub tool: PathBuf,
    pub structure: PathBuf,
    pub positions: PathBuf,
}

impl Scratch {
    pub fn new(failures: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        let template = root.path().join("template.db3");
        result_database(&template);

        let tool = root.path().join("tool.sh");
        fs::write(
            &tool,
            format!(
                "#!/bin/sh\n{}\n",
                FLAKY_TOOL.replace("TEMPLATE", &template.to_string_lossy())
            ),
        )
        .unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let structure = root.path().join("input.pdb");
        let positions = root.path().join("positions.txt");
        fs::write(&structure, "ATOM      1  N   SER A 133\n").unwrap();
        fs::write(&positions, POSITIONS).unwrap();

        for token in 0..failures {
            fs::write(root.path().join(format!("fail.{token}")), "").unwrap();
        }

        Self {
            root,
            tool,
            structure,
            positions,
        }
    }

    /// swap the flaky tool for `body`, keeping its path
    pub fn replace_tool(&self, body: &str) {
        fs::write(&self.tool, format!("#!/bin/sh\n{body}\n")).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn project_root(&self) -> PathBuf {
        self.path().join("project")
    }

    /// descriptor for the local executor, written to the project root
    pub fn metadata(&self, replicas: u32) -> Metadata {
        let mut config = RunnerConfig::for_tool(self.tool.clone());
        config.project = Some(String::from("kinase"));
        config.inputs.structure = Some(self.structure.clone());
        config.inputs.positions = Some(self.positions.clone());
        config.parameters.replicas = replicas;
        config.parameters.lock_timeout_secs = 60;
        config.executor.name = ExecutorKind::Local;
        config.executor.poll_interval_secs = 1;
        config.layout.scratch_root = Some(self.path().join("scratch"));

        fs::create_dir_all(self.project_root()).unwrap();
        let metadata = Metadata::from_config(&config, &self.project_root()).unwrap();
        metadata.save().unwrap();

        metadata
    }

    /// run the binary with a private TMPDIR
    pub fn cli(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_ddg-runner"))
            .args(args)
            .env("TMPDIR", self.path().join("tmp"))
            .env("RUST_LOG", "warn")
            .env_remove("SLURM_ARRAY_TASK_ID")
            .output()
            .unwrap()
    }
}

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

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
