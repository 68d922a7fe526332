/*
 * Slurm executor:
 * 1. every stage is a (possibly single element) job array submitted through sbatch
 * 2. array elements re-enter this binary through `--wrap "exec <worker_script> <task>"`
 *    so the near-timeout signal (`--signal=B:USR1@..`) reaches the worker directly
 * 3. ordering between stages is expressed with `--dependency=afterany:..`, never by polling
 *    inside a job; only the driver polls squeue
 */

use super::{ArrayJob, ExecutorError, JobId, JobState};
use crate::{
    config::{ExecutorConfig, Parameters},
    distributed::fs::create_dir_all,
    metadata::Metadata,
};
use itertools::Itertools;
use shell_escape::escape;
use std::{
    borrow::Cow,
    path::PathBuf,
    process::{Command, Output},
};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct SlurmExecutor {
    parameters: Parameters,
    executor: ExecutorConfig,
    worker_script: PathBuf,
    metadata_path: PathBuf,
    log_dir: PathBuf,
}

impl SlurmExecutor {
    pub fn load(metadata: &Metadata) -> Self {
        Self {
            parameters: metadata.parameters.clone(),
            executor: metadata.executor.clone(),
            worker_script: metadata.layout.worker_script.clone(),
            metadata_path: metadata.path(),
            log_dir: metadata.layout.project_root.join("logs"),
        }
    }

    /// full sbatch argument list for `job`
    pub fn sbatch_args(&self, job: &ArrayJob) -> Vec<String> {
        let mut args = vec![
            String::from("--parsable"),
            format!("--job-name={}", job.name),
            format!("--cpus-per-task={}", self.parameters.cores_per_replica),
            format!("--mem={}M", self.parameters.memory_mb),
            format!("--tmp={}M", self.parameters.scratch_mb),
            format!("--time={}", self.parameters.walltime),
            format!("--signal=B:USR1@{}", self.parameters.warning_signal_secs),
        ];

        match &job.array {
            Some(range) => {
                args.push(format!(
                    "--array={}-{}%{}",
                    range.start(),
                    range.end(),
                    self.parameters.max_concurrent
                ));
                args.push(format!(
                    "--output={}/%x_%A_%a.out",
                    self.log_dir.to_string_lossy()
                ));
            }
            None => args.push(format!("--output={}/%x_%j.out", self.log_dir.to_string_lossy())),
        }

        if !job.dependencies.is_empty() {
            args.push(format!(
                "--dependency=afterany:{}",
                job.dependencies.iter().join(":")
            ));
        }
        if let Some(partition) = &self.executor.partition {
            args.push(format!("--partition={partition}"));
        }
        if let Some(account) = &self.executor.account {
            args.push(format!("--account={account}"));
        }

        args.extend(self.executor.extra_args.iter().cloned());

        let command = std::iter::once(self.worker_script.to_string_lossy().into_owned())
            .chain(job.task.args(&self.metadata_path))
            .map(|arg| escape(Cow::Owned(arg)).into_owned())
            .join(" ");

        args.push(format!("--wrap=exec {command}"));

        args
    }

    pub fn submit(&self, job: &ArrayJob) -> Result<JobId, ExecutorError> {
        create_dir_all(&self.log_dir)?;

        let args = self.sbatch_args(job);
        trace!(args = ?args, "Calling sbatch");

        let output = run("sbatch", args.as_slice())?;

        parse_job_id(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn state(&self, id: JobId) -> Result<JobState, ExecutorError> {
        let job = id.to_string();

        match run("squeue", &["-h", "-j", job.as_str(), "-o", "%T"]) {
            Ok(output) => Ok(parse_queue_states(&String::from_utf8_lossy(&output.stdout))),
            // squeue refuses ids that were already purged from the controller
            Err(ExecutorError::Scheduler { stderr, .. }) if stderr.contains("Invalid job id") => {
                debug!(job = %id, "Job no longer known to the scheduler");

                Ok(JobState::Done)
            }
            Err(error) => Err(error),
        }
    }

    pub fn is_active(&self, name: &str) -> Result<bool, ExecutorError> {
        let output = run("squeue", &["-h", "-n", name, "-o", "%i"])?;

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

fn run<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S]) -> Result<Output, ExecutorError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ExecutorError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        warn!(program = program, stderr = %stderr, "Scheduler command failed");

        Err(ExecutorError::Scheduler {
            program: program.to_owned(),
            status: output.status.to_string(),
            stderr,
        })
    }
}

/// `sbatch --parsable` prints `<id>` or `<id>;<cluster>`
pub fn parse_job_id(stdout: &str) -> Result<JobId, ExecutorError> {
    let line = stdout.trim();

    line.split(';')
        .next()
        .and_then(|id| id.trim().parse().ok())
        .map(JobId)
        .ok_or_else(|| ExecutorError::InvalidJobId(line.to_owned()))
}

/// fold the per element states of `squeue -o %T` into one state
pub fn parse_queue_states(stdout: &str) -> JobState {
    let mut state = JobState::Done;

    for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match line {
            "RUNNING" | "COMPLETING" | "CONFIGURING" | "STAGE_OUT" | "SIGNALING" => {
                return JobState::Running
            }
            _ => state = JobState::Queued,
        }
    }

    state
}
