use once_cell::sync::Lazy;
use std::{
    env,
    path::PathBuf,
    process,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::error;

static HOSTNAME: Lazy<String> = Lazy::new(|| match nix::unistd::gethostname() {
    Ok(hostname) => hostname.to_string_lossy().into_owned(),
    Err(error) => {
        error!(error = ?error, "Failed to retrieve hostname: {error}");

        String::from("localhost")
    }
});

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn hostname() -> &'static str {
    HOSTNAME.as_str()
}

/// unique token per call for temporary names on shared storage (host.pid.seq)
pub fn process_tag() -> String {
    format!(
        "{}.{}.{}",
        hostname(),
        process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// scheduler job id if present, falls back to the process id
pub fn job_id() -> String {
    ["SLURM_ARRAY_JOB_ID", "SLURM_JOB_ID"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| format!("local{}", process::id()))
}

/// primitve way to retrieve the tmp dir from the environment with default to /tmp
pub fn get_tmp_dir() -> PathBuf {
    env::var("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or(PathBuf::from("/tmp"))
}

/// name of the private workspace for one (job, replica) pair on this node
pub fn workspace_name(project: &str, job: &str, replica: u32) -> String {
    format!("{project}.{job}.{replica}.{}", process::id())
}
