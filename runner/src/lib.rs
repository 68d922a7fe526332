pub mod aggregate;
pub mod config;
pub mod database;
pub mod detect;
pub mod distributed;
pub mod executors;
pub mod index;
pub mod metadata;
pub mod mutation;
pub mod pipeline;
pub mod redo;
pub mod replica;
pub mod restore;
pub mod resubmit;
pub mod split;
pub mod stageout;
pub mod sync;
pub mod tool;
pub mod worker;

#[cfg(test)]
mod fixtures;

/// Process exit codes shared by every stage of the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    Usage = 1,
    MissingInput = 2,
    Internal = 3,
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status as u8)
    }
}
