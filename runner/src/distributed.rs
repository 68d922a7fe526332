//! Coordination over a shared, non-transactional filesystem.
//!
//! There is no coordinator process. Every shared write target is partitioned
//! by mutation identity and claimed through one of two primitives:
//!
//! * `mkdir` is atomic on every POSIX filesystem we care about (including
//!   lustre and beegfs), so [`fs::claim_dir`] acts as a test-and-set: exactly
//!   one caller observes [`fs::Claim::Created`] for a given path.
//! * short critical sections inside one run directory are serialized by the
//!   advisory lock in [`crate::sync::locking`].
//!
//! Private, node-local scratch space is handed out as a [`fs::Workspace`]
//! which is removed again on drop.
pub mod fs;
pub mod util;

#[cfg(test)]
mod fs_test;
