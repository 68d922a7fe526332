use super::{chunk_site, relabel_replica, run_replica, RunTarget, WorkerError};
use crate::{
    fixtures::{project, GOOD_TOOL},
    index::read_index,
    mutation::MutationSite,
    replica::{ReplicaMarker, ReplicaState},
    tool::ToolOutcome,
};
use std::fs;

#[test]
pub fn publishes_relabeled_replica() {
    let project = project(GOOD_TOOL, 5);
    let chunk = project.chunk("E-N-654");

    let outcome = run_replica(&project.metadata, &chunk, 3, RunTarget::Primary).unwrap();
    let run_dir = project.metadata.layout.run_root.join("E-N-654");

    assert!(outcome.succeeded());
    assert_eq!(outcome.site, MutationSite::new('E', 'N', 654));
    assert_eq!(outcome.relabeled, 1);
    assert!(run_dir.join("E-N654P/3/ddg.db3").is_file());
    assert!(!run_dir.join("E-N654P/1").exists());
    assert!(run_dir.join("logs/replica_3.log").is_file());
    assert!(run_dir.join("input.pdb").is_file());
    assert_eq!(
        ReplicaMarker::read(&run_dir.join("E-N654P/3")).unwrap().state,
        ReplicaState::Staged
    );
    assert_eq!(
        read_index(&run_dir.join("mutinfo.txt")).unwrap(),
        vec!["1,E-N654P,-1.5"]
    );

    // the private workspace is gone
    let scratch = project.metadata.scratch_root();
    assert_eq!(fs::read_dir(scratch).unwrap().count(), 0);
}

#[test]
pub fn replicas_of_a_site_share_the_run_directory() {
    let project = project(GOOD_TOOL, 5);
    let chunk = project.chunk("E-N-654");

    for replica in [2, 1, 2] {
        run_replica(&project.metadata, &chunk, replica, RunTarget::Primary).unwrap();
    }

    let run_dir = project.metadata.layout.run_root.join("E-N-654");
    assert!(run_dir.join("E-N654P/1/ddg.db3").is_file());
    assert!(run_dir.join("E-N654P/2/ddg.db3").is_file());
    assert_eq!(read_index(&run_dir.join("mutinfo.txt")).unwrap().len(), 1);
}

#[test]
pub fn failed_tool_still_stages_out() {
    let project = project("mkdir -p E-N654P/1\necho partial > E-N654P/1/ddg.db3\necho boom\nexit 1", 5);
    let chunk = project.chunk("E-N-654");

    let outcome = run_replica(&project.metadata, &chunk, 4, RunTarget::Primary).unwrap();
    let run_dir = project.metadata.layout.run_root.join("E-N-654");

    assert_eq!(outcome.tool, Some(ToolOutcome::Failed(Some(1))));
    assert!(run_dir.join("E-N654P/4/ddg.db3").is_file());
    assert!(fs::read_to_string(run_dir.join("logs/replica_4.log"))
        .unwrap()
        .contains("boom"));
}

#[test]
pub fn redo_target_writes_into_redo_root() {
    let project = project(GOOD_TOOL, 5);
    let chunk = project.chunk("E-N-654");

    run_replica(&project.metadata, &chunk, 2, RunTarget::Redo).unwrap();

    assert!(project
        .metadata
        .layout
        .redo_root
        .join("E-N-654/E-N654P/2/ddg.db3")
        .is_file());
    assert!(!project.metadata.layout.run_root.exists());
}

#[test]
pub fn rejects_missing_chunk_and_replica_zero() {
    let project = project(GOOD_TOOL, 5);
    let chunk = project.chunk("E-N-654");

    assert!(matches!(
        run_replica(&project.metadata, &chunk, 0, RunTarget::Primary),
        Err(WorkerError::InvalidReplica)
    ));
    assert!(matches!(
        chunk_site(&project.path().join("nope.txt")),
        Err(WorkerError::ChunkMissing(_))
    ));
}

#[test]
pub fn relabel_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("E-N654P/1")).unwrap();
    fs::create_dir_all(root.path().join("A-S133A/1")).unwrap();
    fs::create_dir_all(root.path().join("logs")).unwrap();

    assert_eq!(relabel_replica(root.path(), 7).unwrap(), 2);
    assert_eq!(relabel_replica(root.path(), 7).unwrap(), 0);
    assert!(root.path().join("E-N654P/7").is_dir());
    assert!(root.path().join("A-S133A/7").is_dir());
    assert!(root.path().join("logs").is_dir());
    assert_eq!(relabel_replica(root.path(), 1).unwrap(), 0);
}
