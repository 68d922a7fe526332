use super::{resolve_chunk, resubmit, ChunkSource, ResubmitError};
use crate::{
    executors::Executors,
    fixtures::{project, GOOD_TOOL},
    mutation::MutationSite,
    redo::RedoList,
};
use std::fs;

#[test]
pub fn chunks_are_found_rebuilt_or_discovered() {
    let project = project(GOOD_TOOL, 5);
    let existing = project.chunk("E-N-654");

    assert_eq!(
        resolve_chunk(&project.metadata, &MutationSite::new('E', 'N', 654)).unwrap(),
        Some((existing, ChunkSource::Existing))
    );

    let (rebuilt, source) = resolve_chunk(&project.metadata, &MutationSite::new('A', 'S', 133))
        .unwrap()
        .unwrap();
    assert_eq!(source, ChunkSource::Reconstructed);
    assert_eq!(fs::read_to_string(rebuilt).unwrap(), "A.S.133 PIKAA A\n");

    let old = project.path().join("old/split");
    fs::create_dir_all(&old).unwrap();
    fs::write(old.join("B-G-12.txt"), "B.G.12 PIKAA A\n").unwrap();
    assert_eq!(
        resolve_chunk(&project.metadata, &MutationSite::new('B', 'G', 12)).unwrap(),
        Some((old.join("B-G-12.txt"), ChunkSource::Discovered))
    );

    assert_eq!(
        resolve_chunk(&project.metadata, &MutationSite::new('C', 'W', 7)).unwrap(),
        None
    );
}

#[test]
pub fn every_entry_becomes_one_pinned_job() {
    let project = project(GOOD_TOOL, 5);
    project.chunk("E-N-654");
    let executors = Executors::load(&project.metadata).unwrap();
    let list = RedoList::parse("E-N654P:3\nE-N654P:5\nE-N654P:3\n").unwrap();

    let report = resubmit(&project.metadata, &executors, &list).unwrap();

    assert_eq!(report.submitted.len(), 2);
    assert_eq!(report.active, 0);
    let redo_run = project.metadata.layout.redo_root.join("E-N-654/E-N654P");
    assert!(redo_run.join("3/ddg.db3").is_file());
    assert!(redo_run.join("5/ddg.db3").is_file());
    assert!(!redo_run.join("1").exists());
}

#[test]
pub fn unresolved_site_submits_nothing() {
    let project = project(GOOD_TOOL, 5);
    project.chunk("E-N-654");
    let executors = Executors::load(&project.metadata).unwrap();
    let list = RedoList::parse("E-N654P:3\nC-W7A:1\n").unwrap();

    assert!(matches!(
        resubmit(&project.metadata, &executors, &list),
        Err(ResubmitError::Unresolved(site)) if site == MutationSite::new('C', 'W', 7)
    ));
    assert!(!project.metadata.layout.redo_root.exists());
}

#[test]
pub fn empty_list_is_a_no_op() {
    let project = project(GOOD_TOOL, 5);
    let executors = Executors::load(&project.metadata).unwrap();

    let report = resubmit(&project.metadata, &executors, &RedoList::new()).unwrap();

    assert!(report.submitted.is_empty());
}
