use super::{merge_restore, RestoreError, RestoreOptions};
use crate::{
    detect::BACKUP_FILE,
    fixtures::publish,
    index::read_index,
    redo::RedoList,
};
use std::{fs, path::Path};

fn options<'a>(aggregate_root: &'a Path, redo_root: &'a Path) -> RestoreOptions<'a> {
    RestoreOptions {
        aggregate_root,
        redo_root,
        expected: 5,
        artifact: "ddg.db3",
        index_file: "mutinfo.txt",
    }
}

/// aggregation tree after an in-place detection found `E-N654P:{1,3,5}` missing
fn detected_tree(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let aggregate = root.join("aggregate");
    let redo = root.join("redo_runs");
    for replica in [2, 4] {
        publish(&aggregate, "E-N654P", replica);
    }
    for replica in 1..=5 {
        publish(&aggregate, "A-S133A", replica);
    }
    fs::write(aggregate.join("mutinfo.txt"), "1,A-S133A,0.2\n").unwrap();
    fs::write(
        aggregate.join(BACKUP_FILE),
        "1,E-N654P,-1.5\n1,A-S133A,0.2\n",
    )
    .unwrap();

    let run = redo.join("E-N-654");
    for replica in [1, 3, 5] {
        publish(&run, "E-N654P", replica);
    }
    fs::write(run.join("mutinfo.txt"), "1,E-N654P,-1.7\n").unwrap();

    (aggregate, redo)
}

#[test]
pub fn restores_backup_lines_for_completed_mutations() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());

    let report = merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(report.copied, 3);
    assert_eq!(report.completed, 1);
    assert_eq!(report.restored_lines, 1);
    assert!(aggregate.join("E-N654P/5/ddg.db3").is_file());
    // the original line comes back, not the one of the redo run
    assert_eq!(
        read_index(&aggregate.join("mutinfo.txt")).unwrap(),
        vec!["1,A-S133A,0.2", "1,E-N654P,-1.5"]
    );
}

#[test]
pub fn rerunning_changes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());

    merge_restore(&options(&aggregate, &redo), None).unwrap();
    let master = fs::read(aggregate.join("mutinfo.txt")).unwrap();
    let again = merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(again.copied, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(again.restored_lines, 0);
    assert_eq!(fs::read(aggregate.join("mutinfo.txt")).unwrap(), master);
}

#[test]
pub fn falls_back_to_redo_lines_without_backup() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());
    fs::remove_file(aggregate.join(BACKUP_FILE)).unwrap();

    merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(
        read_index(&aggregate.join("mutinfo.txt")).unwrap(),
        vec!["1,A-S133A,0.2", "1,E-N654P,-1.7"]
    );
}

#[test]
pub fn incomplete_mutation_stays_out_of_the_master() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());
    fs::remove_dir_all(redo.join("E-N-654/E-N654P/5")).unwrap();

    let report = merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(report.copied, 2);
    assert_eq!(report.incomplete, 1);
    assert_eq!(
        read_index(&aggregate.join("mutinfo.txt")).unwrap(),
        vec!["1,A-S133A,0.2"]
    );
}

#[test]
pub fn redo_list_limits_restored_mutations() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());
    let list = RedoList::parse("A-S133A:1\n").unwrap();

    let report = merge_restore(&options(&aggregate, &redo), Some(&list)).unwrap();

    // replicas are merged regardless, lines only for listed mutations
    assert_eq!(report.copied, 3);
    assert_eq!(report.completed, 1);
    assert_eq!(report.restored_lines, 0);
}

#[test]
pub fn invalid_leftover_is_replaced() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());
    fs::create_dir_all(aggregate.join("E-N654P/5")).unwrap();
    fs::write(aggregate.join("E-N654P/5/ddg.db3"), b"").unwrap();

    let report = merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(report.completed, 1);
}

#[test]
pub fn missing_aggregation_root_fails() {
    let root = tempfile::tempdir().unwrap();

    assert!(matches!(
        merge_restore(&options(&root.path().join("nope"), root.path()), None),
        Err(RestoreError::RootMissing(_))
    ));
}

#[test]
pub fn backup_lines_match_by_typed_identity() {
    let root = tempfile::tempdir().unwrap();
    let (aggregate, redo) = detected_tree(root.path());
    fs::write(
        aggregate.join(BACKUP_FILE),
        "1,E-N-654-P,-1.5\n1,A-S133A,0.2\n",
    )
    .unwrap();

    let report = merge_restore(&options(&aggregate, &redo), None).unwrap();

    assert_eq!(report.restored_lines, 1);
    assert_eq!(
        read_index(&aggregate.join("mutinfo.txt")).unwrap(),
        vec!["1,A-S133A,0.2", "1,E-N-654-P,-1.5"]
    );
}
