use super::stage_out;
use crate::{fixtures::publish, index::read_index, replica::replica_dirs};
use std::{collections::BTreeSet, fs, path::Path, sync::Arc, thread, time::Duration};

const TIMEOUT: Duration = Duration::from_secs(30);

fn workspace(root: &Path, replica: u32) -> std::path::PathBuf {
    let workspace = root.join(format!("ws{replica}"));
    fs::create_dir_all(workspace.join("logs")).unwrap();
    fs::write(workspace.join("input.pdb"), format!("written by {replica}")).unwrap();
    fs::write(
        workspace.join("logs").join(format!("replica_{replica}.log")),
        "done",
    )
    .unwrap();
    fs::write(
        workspace.join("mutinfo.txt"),
        "1,E-N654P,-1.5\n1,E-N654A,0.3\n",
    )
    .unwrap();
    publish(&workspace, "E-N654P", replica);
    publish(&workspace, "E-N654A", replica);

    workspace
}

#[test]
pub fn concurrent_replicas_union_their_output() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = Arc::new(root.path().join("run"));
    fs::create_dir(run_dir.as_path()).unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|replica| {
            let workspace = workspace(root.path(), replica);
            let run_dir = Arc::clone(&run_dir);

            thread::spawn(move || {
                stage_out(&workspace, &run_dir, replica, "mutinfo.txt", TIMEOUT).unwrap()
            })
        })
        .collect();

    let appended: usize = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().index_lines)
        .sum();

    assert_eq!(appended, 2);
    assert_eq!(replica_dirs(&run_dir.join("E-N654P")), (1..=8).collect::<BTreeSet<u32>>());
    assert_eq!(replica_dirs(&run_dir.join("E-N654A")), (1..=8).collect::<BTreeSet<u32>>());
    assert_eq!(read_index(&run_dir.join("mutinfo.txt")).unwrap().len(), 2);
    assert_eq!(fs::read_dir(run_dir.join("logs")).unwrap().count(), 8);
    assert!(fs::read_to_string(run_dir.join("input.pdb"))
        .unwrap()
        .starts_with("written by"));
}

#[test]
pub fn restaging_is_a_no_op() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    fs::create_dir(&run_dir).unwrap();
    let workspace = workspace(root.path(), 3);

    let first = stage_out(&workspace, &run_dir, 3, "mutinfo.txt", TIMEOUT).unwrap();
    let index = fs::read(run_dir.join("mutinfo.txt")).unwrap();
    let second = stage_out(&workspace, &run_dir, 3, "mutinfo.txt", TIMEOUT).unwrap();

    assert_eq!(first.mutations.len(), 2);
    assert_eq!(second.mutations.len(), 2);
    assert_eq!(second.index_lines, 0);
    assert_eq!(fs::read(run_dir.join("mutinfo.txt")).unwrap(), index);
}

#[test]
pub fn once_per_run_files_are_not_clobbered() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    fs::create_dir(&run_dir).unwrap();

    stage_out(&workspace(root.path(), 1), &run_dir, 1, "mutinfo.txt", TIMEOUT).unwrap();
    stage_out(&workspace(root.path(), 2), &run_dir, 2, "mutinfo.txt", TIMEOUT).unwrap();

    assert_eq!(
        fs::read_to_string(run_dir.join("input.pdb")).unwrap(),
        "written by 1"
    );
}

#[test]
pub fn only_the_own_replica_is_published() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    fs::create_dir(&run_dir).unwrap();
    let workspace = workspace(root.path(), 2);
    publish(&workspace, "E-N654P", 5);

    stage_out(&workspace, &run_dir, 2, "mutinfo.txt", TIMEOUT).unwrap();

    assert_eq!(replica_dirs(&run_dir.join("E-N654P")), BTreeSet::from([2]));
}
