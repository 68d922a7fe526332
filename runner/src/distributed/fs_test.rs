use super::fs::{atomic_write, claim_dir, copy_file, copy_tree, Claim, Overwrite, Workspace};
use std::{fs, sync::Arc, thread};

#[test]
pub fn claim_dir_has_exactly_one_winner() {
    let root = tempfile::tempdir().unwrap();
    let target = Arc::new(root.path().join("E-N654P"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let target = Arc::clone(&target);
            thread::spawn(move || claim_dir(&target).unwrap())
        })
        .collect();
    let claims: Vec<Claim> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(claims.iter().filter(|c| **c == Claim::Created).count(), 1);
    assert_eq!(claims.iter().filter(|c| **c == Claim::Existing).count(), 7);
}

#[test]
pub fn claim_dir_rejects_files() {
    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("occupied");
    fs::write(&target, b"").unwrap();

    assert!(claim_dir(&target).is_err());
}

#[test]
pub fn copy_file_respects_overwrite_mode() {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source");
    let destination = root.path().join("destination");
    fs::write(&source, b"new").unwrap();
    fs::write(&destination, b"old").unwrap();

    assert_eq!(copy_file(&source, &destination, Overwrite::Never).unwrap(), None);
    assert_eq!(fs::read(&destination).unwrap(), b"old");

    assert_eq!(
        copy_file(&source, &destination, Overwrite::Always).unwrap(),
        Some(3)
    );
    assert_eq!(fs::read(&destination).unwrap(), b"new");
}

#[test]
pub fn copy_tree_merges_directories() {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source");
    let destination = root.path().join("destination");
    fs::create_dir_all(source.join("E-N654P/2")).unwrap();
    fs::write(source.join("E-N654P/2/ddg.db3"), b"db").unwrap();
    fs::write(source.join(".hidden"), b"kept").unwrap();
    fs::create_dir_all(destination.join("E-N654P/1")).unwrap();
    fs::write(destination.join("E-N654P/1/ddg.db3"), b"other").unwrap();

    let stats = copy_tree(&source, &destination, Overwrite::Never).unwrap();

    assert_eq!(stats.files, 2);
    assert_eq!(stats.skipped, 0);
    assert_eq!(fs::read(destination.join("E-N654P/2/ddg.db3")).unwrap(), b"db");
    assert_eq!(fs::read(destination.join("E-N654P/1/ddg.db3")).unwrap(), b"other");
    assert!(destination.join(".hidden").is_file());

    let again = copy_tree(&source, &destination, Overwrite::Never).unwrap();
    assert_eq!(again.files, 0);
    assert_eq!(again.skipped, 2);
}

#[test]
pub fn atomic_write_replaces_content() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("mutinfo.txt");

    atomic_write(&path, b"first\n").unwrap();
    atomic_write(&path, b"second\n").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
}

#[test]
pub fn workspace_is_private_and_removed_on_drop() {
    let root = tempfile::tempdir().unwrap();
    let path = {
        let workspace = Workspace::allocate(root.path(), "job.1").unwrap();
        fs::write(workspace.join("scratch"), b"x").unwrap();

        assert!(Workspace::allocate(root.path(), "job.1").is_err());

        workspace.path().to_path_buf()
    };

    assert!(!path.exists());
}
