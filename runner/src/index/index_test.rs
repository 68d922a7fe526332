use super::{
    append_missing, dedup, line_matches, parse_mutation, read_index, references, write_index,
};
use crate::mutation::Mutation;
use std::fs;

#[test]
pub fn dedup_keeps_first_occurrence_order() {
    let lines = ["A,B-S-133,ddg=1.2", "E.N.654.P,E-N654P", "A,B-S-133,ddg=1.2"]
        .map(String::from);

    assert_eq!(
        dedup(lines),
        vec!["A,B-S-133,ddg=1.2".to_owned(), "E.N.654.P,E-N654P".to_owned()]
    );
}

#[test]
pub fn read_index_skips_blank_lines_and_missing_files() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("mutinfo.txt");

    assert!(read_index(&path).unwrap().is_empty());

    fs::write(&path, "a,E-N654P\r\n\n  \nb,E-N654A\n").unwrap();
    assert_eq!(read_index(&path).unwrap(), vec!["a,E-N654P", "b,E-N654A"]);
}

#[test]
pub fn append_missing_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("mutinfo.txt");

    assert_eq!(append_missing(&path, &["x,E-N654P", "x,E-N654P"]).unwrap(), 1);
    assert_eq!(append_missing(&path, &["x,E-N654P", "y,E-N654A"]).unwrap(), 1);
    assert_eq!(append_missing(&path, &["y,E-N654A"]).unwrap(), 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), "x,E-N654P\ny,E-N654A\n");
}

#[test]
pub fn write_index_round_trips() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("mutinfo.txt");

    write_index(&path, &["one", "two"]).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    assert_eq!(read_index(&path).unwrap(), vec!["one", "two"]);
}

#[test]
pub fn references_is_delimiter_bounded() {
    let line = "E.N.654.P,E-N654P,N654P";

    assert!(references(line, "E-N654P"));
    assert!(!references(line, "E-N65"));
    assert!(!references("E.N.654.P,E-N654PA", "E-N654P"));
    assert!(references("E.N.654.P,E-N654P", "E-N654P"));
}

#[test]
pub fn parses_mutation_column() {
    let expected: Mutation = "E-N654P".parse().unwrap();

    assert_eq!(parse_mutation("E.N.654.P,E-N654P,N654P"), Some(expected));
    assert_eq!(parse_mutation("no mutation here"), None);
}

#[test]
pub fn line_matches_any_spelling_of_the_mutation() {
    let mutation: Mutation = "E-N654P".parse().unwrap();

    assert!(line_matches("1,E-N654P,-1.5", &mutation));
    assert!(line_matches("1,E-N-654-P,-1.5", &mutation));
    assert!(line_matches("1,E.Asn.654.Pro,-1.5", &mutation));
    assert!(!line_matches("1,E-N654A,-1.5", &mutation));
    // no parseable field, fall back to the raw directory name
    assert!(line_matches("x,?,E-N654P", &mutation));
    assert!(!line_matches("x,?,E-N654PA", &mutation));
}
