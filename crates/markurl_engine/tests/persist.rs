use std::fs;

use markurl_engine::{ensure_output_dir, FsMarkdownWriter, MarkdownWriter, PersistError};
use tempfile::TempDir;

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn writer_creates_the_directory_and_never_clobbers() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("nested").join("out");
    let writer = FsMarkdownWriter;

    let first = writer.write_markdown(&out, "doc.md", "hello").unwrap();
    assert_eq!(first.file_name().unwrap(), "doc.md");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");

    let second = writer.write_markdown(&out, "doc.md", "world").unwrap();
    assert_eq!(second.file_name().unwrap(), "doc (2).md");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");
    assert_eq!(fs::read_to_string(&second).unwrap(), "world");

    let third = writer.write_markdown(&out, "doc.md", "again").unwrap();
    assert_eq!(third.file_name().unwrap(), "doc (3).md");

    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.ends_with(".md"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let result = FsMarkdownWriter.write_markdown(&file_path, "doc.md", "data");
    assert!(matches!(result, Err(PersistError::OutputDir(_))));
    assert!(!file_path.with_file_name("doc.md").exists());
}
