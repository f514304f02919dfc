use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::engine_debug;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Upper bound on ` (n)` suffixes tried before giving up on a name.
const MAX_SUFFIX: usize = 1000;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("no free file name for {0}")]
    NameExhausted(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Destination of finished documents.
pub trait MarkdownWriter: Send + Sync {
    /// Writes `content` as `filename` inside `out_dir` and returns the path actually used.
    fn write_markdown(&self, out_dir: &Path, filename: &str, content: &str) -> Result<PathBuf, PersistError>;
}

/// Writes through a temp file and never replaces an existing file:
/// a taken `name.md` becomes `name (2).md`, `name (3).md`, ...
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMarkdownWriter;

impl MarkdownWriter for FsMarkdownWriter {
    fn write_markdown(&self, out_dir: &Path, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(out_dir)?;

        let mut tmp = NamedTempFile::new_in(out_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        for n in 1..=MAX_SUFFIX {
            let target = out_dir.join(numbered(filename, n));
            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    engine_debug!("{} exists, trying the next name", target.display());
                    tmp = err.file;
                }
                Err(err) => return Err(PersistError::Io(err.error)),
            }
        }
        Err(PersistError::NameExhausted(filename.to_string()))
    }
}

/// `name.md` for `n == 1`, `name (n).md` otherwise.
fn numbered(filename: &str, n: usize) -> String {
    if n == 1 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{filename} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::numbered;

    #[test]
    fn numbering_keeps_the_extension() {
        assert_eq!(numbered("a.md", 1), "a.md");
        assert_eq!(numbered("a.b.md", 3), "a.b (3).md");
        assert_eq!(numbered("README", 2), "README (2)");
    }
}
