use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::persist::PersistError;

/// Daily append-only record of the URLs submitted for conversion.
#[derive(Debug, Clone)]
pub struct UrlJournal {
    dir: PathBuf,
}

impl UrlJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends `[HH:MM:SS] url` lines to today's `<dir>/<YYYY-MM-DD>.log`.
    pub fn append<S: AsRef<str>>(&self, urls: &[S]) -> Result<PathBuf, PersistError> {
        self.append_at(urls, Local::now())
    }

    pub fn append_at<S: AsRef<str>>(&self, urls: &[S], now: DateTime<Local>) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        let path = self.dir.join(format!("{}.log", now.format("%Y-%m-%d")));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let stamp = now.format("%H:%M:%S");
        for url in urls {
            let url = url.as_ref().trim();
            if !url.is_empty() {
                writeln!(file, "[{stamp}] {url}")?;
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn lines_accumulate_in_the_daily_file() {
        let tmp = TempDir::new().unwrap();
        let journal = UrlJournal::new(tmp.path().join("logs"));
        let now = Local.with_ymd_and_hms(2024, 3, 9, 8, 5, 7).unwrap();

        journal.append_at(&["https://a.example/1", "  "], now).unwrap();
        let path = journal.append_at(&["https://b.example/2"], now).unwrap();

        assert_eq!(path.file_name().unwrap(), "2024-03-09.log");
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text, "[08:05:07] https://a.example/1\n[08:05:07] https://b.example/2\n");
    }
}
