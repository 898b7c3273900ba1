use std::fmt::{Display, Write as _};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};

/// Append-only scratch file holding one record per line.
///
/// Never truncated: every read starts from the beginning. The file is
/// removed when the log is dropped.
pub struct ScratchLog {
    file: File,
    path: PathBuf,
    _temp: NamedTempFile,
}

impl ScratchLog {
    /// Create a fresh log in `dir` whose file name starts with `prefix`.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)
            .with_context(|| format!("creating scratch log in {}", dir.display()))?;

        let file = temp
            .reopen()
            .with_context(|| format!("opening scratch log {}", temp.path().display()))?;

        Ok(Self {
            file: File::from_std(file),
            path: temp.path().to_path_buf(),
            _temp: temp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records at the end of the log. Returns how many were written.
    pub async fn append<I, R>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = R>,
        R: Display,
    {
        let mut buf = String::new();
        let mut written = 0;
        for record in records {
            let _ = writeln!(buf, "{record}");
            written += 1;
        }
        if written == 0 {
            return Ok(0);
        }

        self.file
            .seek(SeekFrom::End(0))
            .await
            .context("seeking scratch log end")?;
        self.file
            .write_all(buf.as_bytes())
            .await
            .context("appending to scratch log")?;
        self.file.flush().await.context("flushing scratch log")?;

        Ok(written)
    }

    /// Feed every line, from the start of the log, to `f`. Returns the line count.
    pub async fn for_each_line<F>(&mut self, mut f: F) -> Result<u64>
    where
        F: FnMut(&str),
    {
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .context("rewinding scratch log")?;

        let mut lines = BufReader::new(&mut self.file).lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await.context("reading scratch log")? {
            f(&line);
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_reread() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut log = ScratchLog::create(dir.path(), "redscout_test_").expect("create log");
        assert!(log.path().starts_with(dir.path()));

        assert_eq!(log.append(["a 1", "b 2"]).await.expect("append"), 2);

        let mut seen = Vec::new();
        log.for_each_line(|l| seen.push(l.to_string()))
            .await
            .expect("read");
        assert_eq!(seen, ["a 1", "b 2"]);

        log.append(["c 3"]).await.expect("append");

        let mut seen = Vec::new();
        let count = log
            .for_each_line(|l| seen.push(l.to_string()))
            .await
            .expect("read");
        assert_eq!(count, 3);
        assert_eq!(seen, ["a 1", "b 2", "c 3"]);
    }

    #[tokio::test]
    async fn test_empty_append_is_noop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut log = ScratchLog::create(dir.path(), "redscout_test_").expect("create log");
        let none: Vec<String> = Vec::new();
        assert_eq!(log.append(none).await.expect("append"), 0);
        assert_eq!(log.for_each_line(|_| {}).await.expect("read"), 0);
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("does-not-exist");
        let result = ScratchLog::create(&missing, "redscout_test_");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_removed_on_drop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = ScratchLog::create(dir.path(), "redscout_test_").expect("create log");
        let path = log.path().to_path_buf();
        assert!(path.exists());
        drop(log);
        assert!(!path.exists());
    }
}
