use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends JSON lines to a file, rolling it over by size.
///
/// With `max_bytes > 0` and `backup_count > 0`, a write that would push the
/// file to `max_bytes` first renames `app.log` to `app.log.1`, shifting older
/// backups up to `app.log.<backup_count>`; the oldest is discarded. The file
/// and its parent directory are created on the first write.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    state: Mutex<Option<OpenFile>>,
}

struct OpenFile {
    file: File,
    size: u64,
}

impl RotatingFileSink {
    /// A sink that never rotates.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: 0,
            backup_count: 0,
            state: Mutex::new(None),
        }
    }

    pub fn with_rotation(mut self, max_bytes: u64, backup_count: usize) -> Self {
        self.max_bytes = max_bytes;
        self.backup_count = backup_count;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `index`-th backup, e.g. `app.log.2`.
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    async fn open(&self) -> io::Result<OpenFile> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let size = file.metadata().await?.len();
        Ok(OpenFile { file, size })
    }

    fn should_rollover(&self, state: &OpenFile, incoming: u64) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && state.size > 0
            && state.size + incoming >= self.max_bytes
    }

    async fn rollover(&self) -> io::Result<()> {
        for index in (1..self.backup_count).rev() {
            let source = self.backup_path(index);
            if fs::try_exists(&source).await? {
                remove_if_exists(&self.backup_path(index + 1)).await?;
                fs::rename(&source, self.backup_path(index + 1)).await?;
            }
        }
        let first = self.backup_path(1);
        remove_if_exists(&first).await?;
        fs::rename(&self.path, first).await
    }
}

/// Create `path` and its parents. An existing entry is not an error; any
/// other failure (permissions, read-only fs) is returned.
pub async fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl LogSink for RotatingFileSink {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let incoming = line.len() as u64;

        let mut guard = self.state.lock().await;
        let mut state = match guard.take() {
            Some(state) => state,
            None => self.open().await?,
        };

        if self.should_rollover(&state, incoming) {
            state.file.flush().await?;
            drop(state);
            self.rollover().await?;
            state = self.open().await?;
        }

        state.file.write_all(&line).await?;
        state.size += incoming;
        *guard = Some(state);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(state) = self.state.lock().await.as_mut() {
            state.file.flush().await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AppInfo;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            date_created: "2024-01-01T00:00:00.000000".to_string(),
            level: "INFO".to_string(),
            duration: None,
            message: Some(message.to_string()),
            request_id: None,
            customer: None,
            app: AppInfo {
                name: "core".to_string(),
                thread_name: "main".to_string(),
            },
            data: None,
        }
    }

    #[tokio::test]
    async fn creates_missing_directories_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/app.log");
        let sink = RotatingFileSink::new(&path);

        sink.send(&record("first")).await.unwrap();
        sink.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(line["message"], "first");
    }

    #[tokio::test]
    async fn ensure_dir_accepts_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        ensure_dir(dir.path()).await.unwrap();
        ensure_dir(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_dir_reports_other_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();

        // A regular file in the way cannot become a directory.
        assert!(ensure_dir(&file.join("child")).await.is_err());
    }

    #[tokio::test]
    async fn rotates_into_numbered_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let line_len = serde_json::to_vec(&record("m0")).unwrap().len() as u64 + 1;
        let sink = RotatingFileSink::new(&path).with_rotation(line_len * 2, 2);

        for i in 0..5 {
            sink.send(&record(&format!("m{i}"))).await.unwrap();
        }
        sink.flush().await.unwrap();

        let read = |p: PathBuf| std::fs::read_to_string(p).unwrap();
        assert!(read(path.clone()).contains("\"m4\""));
        assert!(read(sink.backup_path(1)).contains("\"m3\""));
        assert!(read(sink.backup_path(2)).contains("\"m2\""));
        assert!(!sink.backup_path(3).exists());
    }
}
