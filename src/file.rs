use crate::sink::{ExportSink, SinkError};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Configuration for [`FileSink`].
///
/// Rotation is size based: once the live file grows past
/// `max_file_size_kb`, `app.log` becomes `app.log.1`, `app.log.1` becomes
/// `app.log.2` and so on, keeping at most `max_log_files` rotated files.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Log file path. Missing parent directories are created on first write.
    pub path: PathBuf,
    pub enable_rotation: bool,
    /// Size limit of the live file in kilobytes.
    pub max_file_size_kb: u64,
    /// Number of rotated files to keep. Values below 1 are treated as 1.
    pub max_log_files: u32,
    /// Rotate by copying and truncating instead of renaming. Useful when
    /// another process keeps the live file open.
    pub rotate_by_copy: bool,
    /// Take an exclusive advisory lock while appending. Ignored when the
    /// `locking` feature is disabled.
    pub enable_locking: bool,
    /// Permission bits for a newly created log file (unix only).
    pub file_mode: Option<u32>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("app.log"),
            enable_rotation: true,
            max_file_size_kb: 10 * 1024,
            max_log_files: 5,
            rotate_by_copy: false,
            enable_locking: true,
            file_mode: None,
        }
    }
}

/// [`ExportSink`] appending JSON lines to a local file.
#[derive(Clone, Debug)]
pub struct FileSink {
    config: FileConfig,
}

impl FileSink {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    /// Sink writing to `path` with default rotation settings.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self::new(FileConfig {
            path: path.into(),
            ..FileConfig::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn max_bytes(&self) -> u64 {
        self.config.max_file_size_kb.saturating_mul(1024)
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        if index == 0 {
            return self.config.path.clone();
        }
        let mut name = self.config.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn open_locked(&self) -> std::io::Result<File> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        if let Some(mode) = self.config.file_mode {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let file = options.open(&self.config.path)?;
        if self.config.enable_locking {
            lock(&file)?;
        }
        Ok(file)
    }

    fn release(&self, file: File) {
        if self.config.enable_locking {
            // Closing the handle releases the lock as well.
            let _ = unlock(&file);
        }
    }

    /// Shift every rotated file one slot up, dropping the oldest.
    fn rotate_files(&self) -> std::io::Result<()> {
        let max = self.config.max_log_files.max(1);
        for i in (0..=max).rev() {
            let current = self.rotated_path(i);
            if !current.is_file() {
                continue;
            }
            if i == max {
                fs::remove_file(&current)?;
                continue;
            }
            let next = self.rotated_path(i + 1);
            if self.config.rotate_by_copy {
                fs::copy(&current, &next)?;
                if i == 0 {
                    OpenOptions::new().write(true).open(&current)?.set_len(0)?;
                }
            } else {
                fs::rename(&current, &next)?;
            }
        }
        tracing::debug!(path = %self.config.path.display(), kept = max, "rotated log files");
        Ok(())
    }
}

impl ExportSink for FileSink {
    fn export(&mut self, lines: &[String]) -> Result<(), SinkError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut text = lines.join("\n");
        text.push('\n');

        if let Some(dir) = self.config.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut file = self.open_locked()?;
        if self.config.enable_rotation && file.metadata()?.len() > self.max_bytes() {
            let rotated = self.rotate_files();
            self.release(file);
            rotated?;
            file = self.open_locked()?;
        }

        let written = file.write_all(text.as_bytes());
        self.release(file);
        written?;
        Ok(())
    }
}

#[cfg(feature = "locking")]
fn lock(file: &File) -> std::io::Result<()> {
    fs2::FileExt::lock_exclusive(file)
}

#[cfg(feature = "locking")]
fn unlock(file: &File) -> std::io::Result<()> {
    fs2::FileExt::unlock(file)
}

#[cfg(not(feature = "locking"))]
fn lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(feature = "locking"))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
