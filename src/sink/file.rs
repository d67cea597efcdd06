//! FileSink - appends one JSON document per reading to a log file

use super::{Sink, SinkError, SinkFuture};
use crate::config::FileConfig;
use crate::reading::Reading;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sink writing JSON lines, rotating to `<path>.1` once `max_bytes` is reached.
pub struct FileSink {
    name: String,
    path: Option<PathBuf>,
    max_bytes: u64,
    file: Option<File>,
    written: u64,
}

impl FileSink {
    pub fn new(config: &FileConfig) -> Self {
        let name = match &config.path {
            Some(path) => format!("File ({})", path.display()),
            None => "File".to_string(),
        };
        Self {
            name,
            path: config.path.clone(),
            max_bytes: config.max_mb.saturating_mul(1024 * 1024),
            file: None,
            written: 0,
        }
    }

    fn open(path: &Path) -> std::io::Result<(File, u64)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    fn rotated_path(path: &Path) -> PathBuf {
        let mut rotated = path.as_os_str().to_owned();
        rotated.push(".1");
        PathBuf::from(rotated)
    }

    fn append(&mut self, reading: &Reading) -> std::io::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let mut line = reading.to_json();
        line.push('\n');
        let len = line.len() as u64;

        if self.max_bytes > 0 && self.written > 0 && self.written + len > self.max_bytes {
            self.file = None;
            fs::rename(&path, Self::rotated_path(&path))?;
            debug!(sink = %self.name, "Log file rotated");
        }

        if self.file.is_none() {
            let (file, written) = Self::open(&path)?;
            self.file = Some(file);
            self.written = written;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            self.written += len;
        }
        Ok(())
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.path.is_some()
    }

    fn start(&mut self) -> SinkFuture<'_, Option<String>> {
        Box::pin(async move {
            if let Some(path) = &self.path {
                let (file, written) = Self::open(path)?;
                self.file = Some(file);
                self.written = written;
            }
            Ok(None)
        })
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        Box::pin(async move { self.append(reading).map_err(SinkError::from) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::reading;
    use tempfile::tempdir;

    fn config(path: PathBuf, max_mb: u64) -> FileConfig {
        FileConfig {
            path: Some(path),
            max_mb,
        }
    }

    #[test]
    fn test_disabled_without_path() {
        let sink = FileSink::new(&FileConfig::default());
        assert!(!sink.enabled());
        assert_eq!(sink.name(), "File");
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("tilt.json");
        let mut sink = FileSink::new(&config(path.clone(), 10));

        sink.start().await.unwrap();
        sink.write(&reading("red", 70.0, 1.050)).await.unwrap();
        sink.write(&reading("blue", 66.0, 1.010)).await.unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["color"], "red");
        assert_eq!(first["temp_fahrenheit"], 70.0);
        assert!(lines[1].contains("\"color\":\"blue\""));
    }

    #[tokio::test]
    async fn test_file_sink_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tilt.json");
        fs::write(&path, "{}\n").unwrap();

        let mut sink = FileSink::new(&config(path.clone(), 10));
        sink.start().await.unwrap();
        sink.write(&reading("red", 70.0, 1.050)).await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_file_sink_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tilt.json");
        let mut sink = FileSink::new(&config(path.clone(), 1));
        sink.max_bytes = 300;

        sink.start().await.unwrap();
        for _ in 0..3 {
            sink.write(&reading("red", 70.0, 1.050)).await.unwrap();
        }

        let rotated = FileSink::rotated_path(&path);
        assert!(rotated.exists());
        let current = fs::read_to_string(&path).unwrap();
        assert!(current.len() <= 300);
        assert!(!current.is_empty());
    }
}
