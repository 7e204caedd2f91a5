//! JSON-lines play log written off the async runtime
//!
//! Lines are queued without blocking and written to a file in the cache
//! directory by a dedicated thread. When the logger is dropped the queue is
//! drained, the file is copied into the data directory and the cache copy is
//! removed. Filesystem problems are logged and never fatal: the queue keeps
//! draining even when no file could be opened.

use chrono::{DateTime, Local};
use log::{debug, error};
use serde::Serialize;
use shared::Stage;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::mpsc;

const UNKNOWN_HOST: &str = "unknown-host";

/// One session event as recorded in the play log
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayEvent {
    SessionStart {
        session_id: u64,
        peer: Option<String>,
    },
    GameStart {
        session_id: u64,
        player_id: u32,
        player_name: String,
        client_version: u32,
        stage: Stage,
    },
    GameOver {
        session_id: u64,
        tick: u64,
    },
    SessionEnd {
        session_id: u64,
        outcome: String,
        ticks: u64,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    time: String,
    #[serde(flatten)]
    event: &'a PlayEvent,
}

pub struct PlayLogger {
    sender: Option<mpsc::UnboundedSender<String>>,
    worker: Option<thread::JoinHandle<()>>,
    cache_path: PathBuf,
    data_path: PathBuf,
}

impl PlayLogger {
    pub fn new(cache_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>, session_id: u64) -> Self {
        let cache_dir = cache_dir.as_ref();
        let data_dir = data_dir.as_ref();

        for dir in [cache_dir, data_dir] {
            if let Err(e) = fs::create_dir_all(dir) {
                error!("Failed to create play log directory {}: {}", dir.display(), e);
            }
        }

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| UNKNOWN_HOST.to_string());
        let thread_id = format!("{:?}", thread::current().id());
        let file_name = playlog_file_name(Local::now(), &hostname, &thread_id, session_id);

        let cache_path = cache_dir.join(&file_name);
        let data_path = data_dir.join(&file_name);

        let file = match OpenOptions::new().create(true).append(true).open(&cache_path) {
            Ok(file) => Some(file),
            Err(e) => {
                error!("Failed to open play log {}: {}", cache_path.display(), e);
                None
            }
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name(format!("playlog-{}", session_id))
            .spawn(move || write_lines(receiver, file));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start play log writer: {}", e);
                None
            }
        };

        Self {
            sender: worker.as_ref().map(|_| sender),
            worker,
            cache_path,
            data_path,
        }
    }

    /// Queues a raw line. Silently dropped once the writer is gone.
    pub fn log_line(&self, line: impl Into<String>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(line.into());
        }
    }

    pub fn log_event(&self, event: &PlayEvent) {
        let record = Record {
            time: Local::now().to_rfc3339(),
            event,
        };
        match serde_json::to_string(&record) {
            Ok(line) => self.log_line(line),
            Err(e) => error!("Failed to serialize play log event: {}", e),
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn finish(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Play log writer panicked");
            }
        }

        if !self.cache_path.exists() {
            return;
        }
        if let Err(e) = fs::copy(&self.cache_path, &self.data_path) {
            error!(
                "Failed to copy play log to {}: {}",
                self.data_path.display(),
                e
            );
            return;
        }
        if let Err(e) = fs::remove_file(&self.cache_path) {
            error!(
                "Failed to remove cached play log {}: {}",
                self.cache_path.display(),
                e
            );
        }
        debug!("Play log stored at {}", self.data_path.display());
    }
}

impl Drop for PlayLogger {
    fn drop(&mut self) {
        self.finish();
    }
}

fn write_lines(mut receiver: mpsc::UnboundedReceiver<String>, file: Option<File>) {
    let mut writer = file.map(BufWriter::new);

    while let Some(line) = receiver.blocking_recv() {
        match writer.as_mut() {
            Some(out) => {
                if let Err(e) = writeln!(out, "{}", line) {
                    error!("Failed to write play log line: {}", e);
                    writer = None;
                }
            }
            None => debug!("playlog: {}", line),
        }
    }

    if let Some(mut out) = writer {
        if let Err(e) = out.flush() {
            error!("Failed to flush play log: {}", e);
        }
    }
}

/// `<YYYYmmdd_HHMMSS_mmm>_<host>_<thread>_s<session>_playlog.json`, with
/// anything outside `[A-Za-z0-9_-]` in host and thread replaced by `_`
pub fn playlog_file_name(
    now: DateTime<Local>,
    hostname: &str,
    thread_id: &str,
    session_id: u64,
) -> String {
    format!(
        "{}_{}_{}_s{}_playlog.json",
        now.format("%Y%m%d_%H%M%S_%3f"),
        sanitize(hostname),
        sanitize(thread_id),
        session_id
    )
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn data_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect()
    }

    #[test]
    fn test_writes_log_to_cache_and_data() {
        let cache = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();

        {
            let logger = PlayLogger::new(cache.path(), data.path(), 1);
            logger.log_line("test message 1");
            logger.log_line("test message 2");
        }

        let files = data_files(data.path());
        assert_eq!(files.len(), 1);

        let contents = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["test message 1", "test message 2"]);

        assert!(data_files(cache.path()).is_empty());
    }

    #[test]
    fn test_creates_missing_directories() {
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("nested/cache");
        let data = root.path().join("nested/data");

        {
            let logger = PlayLogger::new(&cache, &data, 2);
            logger.log_line("hello");
        }

        assert!(cache.is_dir());
        assert_eq!(data_files(&data).len(), 1);
    }

    #[test]
    fn test_unwritable_directory_is_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();

        let logger = PlayLogger::new(blocker.join("cache"), blocker.join("data"), 3);
        logger.log_line("dropped on the floor");
        drop(logger);
    }

    #[test]
    fn test_events_are_json_lines() {
        let cache = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();

        let path = {
            let logger = PlayLogger::new(cache.path(), data.path(), 4);
            logger.log_event(&PlayEvent::GameOver {
                session_id: 4,
                tick: 99,
            });
            logger.log_event(&PlayEvent::SessionEnd {
                session_id: 4,
                outcome: "goodbye".to_string(),
                ticks: 120,
            });
            logger.data_path().to_path_buf()
        };

        let contents = fs::read_to_string(path).unwrap();
        let records: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["event"], "game_over");
        assert_eq!(records[0]["tick"], 99);
        assert_eq!(records[1]["event"], "session_end");
        assert_eq!(records[1]["outcome"], "goodbye");
        assert!(records[1]["time"].is_string());
    }

    #[test]
    fn test_file_name_format() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .unwrap();
        let name = playlog_file_name(now, "my.host", "ThreadId(12)", 5);
        assert_eq!(name, "20240309_070501_000_my_host_ThreadId_12__s5_playlog.json");
    }
}
