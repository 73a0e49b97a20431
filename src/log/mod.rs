//! Structured monitor journal, one JSON object per line.
//!
//! The repository monitor appends one line per lifecycle change, event
//! transition, failed check and pipeline run. Each line is a self-contained
//! JSON object with an RFC 3339 timestamp, so journals can be tailed, grepped
//! and post-processed.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

/// A structured entry in the journal.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the journal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    MonitorStarted { repo: String },
    MonitorStopped { reason: String },
    /// A new intervention event was queued.
    EventCreated {
        id: String,
        kind: String,
        message: String,
    },
    /// An intervention event changed status.
    EventUpdated {
        id: String,
        kind: String,
        status: String,
    },
    /// A monitor iteration failed and the loop backed off.
    CheckFailed { error: String },
    PipelineCompleted {
        success: bool,
        problems: usize,
        fixes: usize,
        passed: usize,
    },
    ReportSaved { path: String },
}

/// Writer for JSON lines journals.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Open a journal at `path`, creating parent directories and appending to
    /// an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "journal");

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_to_json() {
        let entry = LogEntry {
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            event: LogEvent::EventCreated {
                id: "abc".to_string(),
                kind: "merge_conflict".to_string(),
                message: "2 files".to_string(),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"event_created\""));
        assert!(json.contains("\"kind\":\"merge_conflict\""));
        assert!(json.contains("\"timestamp\":\"2026-01-01T00:00:00.000Z\""));
    }

    #[test]
    fn write_and_read_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("monitor.jsonl");

        let log = ExecutionLog::new(&log_path).unwrap();
        log.log(LogEvent::MonitorStarted {
            repo: "/repo".to_string(),
        })
        .unwrap();
        log.log(LogEvent::CheckFailed {
            error: "git status timed out".to_string(),
        })
        .unwrap();
        log.log(LogEvent::MonitorStopped {
            reason: "stop requested".to_string(),
        })
        .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("event").is_some());
            let ts = parsed["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
        }

        assert!(lines[0].contains("\"event\":\"monitor_started\""));
        assert!(lines[1].contains("\"event\":\"check_failed\""));
        assert!(lines[2].contains("\"event\":\"monitor_stopped\""));
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("deep").join("nested").join("run.jsonl");

        let log = ExecutionLog::new(&log_path).unwrap();
        log.log(LogEvent::ReportSaved {
            path: "r.json".to_string(),
        })
        .unwrap();

        assert!(log_path.exists());
        assert_eq!(log.path(), log_path);
    }

    #[test]
    fn appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("append.jsonl");

        {
            let log = ExecutionLog::new(&log_path).unwrap();
            log.log(LogEvent::PipelineCompleted {
                success: true,
                problems: 0,
                fixes: 0,
                passed: 0,
            })
            .unwrap();
        }
        {
            let log = ExecutionLog::new(&log_path).unwrap();
            log.log(LogEvent::EventUpdated {
                id: "x".to_string(),
                kind: "pr_review".to_string(),
                status: "completed".to_string(),
            })
            .unwrap();
        }

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
