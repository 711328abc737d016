use crate::error::{GopilotError, Result};
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Kind of session event recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    SessionStarted,
    SessionAborted,
    ReadyToShoot,
    CaptureStarted,
    CaptureStartFailed,
    CaptureStopped,
    CaptureStopAnomaly,
    SessionStopped,
    SessionFatal,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::SessionStarted => "session_started",
            AuditEventKind::SessionAborted => "session_aborted",
            AuditEventKind::ReadyToShoot => "ready_to_shoot",
            AuditEventKind::CaptureStarted => "capture_started",
            AuditEventKind::CaptureStartFailed => "capture_start_failed",
            AuditEventKind::CaptureStopped => "capture_stopped",
            AuditEventKind::CaptureStopAnomaly => "capture_stop_anomaly",
            AuditEventKind::SessionStopped => "session_stopped",
            AuditEventKind::SessionFatal => "session_fatal",
        }
    }

    /// Whether this entry ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuditEventKind::SessionAborted
                | AuditEventKind::SessionStopped
                | AuditEventKind::SessionFatal
        )
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One state transition and the client outcome that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event_kind: AuditEventKind,
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(
        session_id: &str,
        event_kind: AuditEventKind,
        from_state: SessionState,
        to_state: SessionState,
        detail: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_kind,
            from_state,
            to_state,
            detail,
        }
    }

    pub fn description(&self) -> String {
        format!(
            "{} {} {} -> {}",
            self.session_id, self.event_kind, self.from_state, self.to_state
        )
    }
}

/// Append-only newline-delimited JSON log of session transitions
///
/// Each append is written, flushed and synced before returning. The file is
/// opened in append mode so existing entries are never rewritten.
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    /// Open (or create) the log, creating its parent directory
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GopilotError::audit(format!(
                    "Failed to create audit directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                GopilotError::audit(format!("Failed to open audit log {}: {}", path.display(), e))
            })?;

        info!("Audit log opened: {}", path.display());
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry durably
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| GopilotError::audit(format!("Failed to write audit entry: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| GopilotError::audit(format!("Failed to flush audit log: {}", e)))?;
        file.sync_data()
            .await
            .map_err(|e| GopilotError::audit(format!("Failed to sync audit log: {}", e)))?;

        debug!("Audit: {}", entry.description());
        Ok(())
    }
}

/// Reads an audit log back into entries
pub struct AuditReader {
    path: PathBuf,
}

impl AuditReader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Every entry in write order; blank lines are skipped, malformed lines fail
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let file = File::open(&self.path).await.map_err(|e| {
            GopilotError::audit(format!(
                "Failed to open audit log {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str::<AuditEntry>(&line).map_err(|e| {
                GopilotError::audit(format!(
                    "{}:{}: malformed audit entry: {}",
                    self.path.display(),
                    line_number,
                    e
                ))
            })?;
            entries.push(entry);
        }

        debug!(
            "Read {} audit entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries)
    }
}

/// Entries grouped per session, sessions in order of first appearance
pub fn group_by_session(entries: Vec<AuditEntry>) -> Vec<(String, Vec<AuditEntry>)> {
    let mut sessions: Vec<(String, Vec<AuditEntry>)> = Vec::new();
    for entry in entries {
        match sessions.iter_mut().find(|(id, _)| *id == entry.session_id) {
            Some((_, timeline)) => timeline.push(entry),
            None => sessions.push((entry.session_id.clone(), vec![entry])),
        }
    }
    sessions
}
