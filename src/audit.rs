//! Append-only access log, one JSON object per line

use crate::session::{AuthMethod, AuthOutcome, DenyReason};
use log::{debug, warn};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub lock_id: String,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl AuditRecord {
    pub fn from_outcome(lock_id: &str, outcome: &AuthOutcome) -> Self {
        let (method, identity, reason) = match outcome {
            AuthOutcome::Granted { identity, method } => {
                (Some(*method), Some(identity.clone()), None)
            }
            AuthOutcome::Denied { reason } => (None, None, Some(reason.clone())),
        };
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            lock_id: lock_id.to_string(),
            granted: outcome.is_granted(),
            method,
            identity,
            reason,
        }
    }
}

pub struct AuditLog {
    lock_id: String,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl AuditLog {
    /// Log to `path`, or nowhere when `None`. The file is opened lazily.
    pub fn new(lock_id: &str, path: Option<&Path>) -> Self {
        Self {
            lock_id: lock_id.to_string(),
            path: path.map(Path::to_path_buf),
            file: Mutex::new(None),
        }
    }

    pub fn disabled(lock_id: &str) -> Self {
        Self::new(lock_id, None)
    }

    /// Write failures are logged and otherwise ignored.
    pub fn record(&self, outcome: &AuthOutcome) {
        let Some(path) = &self.path else {
            return;
        };

        let record = AuditRecord::from_outcome(&self.lock_id, outcome);
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Cannot serialize audit record: {}", e);
                return;
            }
        };

        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if file.is_none() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => *file = Some(f),
                Err(e) => {
                    warn!("Cannot open audit log {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if let Some(f) = file.as_mut()
            && let Err(e) = writeln!(f, "{}", line)
        {
            warn!("Audit log write failed: {}", e);
            // reopen on the next record
            *file = None;
            return;
        }
        debug!("Audit: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_json_lines() {
        let path = std::env::temp_dir().join(format!("biolock-audit-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let log = AuditLog::new("front-door", Some(&path));

        log.record(&AuthOutcome::Granted {
            identity: "alice".into(),
            method: AuthMethod::Biometric,
        });
        log.record(&AuthOutcome::Denied {
            reason: DenyReason::RfidTimeout,
        });

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["identity"], "alice");
        assert_eq!(lines[0]["method"], "biometric");
        assert_eq!(lines[0]["lock_id"], "front-door");
        assert_eq!(lines[1]["granted"], false);
        assert_eq!(lines[1]["reason"], "rfid_timeout");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_path_is_not_fatal() {
        let log = AuditLog::new("x", Some(Path::new("/nonexistent-dir/audit.log")));
        log.record(&AuthOutcome::Denied {
            reason: DenyReason::Cancelled,
        });
    }
}
