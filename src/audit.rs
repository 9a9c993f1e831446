//! Append-only `key=value` audit log
//!
//! One line per VM run and one per health-gate abort. The file is opened once
//! per process in append mode and every line is written with a single write,
//! then flushed to disk, so external tailers only ever see whole lines.

use crate::models::{AbortRecord, VmRunRecord};
use crate::Result;
use chrono::{DateTime, Local, SecondsFormat};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct AuditRecorder {
    path: PathBuf,
    file: File,
}

impl AuditRecorder {
    /// Open (or create) the log for appending. Existing history is kept.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Audit log opened");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &VmRunRecord) -> Result<()> {
        self.write_line(format_record(record))
    }

    pub fn append_abort(&mut self, abort: &AbortRecord) -> Result<()> {
        self.write_line(format_abort(abort))
    }

    fn write_line(&mut self, mut line: String) -> Result<()> {
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

pub fn format_record(record: &VmRunRecord) -> String {
    let export_path = record
        .export_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut fields = vec![
        timestamp(&record.ended_at),
        field("run", &record.run_id.to_string()),
        field("host", &record.host),
        field("user", &record.user),
        field("vm", &record.vm),
        field("outcome", record.outcome.tag()),
    ];
    if let Some(reason) = record.outcome.reason() {
        fields.push(field("reason", &reason));
    }
    fields.push(field("exportPath", &export_path));
    fields.push(field("start", &timestamp(&record.started_at)));
    fields.push(field("end", &timestamp(&record.ended_at)));
    fields.join(" ")
}

pub fn format_abort(abort: &AbortRecord) -> String {
    [
        timestamp(&abort.timestamp),
        field("run", &abort.run_id.to_string()),
        field("host", &abort.host),
        field("user", &abort.user),
        field("vm", &abort.vm),
        field("message", &abort.message),
    ]
    .join(" ")
}

fn timestamp(at: &DateTime<Local>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// `key=value`, quoting the value when it would break tokenizing
fn field(key: &str, value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=');
    if !needs_quotes {
        return format!("{}={}", key, value);
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    format!("{}={}", key, quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HealthCheckResult, PendingRecord, RunOutcome};
    use chrono::TimeZone;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(vm: &str, outcome: RunOutcome) -> VmRunRecord {
        let start = Local.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).unwrap();
        let end = Local.with_ymd_and_hms(2026, 10, 19, 2, 41, 7).unwrap();
        let mut pending = PendingRecord::begin(Uuid::nil(), vm, "HV01", r"CORP\ops", start);
        if outcome.is_success() {
            pending.set_export_path(r"D:\HyperV-Backups\2026-10-19\AD01");
        }
        pending.finish(outcome, end)
    }

    #[test]
    fn test_field_quoting() {
        assert_eq!(field("vm", "AD01"), "vm=AD01");
        assert_eq!(field("path", r"D:\Backups"), r"path=D:\Backups");
        assert_eq!(field("reason", "disk full"), r#"reason="disk full""#);
        assert_eq!(field("m", "say \"hi\"\nbye"), r#"m="say \"hi\"\nbye""#);
        assert_eq!(field("x", ""), r#"x="""#);
    }

    #[test]
    fn test_format_success_record() {
        let line = format_record(&record("AD01", RunOutcome::Success));

        assert!(line.contains("host=HV01"));
        assert!(line.contains(r"user=CORP\ops"));
        assert!(line.contains("vm=AD01"));
        assert!(line.contains("outcome=Success"));
        assert!(line.contains(r"exportPath=D:\HyperV-Backups\2026-10-19\AD01"));
        assert!(line.contains("start=2026-10-19T02:00:00"));
        assert!(line.contains("end=2026-10-19T02:41:07"));
        assert!(!line.contains("reason="));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_format_failure_record_has_reason() {
        let outcome = RunOutcome::Failure("Export of AD01 failed: access\ndenied".into());
        let line = format_record(&record("AD01", outcome));

        assert!(line.contains("outcome=Failure"));
        assert!(line.contains(r#"reason="Export of AD01 failed: access\ndenied""#));
        assert!(line.contains("exportPath=-"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_append_preserves_history_across_opens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("audit.log");

        {
            let mut audit = AuditRecorder::open(&path).unwrap();
            assert_eq!(audit.path(), path.as_path());
            audit.append(&record("AD01", RunOutcome::Success)).unwrap();
        }
        {
            let mut audit = AuditRecorder::open(&path).unwrap();
            audit.append(&record("AD02", RunOutcome::SkippedNotFound)).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("vm=AD01") && lines[0].contains("outcome=Success"));
        assert!(lines[1].contains("vm=AD02") && lines[1].contains("outcome=SkippedNotFound"));
    }

    #[test]
    fn test_abort_line_has_reduced_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.log");
        let rec = record("AD01", RunOutcome::Success);
        let result = HealthCheckResult {
            vm: "AD01".into(),
            target: "AD01".into(),
            passed: false,
            attempts: 3,
        };
        let abort = AbortRecord::health_gate(&rec, &result, "AD02", rec.ended_at);

        let mut audit = AuditRecorder::open(&path).unwrap();
        audit.append_abort(&abort).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        assert!(line.contains("vm=AD01"));
        assert!(line.contains("message=\""));
        assert!(line.contains("AD02 will not be processed"));
        assert!(!line.contains("outcome="));
        assert!(!line.contains("exportPath="));
    }
}
