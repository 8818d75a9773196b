//! Append-only reconcile audit trail (JSON Lines).
//!
//! One record per event, keys sorted, one line per record:
//!
//! ```text
//! {"event":"RUN_START","payload":{...},"run_id":"…","seq":0,"ts_utc":"…"}
//! ```
//!
//! - Payload keys on the redaction list are replaced with `"<REDACTED>"`
//!   at any depth before the line is built.
//! - When the next line would push the file past `max_bytes`, files shift
//!   `path` -> `path.1` -> … -> `path.{max_files}`; the oldest is dropped.
//! - Callers treat write errors as soft: log and continue.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Payload keys whose values never reach disk (case-insensitive).
pub const REDACT_KEYS: [&str; 9] = [
    "api_key",
    "api_secret",
    "secret",
    "secret_key",
    "signature",
    "password",
    "token",
    "listen_key",
    "private_key",
];

pub const REDACTED: &str = "<REDACTED>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    RunStart,
    MismatchDetected,
    RemediateAttempt,
    RemediateResult,
    RunEnd,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::RunStart => "RUN_START",
            AuditEventType::MismatchDetected => "MISMATCH_DETECTED",
            AuditEventType::RemediateAttempt => "REMEDIATE_ATTEMPT",
            AuditEventType::RemediateResult => "REMEDIATE_RESULT",
            AuditEventType::RunEnd => "RUN_END",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub run_id: Uuid,
    pub event: AuditEventType,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_bytes: u64,
    /// Rotated files kept besides the live one.
    pub max_files: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("logs/reconcile_audit.jsonl"),
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

pub struct AuditWriter {
    config: AuditConfig,
    /// Records written by this writer. Restarts begin again at zero; the
    /// `run_id` disambiguates.
    seq: u64,
}

impl AuditWriter {
    /// Ensures the parent directory exists when enabled.
    pub fn new(config: AuditConfig) -> Result<Self> {
        if config.enabled {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create_dir_all {:?}", parent))?;
                }
            }
        }
        Ok(Self { config, seq: 0 })
    }

    /// A writer that accepts and drops every event.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
            seq: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event. `Ok(None)` when disabled.
    pub fn write(
        &mut self,
        run_id: Uuid,
        event: AuditEventType,
        payload: Value,
    ) -> Result<Option<AuditRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let record = AuditRecord {
            seq: self.seq,
            ts_utc: Utc::now(),
            run_id,
            event,
            payload: redact(&payload),
        };
        let line = canonical_json_line(&record)?;

        self.rotate_if_needed(line.len() as u64 + 1)?;
        append_line(&self.config.path, &line)?;
        self.seq += 1;
        Ok(Some(record))
    }

    fn rotate_if_needed(&self, incoming: u64) -> Result<()> {
        let path = &self.config.path;
        let current = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return Ok(()),
        };
        if current == 0 || current + incoming <= self.config.max_bytes {
            return Ok(());
        }

        debug!(path = %path.display(), size = current, "rotating audit log");
        if self.config.max_files == 0 {
            fs::remove_file(path).with_context(|| format!("remove audit log {:?}", path))?;
            return Ok(());
        }

        let oldest = rotated_path(path, self.config.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest).with_context(|| format!("remove {:?}", oldest))?;
        }
        for i in (1..self.config.max_files).rev() {
            let from = rotated_path(path, i);
            if from.exists() {
                let to = rotated_path(path, i + 1);
                fs::rename(&from, &to).with_context(|| format!("rename {:?} -> {:?}", from, to))?;
            }
        }
        let first = rotated_path(path, 1);
        fs::rename(path, &first).with_context(|| format!("rename {:?} -> {:?}", path, first))?;
        Ok(())
    }
}

/// `path.N`
pub fn rotated_path(path: &Path, n: u32) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!(".{n}"));
    PathBuf::from(s)
}

/// Copy of `v` with every redaction-listed key's value replaced.
pub fn redact(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, val)| {
                    if is_redacted_key(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact(val))
                    }
                })
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(redact).collect()),
        _ => v.clone(),
    }
}

fn is_redacted_key(key: &str) -> bool {
    REDACT_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Read every record of one audit file.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("parse audit record at line {}", i + 1))
        })
        .collect()
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    f.write_all(&buf).context("write audit line failed")?;
    Ok(())
}

/// Sorted keys, compact.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit record failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
