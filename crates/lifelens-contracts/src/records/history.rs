use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decision::DecisionResult;
use crate::tier::UsageKind;

pub const HISTORY_SCHEMA_VERSION: u64 = 1;

/// One served decision as written to the durable history sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub id: String,
    pub user_id: String,
    pub ts: String,
    pub kind: UsageKind,
    pub request: Value,
    pub result: DecisionResult,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub cached: bool,
}

impl HistoryRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: UsageKind,
        request: &Value,
        result: &DecisionResult,
        processing_time_ms: u64,
        cached: bool,
    ) -> Self {
        Self {
            schema_version: HISTORY_SCHEMA_VERSION,
            id: id.into(),
            user_id: user_id.into(),
            ts: now_utc_iso(),
            kind,
            request: sanitize_payload(request),
            result: result.clone(),
            processing_time_ms,
            cached,
        }
    }
}

/// Append-only writer for `history.jsonl`, one compact JSON object per line.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    inner: Arc<HistoryLogInner>,
}

#[derive(Debug)]
struct HistoryLogInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(HistoryLogInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn append(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed opening {}", self.inner.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Most recent records for `user_id`, newest first. Lines that fail to
    /// parse are skipped.
    pub fn recent_for_user(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let file = match std::fs::File::open(&self.inner.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed opening {}", self.inner.path.display()))
            }
        };
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<HistoryRecord>(&line) else {
                continue;
            };
            if record.user_id == user_id {
                rows.push(record);
            }
        }
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Strips binary-looking fields before anything reaches durable storage.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "payload" | "image" | "image_bytes" | "data" | "b64_json" | "api_key"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn default_schema_version() -> u64 {
    HISTORY_SCHEMA_VERSION
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
