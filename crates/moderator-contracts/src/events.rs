use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::summary::RunSummary;

/// Audit events for one run, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        bucket: String,
        prefix: String,
    },
    ItemClassified {
        item_id: String,
        is_safe: bool,
        safety_confidence: u64,
        audience_category: String,
        run_time: f64,
    },
    ItemSkipped {
        item_id: String,
        error_kind: String,
        message: String,
        /// Unparseable reply text kept for manual review.
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_reply: Option<String>,
    },
    Alert {
        item_id: String,
        label: String,
    },
    NotifyOwner {
        item_id: String,
        label: String,
        summary: String,
    },
    RunFinished {
        summary: RunSummary,
    },
    UploadFinished {
        key: String,
        url: String,
    },
    UploadFailed {
        key: String,
        message: String,
    },
}

/// Append-only writer for the run's `events_<ts>.jsonl`.
///
/// Every line carries `type`, `run_id` and `ts` ahead of the event fields.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    run_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn emit(&self, event: &RunEvent) -> anyhow::Result<Value> {
        let Value::Object(fields) = serde_json::to_value(event)? else {
            anyhow::bail!("run event did not serialize to an object");
        };
        let mut line = Map::new();
        line.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            line.insert(key, value);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(&line)?.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
