use crate::errors::HarnessError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

#[derive(Serialize)]
struct LogRecord<'a> {
    level: &'a str,
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    case_id: Option<&'a str>,
    payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            case_id: None,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), HarnessError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogRecord {
            level: event.level,
            event_type: event.event_type,
            case_id: self.case_id.as_deref(),
            payload: truncated,
        })
        .map_err(|e| HarnessError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HarnessError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| HarnessError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            enforce_total_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }
}

// ── Process-wide run logger ───────────────────────────────────────────────────

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

pub fn init_run_logger(logger: JsonlLogger) {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) = Some(logger);
}

pub fn set_run_case_id(case_id: &str) {
    if let Some(logger) = logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_mut()
    {
        logger.case_id = Some(case_id.to_string());
    }
}

pub fn clear_run_logger() {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) = None;
}

pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
