use crate::errors::HarnessError;
use std::fs;
use std::path::{Path, PathBuf};

pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    active: &Path,
) -> Result<Vec<PathBuf>, HarnessError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| HarnessError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((path, meta.len(), meta.modified().ok()))
        })
        .collect::<Vec<_>>();

    let mut total = logs.iter().map(|(_, len, _)| *len).sum::<u64>();
    if total <= budget_bytes {
        return Ok(Vec::new());
    }

    logs.sort_by(|a, b| a.2.cmp(&b.2));

    let mut deleted = Vec::new();
    for (path, len, _) in logs {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| HarnessError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
