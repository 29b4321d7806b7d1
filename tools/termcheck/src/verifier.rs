use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde::Serialize;
use serde_json::json;
use std::path::Path;

pub const RULE: &str = "===============================";
pub const THIN_RULE: &str = "-------------------------------";
pub const VERIFY_HEADER: &str = "Compared to expected output:";
pub const NO_ERROR: &str = "No error.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEntry {
    LongerThanExpected { expected: usize, actual: usize },
    ShorterThanExpected { expected: usize, actual: usize },
    ExtraLeadingLines { count: usize },
    FirstLineNotFound,
    Mismatch {
        ordinal: usize,
        line: usize,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub entries: Vec<ReportEntry>,
    pub alignment: usize,
    flagged: bool,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        !self.flagged
    }

    pub fn mismatch_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ReportEntry::Mismatch { .. }))
            .count()
    }

    pub fn render(&self) -> Vec<String> {
        let mut out = vec![
            RULE.to_string(),
            VERIFY_HEADER.to_string(),
            THIN_RULE.to_string(),
        ];
        let mut length_section_done = false;
        for entry in &self.entries {
            let is_length = matches!(
                entry,
                ReportEntry::LongerThanExpected { .. } | ReportEntry::ShorterThanExpected { .. }
            );
            if !is_length && !length_section_done {
                out.push(String::new());
                length_section_done = true;
            }
            match entry {
                ReportEntry::LongerThanExpected { expected, actual } => {
                    out.push("Output is longer than expected.".to_string());
                    out.push(format!("  Expected lines : {expected}"));
                    out.push(format!("  Actual lines   : {actual}"));
                }
                ReportEntry::ShorterThanExpected { expected, actual } => {
                    out.push("Output is shorter than expected.".to_string());
                    out.push(format!("  Expected lines : {expected}"));
                    out.push(format!("  Actual lines   : {actual}"));
                }
                ReportEntry::ExtraLeadingLines { count } => {
                    out.push(format!("There are {count} extra lines before expected output."));
                    out.push(String::new());
                }
                ReportEntry::FirstLineNotFound => {
                    out.push("Cannot find the first line of the expected output.".to_string());
                    out.push(String::new());
                }
                ReportEntry::Mismatch {
                    ordinal,
                    line,
                    expected,
                    actual,
                } => {
                    out.push(format!("Mismatch {ordinal}:"));
                    out.push(format!("  Line     : {line}"));
                    out.push(format!("  Expected : {expected}"));
                    out.push(format!("  Actual   : {actual}"));
                    out.push(String::new());
                }
            }
        }
        if !length_section_done {
            out.push(String::new());
        }
        if self.is_clean() {
            out.push(NO_ERROR.to_string());
        }
        out.push(RULE.to_string());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    MissingActual { name: String },
    Unreadable { name: String, error: String },
    Compared(VerificationReport),
}

impl ArtifactOutcome {
    pub fn is_clean(&self) -> bool {
        match self {
            Self::MissingActual { .. } | Self::Unreadable { .. } => false,
            Self::Compared(report) => report.is_clean(),
        }
    }

    pub fn render(&self) -> Vec<String> {
        match self {
            Self::MissingActual { name } => vec![format!("Cannot find file: {name}")],
            Self::Unreadable { name, error } => {
                vec![format!("Cannot read file: {name} ({error})")]
            }
            Self::Compared(report) => report.render(),
        }
    }
}

pub struct OutputVerifier {
    tail_alignment: bool,
}

impl Default for OutputVerifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OutputVerifier {
    pub fn new(tail_alignment: bool) -> Self {
        Self { tail_alignment }
    }

    pub fn verify(&self, actual: &[String], expected: &[String]) -> VerificationReport {
        let mut entries = Vec::new();
        let mut flagged = false;

        if actual.len() > expected.len() {
            entries.push(ReportEntry::LongerThanExpected {
                expected: expected.len(),
                actual: actual.len(),
            });
            flagged = true;
        }
        if actual.len() < expected.len() {
            entries.push(ReportEntry::ShorterThanExpected {
                expected: expected.len(),
                actual: actual.len(),
            });
            flagged = true;
        }

        let alignment = match expected.first() {
            Some(first) => {
                let first = first.trim();
                match actual.iter().position(|line| line.trim() == first) {
                    Some(0) => 0,
                    Some(j) => {
                        entries.push(ReportEntry::ExtraLeadingLines { count: j });
                        flagged = true;
                        j
                    }
                    None => {
                        flagged = true;
                        match self.tail_anchor(actual, expected.len()) {
                            Some(j) => j,
                            None => {
                                entries.push(ReportEntry::FirstLineNotFound);
                                actual.len()
                            }
                        }
                    }
                }
            }
            None => 0,
        };

        let mut ordinal = 0;
        for (i, expected_line) in expected.iter().enumerate() {
            let Some(actual_line) = actual.get(i + alignment) else {
                break;
            };
            if expected_line.trim() != actual_line.trim() {
                ordinal += 1;
                entries.push(ReportEntry::Mismatch {
                    ordinal,
                    line: i + 1,
                    expected: expected_line.clone(),
                    actual: actual_line.clone(),
                });
                flagged = true;
            }
        }

        VerificationReport {
            entries,
            alignment,
            flagged,
        }
    }

    pub fn verify_file(
        &self,
        fs: &dyn FileSystem,
        actual_path: &Path,
        expected_path: &Path,
    ) -> Option<ArtifactOutcome> {
        let expected = load_expected(fs, expected_path)?;
        let name = actual_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| actual_path.display().to_string());
        if !fs.exists(actual_path) {
            return Some(ArtifactOutcome::MissingActual { name });
        }
        let actual = match fs.read_to_string(actual_path) {
            Ok(text) => text.lines().map(str::to_string).collect::<Vec<_>>(),
            Err(err) => {
                append_run_log(
                    "warn",
                    "artifact.read_failed",
                    json!({ "path": actual_path.display().to_string(), "error": err.to_string() }),
                );
                return Some(ArtifactOutcome::Unreadable {
                    name,
                    error: err.to_string(),
                });
            }
        };
        Some(ArtifactOutcome::Compared(self.verify(&actual, &expected)))
    }

    /// Start index that lines the last expected line up with the last
    /// non-blank actual line, if that start is inside the actual output.
    fn tail_anchor(&self, actual: &[String], expected_len: usize) -> Option<usize> {
        if !self.tail_alignment {
            return None;
        }
        let last = actual.iter().rposition(|line| !line.trim().is_empty())?;
        (last + 1).checked_sub(expected_len)
    }
}

/// Loads a line file. `None` means there is nothing to compare against: the
/// file is absent, or unreadable (logged). An empty file is `Some(vec![])`.
pub fn load_expected(fs: &dyn FileSystem, path: &Path) -> Option<Vec<String>> {
    if !fs.exists(path) {
        return None;
    }
    match fs.read_to_string(path) {
        Ok(text) => Some(text.lines().map(str::to_string).collect()),
        Err(err) => {
            append_run_log(
                "warn",
                "expected.read_failed",
                json!({ "path": path.display().to_string(), "error": err.to_string() }),
            );
            None
        }
    }
}
