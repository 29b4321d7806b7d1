use crate::errors::HarnessError;
use crate::runtime::FileSystem;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PAUSE_DIRECTIVE: &str = "__pause__";
pub const GLOBAL_PAUSE_DIRECTIVE: &str = "__global_pause__";
pub const RESULT_SUFFIX: &str = "Result";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub executable: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Pause(Duration),
    GlobalPause(Duration),
    Input(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub line: usize,
    pub step: ScriptStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestScript {
    pub command: CommandSpec,
    pub steps: Vec<ScriptLine>,
}

impl TestScript {
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, HarnessError> {
        let text = fs
            .read_to_string(path)
            .map_err(|e| HarnessError::ScriptRead {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let mut lines = text.lines();
        let command = parse_command(lines.next().unwrap_or_default())?;

        let mut comments = CommentStripper::default();
        let mut steps = Vec::new();
        for (index, raw) in lines.enumerate() {
            let line = index + 2;
            let kept = comments.strip(raw);
            let trimmed = kept.trim();
            if trimmed.is_empty() {
                continue;
            }
            steps.push(ScriptLine {
                line,
                step: parse_step(trimmed, line)?,
            });
        }

        Ok(Self { command, steps })
    }

    pub fn input_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.step, ScriptStep::Input(_)))
            .count()
    }
}

pub fn expected_result_path(script_path: &Path) -> PathBuf {
    let mut name = script_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(RESULT_SUFFIX);
    script_path.with_file_name(name)
}

pub fn has_extension(script_path: &Path) -> bool {
    script_path.extension().is_some()
}

fn parse_command(first_line: &str) -> Result<CommandSpec, HarnessError> {
    let mut sections = first_line.split_whitespace();
    let executable = sections.next().ok_or_else(|| HarnessError::ScriptFormat {
        line: 1,
        message: "first line must name the program under test".to_string(),
    })?;
    Ok(CommandSpec {
        executable: executable.to_string(),
        args: sections.map(str::to_string).collect(),
    })
}

fn parse_step(trimmed: &str, line: usize) -> Result<ScriptStep, HarnessError> {
    let (head, tail) = match trimmed.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (trimmed, ""),
    };
    match head {
        PAUSE_DIRECTIVE => Ok(ScriptStep::Pause(parse_millis(PAUSE_DIRECTIVE, tail, line)?)),
        GLOBAL_PAUSE_DIRECTIVE => {
            let delay = parse_millis(GLOBAL_PAUSE_DIRECTIVE, tail, line)?;
            // the assembler derives its gap threshold from this delay
            if delay.is_zero() {
                return Err(HarnessError::ScriptFormat {
                    line,
                    message: format!("`{GLOBAL_PAUSE_DIRECTIVE}` must be greater than 0"),
                });
            }
            Ok(ScriptStep::GlobalPause(delay))
        }
        _ => Ok(ScriptStep::Input(trimmed.to_string())),
    }
}

fn parse_millis(directive: &str, value: &str, line: usize) -> Result<Duration, HarnessError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| HarnessError::ScriptFormat {
            line,
            message: format!("`{directive}` expects milliseconds, got `{value}`"),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CommentState {
    #[default]
    Normal,
    LineComment,
    BlockComment,
}

#[derive(Debug, Default)]
struct CommentStripper {
    state: CommentState,
}

impl CommentStripper {
    fn strip(&mut self, line: &str) -> String {
        let mut kept = String::new();
        let mut rest = line;
        loop {
            match self.state {
                CommentState::Normal => {
                    let line_at = rest.find("//");
                    let block_at = rest.find("/*");
                    match (line_at, block_at) {
                        (Some(l), b) if b.map_or(true, |b| l < b) => {
                            kept.push_str(&rest[..l]);
                            self.state = CommentState::LineComment;
                        }
                        (_, Some(b)) => {
                            kept.push_str(&rest[..b]);
                            rest = &rest[b + 2..];
                            self.state = CommentState::BlockComment;
                        }
                        _ => {
                            kept.push_str(rest);
                            return kept;
                        }
                    }
                }
                CommentState::LineComment => {
                    // ends with the line
                    self.state = CommentState::Normal;
                    return kept;
                }
                CommentState::BlockComment => match rest.find("*/") {
                    Some(end) => {
                        rest = &rest[end + 2..];
                        self.state = CommentState::Normal;
                    }
                    None => return kept,
                },
            }
        }
    }
}
