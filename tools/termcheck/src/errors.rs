use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("cannot read test script {path}: {message}")]
    ScriptRead { path: String, message: String },
    #[error("test script format error at line {line}: {message}")]
    ScriptFormat { line: usize, message: String },
    #[error("failed to launch `{program}`: {message}")]
    Launch { program: String, message: String },
    #[error("process error: {0}")]
    Process(String),
    #[error("tested program did not finish within {after_ms}ms and was terminated")]
    Timeout { after_ms: u64 },
}

impl HarnessError {
    pub fn aborts_without_report(&self) -> bool {
        matches!(
            self,
            Self::ScriptRead { .. } | Self::ScriptFormat { .. } | Self::Launch { .. }
        )
    }
}
