use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedUnit {
    pub timestamp: Instant,
    pub text: String,
}

impl TimestampedUnit {
    pub fn new(timestamp: Instant, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

pub type InputLog = Vec<TimestampedUnit>;
pub type OutputLog = Vec<TimestampedUnit>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Jvm,
    Native,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jvm => "jvm",
            Self::Native => "native",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSelection {
    Auto,
    Jvm,
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Auto,
    Always,
    Never,
}

impl Pacing {
    pub fn applies_to(self, runtime: RuntimeKind) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => runtime == RuntimeKind::Jvm,
        }
    }
}
