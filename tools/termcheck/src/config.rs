use crate::errors::HarnessError;
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::runtime::FileSystem;
use crate::scheduler::DEFAULT_INPUT_DELAY;
use crate::types::{Pacing, RuntimeSelection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub record_missing_result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
    pub runtime: RuntimeConfig,
    pub verifier: VerifierConfig,
    pub logging: LoggingConfig,
    pub artifacts: Vec<ArtifactConfig>,
    pub record_missing_result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub default_delay_ms: u64,
    pub pacing: Pacing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub kind: RuntimeSelection,
    pub jvm_launcher: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierConfig {
    pub tail_alignment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactConfig {
    pub actual: PathBuf,
    pub expected: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                default_delay_ms: DEFAULT_INPUT_DELAY.as_millis() as u64,
                pacing: Pacing::Auto,
            },
            session: SessionConfig {
                timeout_ms: 30_000,
                poll_interval_ms: 10,
            },
            runtime: RuntimeConfig {
                kind: RuntimeSelection::Auto,
                jvm_launcher: "java".to_string(),
            },
            verifier: VerifierConfig {
                tail_alignment: true,
            },
            logging: LoggingConfig {
                enabled: true,
                path: PathBuf::from(".termcheck/logs/run.jsonl"),
                max_payload_bytes: 4096,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
            artifacts: Vec::new(),
            record_missing_result: false,
        }
    }
}

impl HarnessConfig {
    pub fn input_delay(&self) -> Duration {
        Duration::from_millis(self.scheduler.default_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.session.timeout_ms > 0).then(|| Duration::from_millis(self.session.timeout_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialHarnessConfig {
    scheduler: Option<PartialSchedulerConfig>,
    session: Option<PartialSessionConfig>,
    runtime: Option<PartialRuntimeConfig>,
    verifier: Option<PartialVerifierConfig>,
    logging: Option<PartialLoggingConfig>,
    artifacts: Option<Vec<ArtifactConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSchedulerConfig {
    default_delay_ms: Option<u64>,
    pacing: Option<Pacing>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSessionConfig {
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRuntimeConfig {
    kind: Option<RuntimeSelection>,
    jvm_launcher: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialVerifierConfig {
    tail_alignment: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    fs: &dyn FileSystem,
) -> Result<HarnessConfig, HarnessError> {
    let mut cfg = HarnessConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialHarnessConfig = toml::from_str(&file_contents)
            .map_err(|e| HarnessError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut HarnessConfig, partial: PartialHarnessConfig) {
    if let Some(scheduler) = partial.scheduler {
        if let Some(value) = scheduler.default_delay_ms {
            cfg.scheduler.default_delay_ms = value;
        }
        if let Some(value) = scheduler.pacing {
            cfg.scheduler.pacing = value;
        }
    }

    if let Some(session) = partial.session {
        if let Some(value) = session.timeout_ms {
            cfg.session.timeout_ms = value;
        }
        if let Some(value) = session.poll_interval_ms {
            cfg.session.poll_interval_ms = value;
        }
    }

    if let Some(runtime) = partial.runtime {
        if let Some(value) = runtime.kind {
            cfg.runtime.kind = value;
        }
        if let Some(value) = runtime.jvm_launcher {
            cfg.runtime.jvm_launcher = value;
        }
    }

    if let Some(verifier) = partial.verifier {
        if let Some(value) = verifier.tail_alignment {
            cfg.verifier.tail_alignment = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }

    if let Some(artifacts) = partial.artifacts {
        cfg.artifacts = artifacts;
    }
}

fn apply_cli_overrides(cfg: &mut HarnessConfig, overrides: &CliOverrides) {
    if let Some(timeout_ms) = overrides.timeout_ms {
        cfg.session.timeout_ms = timeout_ms;
    }
    if overrides.record_missing_result {
        cfg.record_missing_result = true;
    }
}

fn validate_config(cfg: &HarnessConfig) -> Result<(), HarnessError> {
    if cfg.scheduler.default_delay_ms == 0 {
        return Err(HarnessError::InvalidConfig(
            "scheduler.default_delay_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.session.poll_interval_ms == 0 {
        return Err(HarnessError::InvalidConfig(
            "session.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.runtime.jvm_launcher.trim().is_empty() {
        return Err(HarnessError::InvalidConfig(
            "runtime.jvm_launcher must not be empty".to_string(),
        ));
    }
    for artifact in &cfg.artifacts {
        if artifact.actual.as_os_str().is_empty() || artifact.expected.as_os_str().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "artifacts entries need both `actual` and `expected`".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn resolve_working_dir(
    process_cwd: &Path,
    script_path: &Path,
    overrides: &CliOverrides,
) -> PathBuf {
    if let Some(dir) = &overrides.working_dir {
        return absolutize_path(process_cwd, dir);
    }
    let script = absolutize_path(process_cwd, script_path);
    script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| process_cwd.to_path_buf())
}

pub fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}
