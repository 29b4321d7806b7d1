use crate::config::RuntimeConfig;
use crate::runtime::FileSystem;
use crate::script::CommandSpec;
use crate::session::LaunchRequest;
use crate::types::{RuntimeKind, RuntimeSelection};
use std::path::Path;

const JVM_SOURCE_EXTENSIONS: [&str; 2] = ["java", "JAVA"];

pub fn resolve_launch(
    spec: &CommandSpec,
    workdir: &Path,
    cfg: &RuntimeConfig,
    fs: &dyn FileSystem,
) -> (LaunchRequest, RuntimeKind) {
    let kind = match cfg.kind {
        RuntimeSelection::Jvm => RuntimeKind::Jvm,
        RuntimeSelection::Native => RuntimeKind::Native,
        RuntimeSelection::Auto => detect_runtime(&spec.executable, workdir, fs),
    };

    let request = match kind {
        RuntimeKind::Jvm => {
            let mut args = Vec::with_capacity(spec.args.len() + 1);
            args.push(spec.executable.clone());
            args.extend(spec.args.iter().cloned());
            LaunchRequest {
                program: cfg.jvm_launcher.clone(),
                args,
                cwd: workdir.to_path_buf(),
            }
        }
        RuntimeKind::Native => {
            let local = workdir.join(&spec.executable);
            let program = if fs.exists(&local) {
                local.to_string_lossy().into_owned()
            } else {
                spec.executable.clone()
            };
            LaunchRequest {
                program,
                args: spec.args.clone(),
                cwd: workdir.to_path_buf(),
            }
        }
    };
    (request, kind)
}

fn detect_runtime(executable: &str, workdir: &Path, fs: &dyn FileSystem) -> RuntimeKind {
    let has_source = JVM_SOURCE_EXTENSIONS
        .iter()
        .any(|ext| fs.exists(&workdir.join(format!("{executable}.{ext}"))));
    if has_source {
        RuntimeKind::Jvm
    } else {
        RuntimeKind::Native
    }
}
