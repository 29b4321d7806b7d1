use crate::logging::append_run_log;
use crate::runtime::{CancelToken, Clock};
use crate::script::{ScriptLine, ScriptStep};
use crate::session::LineSink;
use crate::types::{InputLog, TimestampedUnit};
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_INPUT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOutcome {
    pub log: InputLog,
    pub final_delay: Duration,
    pub interrupted: Option<String>,
}

pub struct InputScheduler<'a> {
    clock: &'a dyn Clock,
    delay: Duration,
    pace: bool,
}

impl<'a> InputScheduler<'a> {
    pub fn new(clock: &'a dyn Clock, default_delay: Duration, pace: bool) -> Self {
        Self {
            clock,
            delay: default_delay,
            pace,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn run(
        &mut self,
        steps: &[ScriptLine],
        sink: &mut dyn LineSink,
        cancel: &CancelToken,
    ) -> SchedulerOutcome {
        let mut log = InputLog::new();
        let mut interrupted = None;

        for step in steps {
            if cancel.is_cancelled() {
                interrupted = Some(format!("cancelled before line {}", step.line));
                break;
            }
            match &step.step {
                ScriptStep::Pause(duration) => {
                    append_run_log(
                        "debug",
                        "scheduler.pause",
                        json!({ "line": step.line, "ms": duration.as_millis() as u64 }),
                    );
                    if !self.clock.sleep(*duration, cancel) {
                        interrupted = Some(format!("cancelled during pause at line {}", step.line));
                        break;
                    }
                }
                ScriptStep::GlobalPause(duration) => {
                    append_run_log(
                        "debug",
                        "scheduler.global_pause",
                        json!({
                            "line": step.line,
                            "from_ms": self.delay.as_millis() as u64,
                            "to_ms": duration.as_millis() as u64,
                        }),
                    );
                    self.delay = *duration;
                }
                ScriptStep::Input(text) => {
                    // let the previous line's output finish arriving first
                    if self.pace && !self.clock.sleep(self.delay, cancel) {
                        interrupted = Some(format!("cancelled before line {}", step.line));
                        break;
                    }
                    let sent_at = self.clock.now();
                    // an undelivered line never enters the log
                    if let Err(err) = sink.write_line(text) {
                        append_run_log(
                            "warn",
                            "scheduler.write_failed",
                            json!({ "line": step.line, "text": text, "error": err.to_string() }),
                        );
                        interrupted = Some(format!(
                            "write failed at line {} (`{text}` not delivered): {err}",
                            step.line
                        ));
                        break;
                    }
                    log.push(TimestampedUnit::new(sent_at, text.as_str()));
                    append_run_log(
                        "debug",
                        "scheduler.input_sent",
                        json!({ "line": step.line, "text": text }),
                    );
                }
            }
        }

        sink.close();
        SchedulerOutcome {
            log,
            final_delay: self.delay,
            interrupted,
        }
    }
}
