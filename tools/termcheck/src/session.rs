use crate::errors::HarnessError;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(Option<i32>),
    TimedOut { after: Duration },
}

pub trait LineSink: Send {
    fn write_line(&mut self, text: &str) -> io::Result<()>;
    fn close(&mut self);
}

pub struct InputChannel {
    stdin: Option<ChildStdin>,
}

impl LineSink for InputChannel {
    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "input channel closed"))?;
        stdin.write_all(text.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn close(&mut self) {
        self.stdin = None;
    }
}

pub struct SessionChannels {
    pub input: InputChannel,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub struct ProcessSession {
    child: Child,
    program: String,
}

impl ProcessSession {
    pub fn start(request: &LaunchRequest) -> Result<(Self, SessionChannels), HarnessError> {
        let launch_error = |message: String| HarnessError::Launch {
            program: request.program.clone(),
            message,
        };

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // own process group, so descendants holding the pipes can be killed with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| launch_error(e.to_string()))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(launch_error("subprocess pipes were not captured".to_string()));
        };

        let session = Self {
            child,
            program: request.program.clone(),
        };
        let channels = SessionChannels {
            input: InputChannel { stdin: Some(stdin) },
            stdout,
            stderr,
        };
        Ok((session, channels))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn exit_code(&mut self) -> Result<Option<i32>, HarnessError> {
        self.child
            .wait()
            .map(|status| status.code())
            .map_err(|e| HarnessError::Process(format!("{}: {e}", self.program)))
    }

    pub fn kill(&mut self) -> Result<(), HarnessError> {
        self.kill_process_group();
        match self.child.kill() {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(HarnessError::Process(format!("{}: {e}", self.program))),
        }
        self.exit_code().map(|_| ())
    }

    // the group outlives the program when its children did not exit
    pub fn kill_process_group(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH once the group is empty
            let _ = killpg(Pid::from_raw(self.child.id() as i32), Signal::SIGKILL);
        }
    }

    pub fn wait_with_deadline(
        &mut self,
        deadline: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<Termination, HarnessError> {
        let Some(deadline) = deadline else {
            return self.exit_code().map(Termination::Exited);
        };
        let started = Instant::now();
        loop {
            let status = self
                .child
                .try_wait()
                .map_err(|e| HarnessError::Process(format!("{}: {e}", self.program)))?;
            if let Some(status) = status {
                return Ok(Termination::Exited(status.code()));
            }
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                self.kill()?;
                return Ok(Termination::TimedOut { after: elapsed });
            }
            std::thread::sleep(poll_interval.min(deadline - elapsed));
        }
    }
}
