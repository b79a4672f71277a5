use crate::input::Input;
use crate::observer::Observer;
use anyhow::Context;
use log::{debug, warn};
use std::any::Any;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Environment variable the sanitizer runtime reads its options from.
pub const COVERAGE_ENV_VAR: &str = "ASAN_OPTIONS";
/// Option asking the runtime to dump `.sancov` files when the process exits.
pub const COVERAGE_ENV_VALUE: &str = "coverage=1";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How one execution ended.
///
/// A crash is recorded but not otherwise special-cased: its coverage is
/// collected like any other run's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
}

pub trait Executor<I: Input> {
    /// Runs the target once on `input` and lets every observer look at the run.
    ///
    /// Errors are fatal for the session: the target could not be run, or an
    /// observer could not make sense of what it left behind.
    fn execute_sync(
        &mut self,
        input: &I,
        observers: &mut [&mut dyn Observer],
    ) -> Result<ExecutionStatus, anyhow::Error>;
}

fn notify_pre_exec(observers: &mut [&mut dyn Observer]) -> Result<(), anyhow::Error> {
    for obs in observers.iter_mut() {
        let name = obs.name();
        obs.pre_exec()
            .with_context(|| format!("Observer '{name}' pre_exec failed"))?;
    }
    Ok(())
}

fn notify_post_exec(
    observers: &mut [&mut dyn Observer],
    status: &ExecutionStatus,
    target_output: Option<&dyn Any>,
    input: &[u8],
) -> Result<(), anyhow::Error> {
    for obs in observers.iter_mut() {
        let name = obs.name();
        obs.post_exec(status, target_output, input)
            .with_context(|| format!("Observer '{name}' post_exec failed"))?;
    }
    Ok(())
}

/// Runs a Rust closure as the target. Panics are reported as crashes.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    fn execute_sync(
        &mut self,
        input: &I,
        observers: &mut [&mut dyn Observer],
    ) -> Result<ExecutionStatus, anyhow::Error> {
        notify_pre_exec(observers)?;

        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input.as_bytes());
        }));

        let status = match result {
            Ok(_) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        };

        notify_post_exec(observers, &status, None, input.as_bytes())?;
        Ok(status)
    }
}

/// Settings for spawning the target program.
#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory of the child, which is also where it dumps traces.
    pub working_dir: Option<PathBuf>,
    /// `None` waits for as long as the target runs.
    pub timeout: Option<Duration>,
    /// Variables set on the child only.
    pub envs: Vec<(String, String)>,
}

impl CommandExecutorConfig {
    /// Runs `command` with coverage dumping enabled and no timeout.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
            timeout: None,
            envs: vec![(COVERAGE_ENV_VAR.to_string(), COVERAGE_ENV_VALUE.to_string())],
        }
    }
}

/// What a finished child left for the observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessOutput {
    fn from_exit(pid: u32, status: Option<ExitStatus>) -> Self {
        let mut output = ProcessOutput {
            pid,
            ..Default::default()
        };
        if let Some(status) = status {
            output.exit_code = status.code();
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                output.signal = status.signal();
            }
        }
        output
    }
}

/// A spawned child that is always reaped.
///
/// If the guard goes out of scope before `wait` returned (an error while
/// feeding input, a panic), the child is killed and waited for, so no process
/// outlives the execution that started it.
struct ScopedChild {
    child: Child,
    reaped: bool,
}

impl ScopedChild {
    fn spawn(cmd: &mut Command) -> io::Result<Self> {
        Ok(Self {
            child: cmd.spawn()?,
            reaped: false,
        })
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Writes `data` to the child's stdin and closes it.
    ///
    /// A child that exits without reading all of its input is not an error.
    fn feed_stdin(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(mut stdin) = self.child.stdin.take() else {
            return Err(io::Error::other("child stdin was not piped"));
        };
        match stdin.write_all(data) {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("pid {} closed stdin early", self.pid());
                Ok(())
            }
            other => other,
        }
    }

    /// Waits for the child to exit. Returns `None` if it was killed for
    /// running longer than `timeout`.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
        let Some(timeout) = timeout else {
            let status = self.child.wait()?;
            self.reaped = true;
            return Ok(Some(status));
        };

        let start_time = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            if start_time.elapsed() > timeout {
                warn!("Target pid {} timed out after {timeout:?}, killing", self.pid());
                self.child.kill()?;
                self.child.wait()?;
                self.reaped = true;
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ScopedChild {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!("Failed to kill pid {}: {e}", self.child.id());
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap pid {}: {e}", self.child.id());
        }
    }
}

fn describe_failure(output: &ProcessOutput) -> String {
    if let Some(code) = output.exit_code {
        format!("Exited with code {code}")
    } else if let Some(signal) = output.signal {
        format!("Terminated by signal {signal}")
    } else {
        "Exited abnormally".to_string()
    }
}

/// Spawns an external program per execution and feeds it the input on stdin.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    fn build_command(&self) -> Result<Command, anyhow::Error> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Target command is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        // Scoped to the child; our own environment is left untouched.
        cmd.envs(self.config.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        Ok(cmd)
    }
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(
        &mut self,
        input: &I,
        observers: &mut [&mut dyn Observer],
    ) -> Result<ExecutionStatus, anyhow::Error> {
        notify_pre_exec(observers)?;

        let mut cmd = self.build_command()?;
        let mut child = ScopedChild::spawn(&mut cmd)
            .with_context(|| format!("Failed to spawn command {:?}", self.config.command))?;
        let pid = child.pid();

        child
            .feed_stdin(input.as_bytes())
            .with_context(|| format!("Failed to write input to pid {pid}"))?;
        let exit = child
            .wait(self.config.timeout)
            .with_context(|| format!("Failed to wait for pid {pid}"))?;
        drop(child);

        let output = ProcessOutput::from_exit(pid, exit);
        let status = match exit {
            None => ExecutionStatus::Timeout,
            Some(exit) if exit.success() => ExecutionStatus::Ok,
            Some(_) => ExecutionStatus::Crash(describe_failure(&output)),
        };
        debug!("pid {pid} finished: {status:?}");

        notify_post_exec(observers, &status, Some(&output as &dyn Any), input.as_bytes())?;
        Ok(status)
    }
}
