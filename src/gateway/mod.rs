//! External Process Gateway
//!
//! Every analyzer and codec invocation goes through a [`ProcessRunner`].
//! The production runner, [`ProcessGateway`], spawns the child with piped
//! output, enforces a wall-clock timeout (the child is killed when it fires)
//! and caps the number of live processes with a semaphore. It never touches
//! project state.

pub mod mock;

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::ProcessError;

pub use mock::{MockResponse, MockRunner};

/// One external process call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    /// Paths that must exist before the process is spawned.
    pub inputs: Vec<PathBuf>,
    /// File the process is expected to write, if any.
    pub output: Option<PathBuf>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            output: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Append an input path argument and require it to exist.
    pub fn input(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self.inputs.push(path.to_path_buf());
        self
    }

    /// Append the output path argument.
    pub fn output(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self.output = Some(path.to_path_buf());
        self
    }

    /// Arguments as UTF-8 (lossy), for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    /// Value following `flag` in the argument list.
    pub fn arg_after(&self, flag: &str) -> Option<String> {
        let args = self.args_lossy();
        let pos = args.iter().position(|a| a == flag)?;
        args.get(pos + 1).cloned()
    }
}

/// Captured output of a successful process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Seam between the pipeline stages and the host's processes.
pub trait ProcessRunner: Send + Sync + 'static {
    /// Run the invocation to completion, or fail with `TimedOut`/`ExitFailure`.
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<ProcessOutput, ProcessError>> + Send;
}

/// Runs real child processes.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    permits: Arc<Semaphore>,
}

impl ProcessGateway {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_concurrent_processes)
    }

    /// Process slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl ProcessRunner for ProcessGateway {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let program = invocation.program.clone();

        for input in &invocation.inputs {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                return Err(ProcessError::InputNotFound {
                    path: input.clone(),
                });
            }
        }

        // Waiting for a slot does not count against the timeout.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProcessError::Io {
                program: program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;

        debug!(program = %program, args = ?invocation.args_lossy(), "Spawning external process");

        let started = Instant::now();
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessError::Io {
                    program,
                    source: e,
                })
            }
            Err(_) => {
                warn!(
                    program = %program,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "External process timed out and was killed"
                );
                return Err(ProcessError::TimedOut {
                    program,
                    timeout: invocation.timeout,
                });
            }
        };

        let elapsed = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            debug!(program = %program, code = ?output.status.code(), "External process failed");
            return Err(ProcessError::ExitFailure {
                program,
                code: output.status.code(),
                stderr,
            });
        }

        debug!(program = %program, elapsed_ms = elapsed.as_millis() as u64, "External process finished");

        Ok(ProcessOutput {
            stdout,
            stderr,
            elapsed,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn quick(program: &str) -> Invocation {
        Invocation::new(program, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let gateway = ProcessGateway::new(2);
        let output = gateway
            .run(&quick("echo").arg("hello gateway"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello gateway");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_stderr() {
        let gateway = ProcessGateway::new(2);
        let err = gateway
            .run(&quick("sh").args(["-c", "echo broken pipe >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            ProcessError::ExitFailure { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("broken pipe"));
            }
            other => panic!("expected ExitFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_within_bound() {
        let gateway = ProcessGateway::new(1);
        let timeout = Duration::from_millis(300);
        let started = Instant::now();

        let err = gateway
            .run(&Invocation::new("sleep", timeout).arg("30"))
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, ProcessError::TimedOut { .. }), "got {:?}", err);
        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
        // The slot is released after the kill
        assert_eq!(gateway.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_missing_input_is_not_spawned() {
        let gateway = ProcessGateway::new(1);
        let err = gateway
            .run(&quick("cat").input(Path::new("/definitely/not/here.wav")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_program_is_spawn_error() {
        let gateway = ProcessGateway::new(1);
        let err = gateway
            .run(&quick("alchemy-no-such-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_invocation_builder() {
        let inv = quick("ffmpeg")
            .arg("-i")
            .input(Path::new("in.wav"))
            .args(["-af", "volume=2dB"])
            .output(Path::new("out.wav"));

        assert_eq!(
            inv.args_lossy(),
            vec!["-i", "in.wav", "-af", "volume=2dB", "out.wav"]
        );
        assert_eq!(inv.arg_after("-af").as_deref(), Some("volume=2dB"));
        assert_eq!(inv.output.as_deref(), Some(Path::new("out.wav")));
        assert_eq!(inv.inputs, vec![PathBuf::from("in.wav")]);
    }
}
