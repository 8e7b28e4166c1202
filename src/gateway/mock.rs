//! Mock process runner for testing without ffmpeg or an analyzer installed
//!
//! Records every invocation and answers through a scripted responder. On
//! success it writes a short silent 2 ch / 48 kHz / 24-bit WAV at the
//! invocation's output path, the same shape a real render produces.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{Invocation, ProcessOutput, ProcessRunner};
use crate::error::ProcessError;

/// Scripted answer for one invocation.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Success { stdout: String, stderr: String },
    Fail { code: i32, stderr: String },
    TimedOut,
}

impl MockResponse {
    pub fn ok() -> Self {
        MockResponse::Success {
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn stdout(stdout: impl Into<String>) -> Self {
        MockResponse::Success {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn stderr(stderr: impl Into<String>) -> Self {
        MockResponse::Success {
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn fail(stderr: impl Into<String>) -> Self {
        MockResponse::Fail {
            code: 1,
            stderr: stderr.into(),
        }
    }
}

type Responder = Box<dyn Fn(&Invocation) -> MockResponse + Send + Sync>;

/// Process runner that never spawns anything.
pub struct MockRunner {
    calls: Mutex<Vec<Invocation>>,
    responder: Responder,
    render_outputs: bool,
}

impl MockRunner {
    /// Every invocation succeeds with empty output.
    pub fn new() -> Self {
        Self::with_responder(|_| MockResponse::ok())
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            render_outputs: true,
        }
    }

    /// Every invocation fails with the given stderr.
    pub fn failing(stderr: &str) -> Self {
        let stderr = stderr.to_string();
        Self::with_responder(move |_| MockResponse::fail(stderr.clone()))
    }

    /// Do not write output files on success.
    pub fn without_rendering(mut self) -> Self {
        self.render_outputs = false;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record(&self, invocation: &Invocation) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.record(invocation);

        if let Some(missing) = invocation.inputs.iter().find(|p| !p.exists()) {
            return Err(ProcessError::InputNotFound {
                path: missing.clone(),
            });
        }

        match (self.responder)(invocation) {
            MockResponse::Success { stdout, stderr } => {
                if self.render_outputs {
                    if let Some(output) = &invocation.output {
                        write_silent_wav(output).map_err(|e| ProcessError::Io {
                            program: invocation.program.clone(),
                            source: e,
                        })?;
                    }
                }
                Ok(ProcessOutput {
                    stdout,
                    stderr,
                    elapsed: Duration::from_millis(1),
                })
            }
            MockResponse::Fail { code, stderr } => Err(ProcessError::ExitFailure {
                program: invocation.program.clone(),
                code: Some(code),
                stderr,
            }),
            MockResponse::TimedOut => Err(ProcessError::TimedOut {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            }),
        }
    }
}

/// Write 100 ms of stereo silence in the pipeline's output format.
pub fn write_silent_wav(path: &Path) -> std::io::Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 24,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(hound_to_io)?;
    for _ in 0..4_800 * 2 {
        writer.write_sample(0i32).map_err(hound_to_io)?;
    }
    writer.finalize().map_err(hound_to_io)
}

fn hound_to_io(err: hound::Error) -> std::io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_renders() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.wav");
        let runner = MockRunner::new();

        runner
            .run(&Invocation::new("ffmpeg", Duration::from_secs(1)).output(&out))
            .await
            .unwrap();

        assert_eq!(runner.call_count(), 1);
        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.spec().bits_per_sample, 24);
    }

    #[tokio::test]
    async fn test_failing_runner() {
        let runner = MockRunner::failing("boom");
        let err = runner
            .run(&Invocation::new("ffmpeg", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.diagnostic(), Some("boom"));
    }
}
