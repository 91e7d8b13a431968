use std::{env, io, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::harness::{self, HarnessScript};
use super::{Sandbox, SandboxError, Verdict};

const MAX_STDOUT_BYTES: usize = 1024 * 1024;
const MAX_STDERR_BYTES: usize = 64 * 1024;
const MAX_STDERR_CHARS: usize = 2000;

/// Runs every evaluation in a fresh interpreter process.
///
/// The harness script is written to the child's stdin. The child gets an
/// empty environment (apart from `PATH`), a throwaway working directory, and
/// is killed once the time budget is spent or it floods its output pipes.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    args: Vec<String>,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn run(&self, script: &HarnessScript, timeout: Duration) -> Result<Verdict, SandboxError> {
        let workdir = tempfile::tempdir().map_err(|source| SandboxError::Workspace { source })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(path) = env::var("PATH") {
            command.env("PATH", path);
        }

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxError::Io {
                source: io::Error::other("child pipes were not captured"),
            });
        };

        let evaluation = async move {
            match stdin.write_all(script.source.as_bytes()).await {
                // The interpreter may exit without reading everything.
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    return Err(SandboxError::Io { source: e });
                }
                _ => {}
            }
            drop(stdin);

            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, MAX_STDOUT_BYTES),
                read_capped(stderr, MAX_STDERR_BYTES)
            )?;
            let status = child
                .wait()
                .await
                .map_err(|source| SandboxError::Io { source })?;
            Ok((status, stdout, stderr))
        };

        // Dropping the evaluation on expiry or overflow drops the child,
        // which kills it.
        let (status, stdout, stderr) = tokio::time::timeout(timeout, evaluation)
            .await
            .map_err(|_| SandboxError::TimedOut)??;

        let stdout = String::from_utf8_lossy(&stdout);
        if let Some(verdict) = harness::parse_verdict(&stdout, &script.marker) {
            return verdict;
        }

        if status.success() {
            return Err(SandboxError::MissingVerdict);
        }

        let stderr: String = String::from_utf8_lossy(&stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();
        Err(SandboxError::Crashed { status, stderr })
    }
}

/// Reads a pipe to EOF, failing once it carries more than `limit` bytes.
async fn read_capped<R>(reader: R, limit: usize) -> Result<Vec<u8>, SandboxError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .await
        .map_err(|source| SandboxError::Io { source })?;

    if buf.len() > limit {
        return Err(SandboxError::OutputLimit { limit });
    }
    Ok(buf)
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&self, submission: &str, test_code: &str, timeout: Duration) -> Verdict {
        let script = match harness::build_script(submission, test_code) {
            Ok(script) => script,
            Err(e) => return e.into(),
        };

        match self.run(&script, timeout).await {
            Ok(verdict) => {
                debug!(passed = verdict.passed, "sandbox evaluation finished");
                verdict
            }
            Err(e) => {
                warn!(program = %self.program, "sandbox evaluation failed: {}", e);
                e.into()
            }
        }
    }
}
