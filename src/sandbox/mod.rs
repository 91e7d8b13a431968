//! Isolated execution of untrusted submissions against author test code.
//!
//! The grader only sees the [`Sandbox`] trait. [`ProcessSandbox`] runs each
//! evaluation in a fresh interpreter process that is killed when its time
//! budget runs out.

pub mod harness;
pub mod process;

use std::{io, process::ExitStatus, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use process::ProcessSandbox;

pub const TIMEOUT_MESSAGE: &str = "Timeout exceeded";

/// Outcome of running one test against one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self { passed: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { passed: false, error: Some(error.into()) }
    }

    pub fn timeout() -> Self {
        Self::fail(TIMEOUT_MESSAGE)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Submission does not define a top-level function")]
    NoExportedFunction,
    #[error("Unable to prepare sandbox directory: {source}")]
    Workspace { source: io::Error },
    #[error("Unable to start {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Unable to communicate with the sandbox process: {source}")]
    Io { source: io::Error },
    #[error("Timeout exceeded")]
    TimedOut,
    #[error("Sandbox produced no verdict")]
    MissingVerdict,
    #[error("Invalid verdict from sandbox: {source}")]
    InvalidVerdict { source: serde_json::Error },
    #[error("Output limit of {limit} bytes exceeded")]
    OutputLimit { limit: usize },
    #[error("Process exited with {status}: {stderr}")]
    Crashed { status: ExitStatus, stderr: String },
}

impl From<SandboxError> for Verdict {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::TimedOut => Verdict::timeout(),
            other => Verdict::fail(other.to_string()),
        }
    }
}

/// Capability that evaluates `test_code` against `submission`.
///
/// Implementations never fail: every problem is folded into a failed
/// [`Verdict`].
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, submission: &str, test_code: &str, timeout: Duration) -> Verdict;
}
