use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::SandboxConfig;
use crate::db::catalog;
use crate::error::AppError;
use crate::models::{GradeResponse, SubmissionResult, TestSpec};
use crate::sandbox::{Sandbox, Verdict};

/// Runs a submission against every test spec of a unit.
///
/// Grading is read-only: recording completion is a separate call.
#[derive(Clone)]
pub struct Grader {
    sandbox: Arc<dyn Sandbox>,
    timeout: Duration,
    max_parallel: usize,
}

impl Grader {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: &SandboxConfig) -> Self {
        Self {
            sandbox,
            timeout: config.timeout,
            max_parallel: config.max_parallel.max(1),
        }
    }

    /// One result per spec, in input order, whatever happens to each test.
    pub async fn run_tests(&self, code: &str, tests: &[TestSpec]) -> Vec<SubmissionResult> {
        let code: Arc<str> = Arc::from(code);

        stream::iter(tests.to_vec())
            .map(|spec| {
                let sandbox = Arc::clone(&self.sandbox);
                let code = Arc::clone(&code);
                let test_code = spec.test_code.clone();
                let timeout = self.timeout;

                let handle = tokio::spawn(async move {
                    sandbox.execute(&code, &test_code, timeout).await
                });

                async move {
                    let verdict = handle.await.unwrap_or_else(|e| {
                        warn!(test_id = %spec.id, "test evaluation aborted: {}", e);
                        Verdict::fail(format!("Evaluation aborted: {e}"))
                    });
                    to_result(&spec, verdict)
                }
            })
            .buffered(self.max_parallel)
            .collect()
            .await
    }

    pub async fn grade(
        &self,
        db: &SqlitePool,
        unit_id: &str,
        code: &str,
    ) -> Result<GradeResponse, AppError> {
        catalog::find_unit_by_id(db, unit_id)
            .await?
            .ok_or_else(|| AppError::not_found("Unit", unit_id))?;

        let tests = catalog::fetch_test_specs(db, unit_id).await?;
        if tests.is_empty() {
            return Err(AppError::not_found("Test specs for unit", unit_id));
        }

        let results = self.run_tests(code, &tests).await;
        let passed = results.iter().filter(|r| r.passed).count();
        info!(unit_id, passed, total = results.len(), "graded submission");

        Ok(GradeResponse {
            all_passed: passed == results.len(),
            results,
        })
    }
}

fn to_result(spec: &TestSpec, verdict: Verdict) -> SubmissionResult {
    let message = if verdict.passed {
        "Test passed".to_string()
    } else {
        spec.failure_message
            .clone()
            .unwrap_or_else(|| format!("Test failed: {}", spec.description))
    };

    SubmissionResult {
        test_id: spec.id.clone(),
        description: spec.description.clone(),
        passed: verdict.passed,
        message,
        error: verdict.error,
    }
}
