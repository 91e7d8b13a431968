use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Author-supplied validation logic for an exercise unit.
///
/// `test_code` is a function body that receives the submission's exported
/// callable as `solution` and returns a truthy value when the check holds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    pub id: String,
    pub unit_id: String,
    pub description: String,
    pub test_code: String,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestSpecRequest {
    pub description: String,
    pub test_code: String,
    pub failure_message: Option<String>,
}

/// Outcome of one test against one submission. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub test_id: String,
    pub description: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    pub results: Vec<SubmissionResult>,
    pub all_passed: bool,
}
