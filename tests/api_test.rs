use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use courseforge::api::router;
use courseforge::auth::{ROLE_INSTRUCTOR, ROLE_STUDENT, issue_token};
use courseforge::config::SandboxConfig;
use courseforge::db::connect_in_memory;
use courseforge::sandbox::{Sandbox, Verdict};
use courseforge::services::Grader;
use courseforge::state::AppState;

const SECRET: &str = "integration-test-secret";

/// Passes when the submission contains the test code verbatim.
struct EchoSandbox;

#[async_trait]
impl Sandbox for EchoSandbox {
    async fn execute(&self, submission: &str, test_code: &str, _timeout: Duration) -> Verdict {
        match test_code {
            "throw" => Verdict::fail("TypeError: solution is not a function"),
            code if submission.contains(code) => Verdict::pass(),
            _ => Verdict { passed: false, error: None },
        }
    }
}

struct TestApp {
    app: Router,
    author: String,
    alice: String,
    bob: String,
}

impl TestApp {
    async fn new() -> Self {
        let db = connect_in_memory().await.expect("Failed to create database");
        let grader = Grader::new(Arc::new(EchoSandbox), &SandboxConfig::default());
        let state = AppState {
            db,
            grader,
            jwt_secret: Arc::from(SECRET),
        };

        let token = |user: &str, role: &str| {
            issue_token(user, role, SECRET, chrono::Duration::minutes(10)).expect("token")
        };

        Self {
            app: router(state),
            author: token("instructor-1", ROLE_INSTRUCTOR),
            alice: token("alice", ROLE_STUDENT),
            bob: token("bob", ROLE_STUDENT),
        }
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.send_raw(method, uri, token, body.map(|body| body.to_string())).await
    }

    async fn send_raw(&self, method: &str, uri: &str, token: Option<&str>, body: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_course(&self, title: &str) -> String {
        let (status, body) = self
            .send("POST", "/courses", Some(&self.author), Some(json!({ "title": title })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_exercise(&self, course_id: Option<&str>, title: &str, technologies: &[&str]) -> String {
        let uri = match course_id {
            Some(id) => format!("/courses/{id}/units"),
            None => "/units".to_string(),
        };
        let (status, body) = self
            .send(
                "POST",
                &uri,
                Some(&self.author),
                Some(json!({
                    "title": title,
                    "kind": "exercise",
                    "exercise": {
                        "initialCode": "function add(a, b) {}",
                        "language": "javascript",
                        "instructions": "Return the sum"
                    },
                    "technologies": technologies,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn add_test(&self, unit_id: &str, test_code: &str, failure_message: Option<&str>) {
        let (status, _) = self
            .send(
                "POST",
                &format!("/units/{unit_id}/tests"),
                Some(&self.author),
                Some(json!({
                    "description": format!("expects {test_code}"),
                    "testCode": test_code,
                    "failureMessage": failure_message,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, _) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() {
    let app = TestApp::new().await;

    let (status, _) = app
        .send("POST", "/units/x/grade", None, Some(json!({ "code": "" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("POST", "/units/x/complete", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_students_cannot_author() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send("POST", "/courses", Some(&app.alice), Some(json!({ "title": "Mine" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Author role required");
}

#[tokio::test]
async fn test_grade_returns_one_result_per_test_in_order() {
    let app = TestApp::new().await;
    let unit_id = app.create_exercise(None, "sum", &["javascript"]).await;
    app.add_test(&unit_id, "add", None).await;
    app.add_test(&unit_id, "throw", None).await;
    app.add_test(&unit_id, "multiply", Some("Define multiply")).await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/units/{unit_id}/grade"),
            Some(&app.alice),
            Some(json!({ "code": "function add(a, b) { return a + b; }" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allPassed"], false);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["passed"], true);
    assert_eq!(results[0]["description"], "expects add");
    assert!(results[0]["testId"].is_string());
    assert!(results[0].get("test_id").is_none());
    assert_eq!(results[1]["passed"], false);
    assert_eq!(results[1]["error"], "TypeError: solution is not a function");
    assert_eq!(results[2]["message"], "Define multiply");

    // Grading leaves the ledger alone.
    let (_, summary) = app.send("GET", "/users/alice/progress", Some(&app.alice), None).await;
    assert_eq!(summary["completed"], 0);
    assert_eq!(summary["inProgress"], 0);
}

#[tokio::test]
async fn test_malformed_body_gets_error_body() {
    let app = TestApp::new().await;
    let unit_id = app.create_exercise(None, "sum", &[]).await;

    let (status, body) = app
        .send_raw(
            "POST",
            &format!("/units/{unit_id}/grade"),
            Some(&app.alice),
            Some("{\"code\": ".to_string()),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "400 Bad Request");
    assert!(body["message"].as_str().unwrap().contains("JSON"));
}

#[tokio::test]
async fn test_grade_unknown_unit_is_not_found() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send("POST", "/units/missing/grade", Some(&app.alice), Some(json!({ "code": "" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completion_flow_and_summary() {
    let app = TestApp::new().await;
    let first = app.create_exercise(None, "one", &[]).await;
    let second = app.create_exercise(None, "two", &[]).await;

    let (status, body) = app
        .send("POST", &format!("/units/{first}/complete"), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, _) = app
        .send("POST", &format!("/units/{first}/complete"), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, record) = app
        .send(
            "PUT",
            &format!("/units/{second}/progress"),
            Some(&app.alice),
            Some(json!({ "code": "function add() {}" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "in_progress");
    assert_eq!(record["unitId"], second);
    assert!(record["updatedAt"].is_string());

    let (status, record) = app
        .send("GET", &format!("/units/{first}/progress"), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "completed");

    let (status, _) = app
        .send("GET", &format!("/units/{first}/progress"), Some(&app.bob), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, summary) = app.send("GET", "/users/alice/progress", Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["completed"], 1);
    assert_eq!(summary["inProgress"], 1);
    assert_eq!(summary["totalUnits"], 2);
    assert_eq!(summary["completionRate"], 50);
    assert_eq!(summary["streak"], 1);
    assert!(summary["lastActivity"].is_string());
}

#[tokio::test]
async fn test_complete_unknown_unit_is_not_found() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send("POST", "/units/missing/complete", Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_users_progress_is_forbidden() {
    let app = TestApp::new().await;

    let (status, _) = app.send("GET", "/users/alice/progress", Some(&app.bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send("GET", "/users/alice/recommendations", Some(&app.bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_recommendations_rank_by_mastered_technologies() {
    let app = TestApp::new().await;
    let done = app.create_exercise(None, "react basics", &["react"]).await;
    app.create_exercise(None, "fullstack", &["react", "node"]).await;
    app.create_exercise(None, "vue intro", &["vue"]).await;

    app.send("POST", &format!("/units/{done}/complete"), Some(&app.alice), None)
        .await;

    let (status, body) = app
        .send("GET", "/users/alice/recommendations", Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["fullstack", "vue intro"]);

    let (status, body) = app
        .send("GET", "/users/alice/recommendations?limit=1", Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = app
        .send("GET", "/users/alice/recommendations?limit=0", Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_course_progress() {
    let app = TestApp::new().await;
    let course = app.create_course("Web Fundamentals").await;
    let mut modules = Vec::new();
    for title in ["html", "css", "js", "dom"] {
        modules.push(app.create_exercise(Some(&course), title, &[]).await);
    }
    app.send("POST", &format!("/units/{}/complete", modules[0]), Some(&app.alice), None)
        .await;

    let (status, body) = app
        .send("GET", &format!("/courses/{course}/progress"), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalModules"], 4);
    assert_eq!(body["completedModules"], 1);
    assert_eq!(body["progressPercentage"], 25);
    assert_eq!(body["completedModuleIds"], json!([modules[0]]));
}

#[tokio::test]
async fn test_course_without_modules_is_not_found() {
    let app = TestApp::new().await;
    let course = app.create_course("Empty").await;

    let (status, _) = app
        .send("GET", &format!("/courses/{course}/progress"), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reorder_and_delete_units() {
    let app = TestApp::new().await;
    let course = app.create_course("Ordering").await;
    let a = app.create_exercise(Some(&course), "a", &[]).await;
    let b = app.create_exercise(Some(&course), "b", &[]).await;
    let c = app.create_exercise(Some(&course), "c", &[]).await;

    let (status, _) = app
        .send(
            "PUT",
            &format!("/courses/{course}/units/order"),
            Some(&app.author),
            Some(json!({ "unitIds": [c, a] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .send(
            "PUT",
            &format!("/courses/{course}/units/order"),
            Some(&app.author),
            Some(json!({ "unitIds": [c, a, b] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let order: Vec<_> = body.as_array().unwrap().iter().map(|u| u["id"].clone()).collect();
    assert_eq!(order, [json!(c), json!(a), json!(b)]);

    app.send("POST", &format!("/units/{a}/complete"), Some(&app.alice), None)
        .await;
    let (status, _) = app
        .send("DELETE", &format!("/units/{a}"), Some(&app.author), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, detail) = app
        .send("GET", &format!("/courses/{course}"), Some(&app.alice), None)
        .await;
    assert_eq!(detail["units"].as_array().unwrap().len(), 2);

    let (_, summary) = app.send("GET", "/users/alice/progress", Some(&app.alice), None).await;
    assert_eq!(summary["completed"], 0);
}
