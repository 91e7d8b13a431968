use std::collections::HashSet;

use axum::Json;
use axum::extract::{FromRequest, Path, Query};
use axum::routing::{post, put};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthUser, RequireAuthor};
use crate::db::catalog;
use crate::error::AppError;
use crate::models::*;
use crate::services::{course_progress, ledger, recommender};
use crate::state::AppState;

const MAX_RECOMMENDATIONS: usize = 50;

/// `Json` whose rejections answer with the usual error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
struct AppJson<T>(T);

#[derive(Deserialize)]
struct RecommendationParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct CompletionResponse {
    success: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/courses", get(list_courses).post(create_course))
        .route("/courses/{id}", get(get_course))
        .route("/courses/{id}/units", post(create_course_unit))
        .route("/courses/{id}/units/order", put(reorder_units))
        .route("/courses/{id}/progress", get(get_course_progress))
        .route("/units", post(create_standalone_unit))
        .route("/units/{id}", axum::routing::delete(delete_unit))
        .route("/units/{id}/tests", get(list_test_specs).post(create_test_spec))
        .route("/units/{id}/grade", post(grade_submission))
        .route("/units/{id}/progress", get(unit_progress).put(record_attempt))
        .route("/units/{id}/complete", post(mark_unit_complete))
        .route("/users/{id}/progress", get(user_progress_summary))
        .route("/users/{id}/recommendations", get(recommended_units))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn list_courses(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<Course>>, AppError> {
    let courses = catalog::fetch_courses(&state.db).await?;
    Ok(Json(courses))
}

async fn create_course(
    State(state): State<AppState>,
    RequireAuthor(author): RequireAuthor,
    AppJson(req): AppJson<NewCourseRequest>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    require_title(&req.title)?;
    let course = catalog::insert_course(&state.db, req).await?;
    info!(course_id = %course.id, author = %author.user_id, "course created");
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseDetail>, AppError> {
    let course = catalog::find_course_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Course", &id))?;
    let units = catalog::fetch_units_for_course(&state.db, &id).await?;
    Ok(Json(CourseDetail { course, units }))
}

async fn create_course_unit(
    State(state): State<AppState>,
    RequireAuthor(author): RequireAuthor,
    Path(id): Path<String>,
    AppJson(req): AppJson<NewUnitRequest>,
) -> Result<(StatusCode, Json<Unit>), AppError> {
    catalog::find_course_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Course", &id))?;
    validate_unit(&req)?;

    let unit = catalog::insert_unit(&state.db, Some(&id), req).await?;
    info!(unit_id = %unit.id, course_id = %id, author = %author.user_id, "unit created");
    Ok((StatusCode::CREATED, Json(unit)))
}

async fn create_standalone_unit(
    State(state): State<AppState>,
    RequireAuthor(author): RequireAuthor,
    AppJson(req): AppJson<NewUnitRequest>,
) -> Result<(StatusCode, Json<Unit>), AppError> {
    validate_unit(&req)?;

    let unit = catalog::insert_unit(&state.db, None, req).await?;
    info!(unit_id = %unit.id, author = %author.user_id, "standalone unit created");
    Ok((StatusCode::CREATED, Json(unit)))
}

async fn reorder_units(
    State(state): State<AppState>,
    RequireAuthor(_author): RequireAuthor,
    Path(id): Path<String>,
    AppJson(req): AppJson<ReorderUnitsRequest>,
) -> Result<Json<Vec<Unit>>, AppError> {
    catalog::find_course_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Course", &id))?;

    let current: HashSet<String> = catalog::fetch_units_for_course(&state.db, &id)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();
    let requested: HashSet<&String> = req.unit_ids.iter().collect();
    let is_permutation = requested.len() == req.unit_ids.len()
        && req.unit_ids.len() == current.len()
        && req.unit_ids.iter().all(|unit_id| current.contains(unit_id));
    if !is_permutation {
        return Err(AppError::Validation(
            "unitIds must list every unit of the course exactly once".to_string(),
        ));
    }

    catalog::update_positions(&state.db, &id, &req.unit_ids).await?;
    let units = catalog::fetch_units_for_course(&state.db, &id).await?;
    Ok(Json(units))
}

async fn delete_unit(
    State(state): State<AppState>,
    RequireAuthor(author): RequireAuthor,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let ok = catalog::delete_unit(&state.db, &id).await?;
    if ok {
        info!(unit_id = %id, author = %author.user_id, "unit deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Unit", id))
    }
}

async fn list_test_specs(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<TestSpec>>, AppError> {
    catalog::find_unit_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Unit", &id))?;
    let specs = catalog::fetch_test_specs(&state.db, &id).await?;
    Ok(Json(specs))
}

async fn create_test_spec(
    State(state): State<AppState>,
    RequireAuthor(_author): RequireAuthor,
    Path(id): Path<String>,
    AppJson(req): AppJson<NewTestSpecRequest>,
) -> Result<(StatusCode, Json<TestSpec>), AppError> {
    let unit = catalog::find_unit_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Unit", &id))?;
    if unit.kind != UnitKind::Exercise {
        return Err(AppError::Validation("Test specs belong to exercise units".to_string()));
    }
    if req.test_code.trim().is_empty() {
        return Err(AppError::Validation("test_code must not be empty".to_string()));
    }

    let spec = catalog::insert_test_spec(&state.db, &id, req).await?;
    Ok((StatusCode::CREATED, Json(spec)))
}

async fn grade_submission(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<GradeRequest>,
) -> Result<Json<GradeResponse>, AppError> {
    info!(unit_id = %id, user_id = %user.user_id, "grading submission");
    let response = state.grader.grade(&state.db, &id, &req.code).await?;
    Ok(Json(response))
}

async fn unit_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProgressRecord>, AppError> {
    let record = ledger::get_record(&state.db, &user.user_id, &id).await?;
    Ok(Json(record))
}

async fn record_attempt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<RecordAttemptRequest>,
) -> Result<Json<ProgressRecord>, AppError> {
    let record =
        ledger::record_attempt(&state.db, &user.user_id, &id, req.code.as_deref(), Utc::now())
            .await?;
    Ok(Json(record))
}

async fn mark_unit_complete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CompletionResponse>, AppError> {
    ledger::mark_complete(&state.db, &user.user_id, &id, Utc::now()).await?;
    Ok(Json(CompletionResponse { success: true }))
}

async fn user_progress_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProgressSummary>, AppError> {
    user.ensure_self(&id)?;
    let summary = ledger::get_summary(&state.db, &id, Utc::now()).await?;
    Ok(Json(summary))
}

async fn recommended_units(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(params): Query<RecommendationParams>,
) -> Result<Json<Vec<Unit>>, AppError> {
    user.ensure_self(&id)?;

    let limit = params.limit.unwrap_or(recommender::DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_RECOMMENDATIONS {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_RECOMMENDATIONS}"
        )));
    }

    let units = recommender::recommend(&state.db, &id, limit).await?;
    Ok(Json(units))
}

async fn get_course_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseProgress>, AppError> {
    let progress = course_progress::course_progress(&state.db, &user.user_id, &id).await?;
    Ok(Json(progress))
}

fn require_title(title: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

fn validate_unit(req: &NewUnitRequest) -> Result<(), AppError> {
    require_title(&req.title)?;
    if req.kind != UnitKind::Exercise && req.exercise.is_some() {
        return Err(AppError::Validation(
            "Only exercise units carry an exercise payload".to_string(),
        ));
    }
    Ok(())
}
