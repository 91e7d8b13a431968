use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::db::{catalog, progress};
use crate::error::AppError;
use crate::models::{CourseProgress, Unit};
use crate::services::ledger::percentage;

pub async fn course_progress(
    db: &SqlitePool,
    user_id: &str,
    course_id: &str,
) -> Result<CourseProgress, AppError> {
    catalog::find_course_by_id(db, course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course", course_id))?;

    let modules = catalog::fetch_units_for_course(db, course_id).await?;
    let completed: HashSet<String> = progress::fetch_completed_unit_ids(db, user_id)
        .await?
        .into_iter()
        .collect();

    compute(&modules, &completed).ok_or_else(|| AppError::not_found("Modules for course", course_id))
}

/// `None` for a course without modules.
pub fn compute(modules: &[Unit], completed: &HashSet<String>) -> Option<CourseProgress> {
    let completed_module_ids: Vec<String> = modules
        .iter()
        .filter(|m| completed.contains(&m.id))
        .map(|m| m.id.clone())
        .collect();

    let progress_percentage = percentage(completed_module_ids.len(), modules.len())?;

    Some(CourseProgress {
        total_modules: modules.len(),
        completed_modules: completed_module_ids.len(),
        progress_percentage,
        completed_module_ids,
    })
}
