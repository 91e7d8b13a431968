use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{catalog, progress};
use crate::error::AppError;
use crate::models::{ProgressRecord, ProgressStatus, ProgressSummary};

/// Marks a unit completed for a user. Re-completion keeps the first
/// `completed_at`.
pub async fn mark_complete(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
    now: DateTime<Utc>,
) -> Result<ProgressRecord, AppError> {
    ensure_unit_exists(db, unit_id).await?;

    let record = progress::mark_complete(db, user_id, unit_id, now).await?;
    info!(user_id, unit_id, "unit completed");
    Ok(record)
}

/// Saves a code snapshot and moves a fresh record to in-progress.
pub async fn record_attempt(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
    code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ProgressRecord, AppError> {
    ensure_unit_exists(db, unit_id).await?;

    Ok(progress::record_attempt(db, user_id, unit_id, code, now).await?)
}

/// The caller's record for a unit; 404 when the unit was never touched.
pub async fn get_record(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
) -> Result<ProgressRecord, AppError> {
    ensure_unit_exists(db, unit_id).await?;

    progress::find_record(db, user_id, unit_id)
        .await?
        .ok_or_else(|| AppError::not_found("Progress for unit", unit_id))
}

pub async fn get_summary(
    db: &SqlitePool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<ProgressSummary, AppError> {
    let records = progress::fetch_records_for_user(db, user_id).await?;
    let total_units = catalog::count_units(db).await?;

    Ok(summarize(&records, total_units.max(0) as usize, now))
}

pub fn summarize(records: &[ProgressRecord], total_units: usize, now: DateTime<Utc>) -> ProgressSummary {
    let completed = records
        .iter()
        .filter(|r| r.status == ProgressStatus::Completed)
        .count();
    let in_progress = records
        .iter()
        .filter(|r| r.status == ProgressStatus::InProgress)
        .count();

    ProgressSummary {
        completed,
        in_progress,
        total_units,
        completion_rate: percentage(completed, total_units).unwrap_or(0),
        streak: compute_streak(records.iter().map(|r| r.updated_at), now),
        last_activity: records.iter().map(|r| r.updated_at).max(),
    }
}

/// Number of consecutive UTC calendar days with activity, ending at the most
/// recent one. Zero when the latest activity is older than yesterday.
pub fn compute_streak(activity: impl IntoIterator<Item = DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let days: BTreeSet<NaiveDate> = activity.into_iter().map(|ts| ts.date_naive()).collect();

    let mut days = days.into_iter().rev();
    let Some(latest) = days.next() else {
        return 0;
    };

    let today = now.date_naive();
    let yesterday = today - Days::new(1);
    if latest < yesterday {
        return 0;
    }

    let mut streak = 1;
    let mut expected = latest - Days::new(1);
    for day in days {
        if day != expected {
            break;
        }
        streak += 1;
        expected = day - Days::new(1);
    }

    streak
}

/// `part / total` as a rounded percentage; `None` when `total` is zero.
pub fn percentage(part: usize, total: usize) -> Option<u32> {
    if total == 0 {
        return None;
    }
    Some(((part as f64 / total as f64) * 100.0).round() as u32)
}

async fn ensure_unit_exists(db: &SqlitePool, unit_id: &str) -> Result<(), AppError> {
    catalog::find_unit_by_id(db, unit_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Unit", unit_id))
}
