use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ProgressRecord;

const RECORD_COLUMNS: &str = "id, user_id, unit_id, status, code, completed_at, updated_at";

pub async fn find_record(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
) -> Result<Option<ProgressRecord>, sqlx::Error> {
    sqlx::query_as::<_, ProgressRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM progress_records WHERE user_id = ?1 AND unit_id = ?2"
    ))
    .bind(user_id)
    .bind(unit_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_records_for_user(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<ProgressRecord>, sqlx::Error> {
    sqlx::query_as::<_, ProgressRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM progress_records WHERE user_id = ? ORDER BY updated_at DESC"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn fetch_completed_unit_ids(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT unit_id FROM progress_records WHERE user_id = ? AND status = 'completed'",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Upserts a completed record on the (user, unit) key.
///
/// A record that is already completed keeps its first `completed_at`;
/// only `updated_at` moves.
pub async fn mark_complete(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
    now: DateTime<Utc>,
) -> Result<ProgressRecord, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO progress_records
            (id, user_id, unit_id, status, code, completed_at, updated_at)
        VALUES (?1, ?2, ?3, 'completed', NULL, ?4, ?5)
        ON CONFLICT (user_id, unit_id) DO UPDATE SET
            status = 'completed',
            completed_at = COALESCE(progress_records.completed_at, excluded.completed_at),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(unit_id)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;

    find_record(db, user_id, unit_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Upserts an in-progress record holding the latest code snapshot.
///
/// Completed records stay completed.
pub async fn record_attempt(
    db: &SqlitePool,
    user_id: &str,
    unit_id: &str,
    code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ProgressRecord, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO progress_records
            (id, user_id, unit_id, status, code, completed_at, updated_at)
        VALUES (?1, ?2, ?3, 'in_progress', ?4, NULL, ?5)
        ON CONFLICT (user_id, unit_id) DO UPDATE SET
            status = CASE
                WHEN progress_records.status = 'completed' THEN 'completed'
                ELSE 'in_progress'
            END,
            code = COALESCE(excluded.code, progress_records.code),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(unit_id)
    .bind(code)
    .bind(now)
    .execute(db)
    .await?;

    find_record(db, user_id, unit_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}
