use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::Grader;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub grader: Grader,
    pub jwt_secret: Arc<str>,
}
