use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UnitKind {
    Article,
    Video,
    Exercise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExercisePayload {
    pub initial_code: String,
    pub language: String,
    pub instructions: String,
}

/// A course module or a standalone exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub course_id: Option<String>,
    pub title: String,
    pub description: String,
    pub position: i64,
    pub kind: UnitKind,
    pub exercise: Option<ExercisePayload>,
    pub technologies: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Flat `units` row; technologies live in their own table.
#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    pub id: String,
    pub course_id: Option<String>,
    pub title: String,
    pub description: String,
    pub position: i64,
    pub kind: UnitKind,
    pub initial_code: Option<String>,
    pub language: Option<String>,
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UnitRow {
    pub fn into_unit(self, technologies: Vec<String>) -> Unit {
        let exercise = match (self.initial_code, self.language) {
            (Some(initial_code), Some(language)) => Some(ExercisePayload {
                initial_code,
                language,
                instructions: self.instructions.unwrap_or_default(),
            }),
            _ => None,
        };

        Unit {
            id: self.id,
            course_id: self.course_id,
            title: self.title,
            description: self.description,
            position: self.position,
            kind: self.kind,
            exercise,
            technologies,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUnitRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: UnitKind,
    pub exercise: Option<ExercisePayload>,
    #[serde(default)]
    pub technologies: Vec<String>,
}
