use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{
    Course, NewCourseRequest, NewTestSpecRequest, NewUnitRequest, TestSpec, Unit, UnitKind,
    UnitRow,
};

const UNIT_COLUMNS: &str = "id, course_id, title, description, position, kind, \
     initial_code, language, instructions, created_at";

pub async fn fetch_courses(db: &SqlitePool) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, title, description, created_at FROM courses ORDER BY created_at DESC",
    )
    .fetch_all(db)
    .await
}

pub async fn find_course_by_id(db: &SqlitePool, id: &str) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, title, description, created_at FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn insert_course(db: &SqlitePool, req: NewCourseRequest) -> Result<Course, sqlx::Error> {
    let course = Course {
        id: Uuid::new_v4().to_string(),
        title: req.title,
        description: req.description,
        created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO courses (id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.created_at)
        .execute(db)
        .await?;

    Ok(course)
}

pub async fn find_unit_by_id(db: &SqlitePool, id: &str) -> Result<Option<Unit>, sqlx::Error> {
    let row = sqlx::query_as::<_, UnitRow>(&format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?"))
        .bind(id)
        .fetch_optional(db)
        .await?;

    match row {
        Some(row) => {
            let technologies = fetch_technologies_for_unit(db, &row.id).await?;
            Ok(Some(row.into_unit(technologies)))
        }
        None => Ok(None),
    }
}

/// Units of a course in position order.
pub async fn fetch_units_for_course(
    db: &SqlitePool,
    course_id: &str,
) -> Result<Vec<Unit>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UnitRow>(&format!(
        "SELECT {UNIT_COLUMNS} FROM units WHERE course_id = ? ORDER BY position, created_at"
    ))
    .bind(course_id)
    .fetch_all(db)
    .await?;

    attach_technologies(db, rows).await
}

pub async fn fetch_units_by_kind(db: &SqlitePool, kind: UnitKind) -> Result<Vec<Unit>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UnitRow>(&format!(
        "SELECT {UNIT_COLUMNS} FROM units WHERE kind = ? ORDER BY created_at DESC"
    ))
    .bind(kind)
    .fetch_all(db)
    .await?;

    attach_technologies(db, rows).await
}

pub async fn count_units(db: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM units").fetch_one(db).await
}

/// Inserts a unit at the end of its course, or as a standalone unit when
/// `course_id` is `None`.
pub async fn insert_unit(
    db: &SqlitePool,
    course_id: Option<&str>,
    req: NewUnitRequest,
) -> Result<Unit, sqlx::Error> {
    let mut tx = db.begin().await?;

    let position: i64 = match course_id {
        Some(course_id) => {
            sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM units WHERE course_id = ?")
                .bind(course_id)
                .fetch_one(&mut *tx)
                .await?
        }
        None => 0,
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let (initial_code, language, instructions) = match &req.exercise {
        Some(ex) => (
            Some(ex.initial_code.clone()),
            Some(ex.language.clone()),
            Some(ex.instructions.clone()),
        ),
        None => (None, None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO units
            (id, course_id, title, description, position, kind,
            initial_code, language, instructions, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&id)
    .bind(course_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(position)
    .bind(req.kind)
    .bind(initial_code)
    .bind(language)
    .bind(instructions)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let mut technologies: Vec<String> = Vec::new();
    for tech in req.technologies {
        let tech = tech.trim().to_lowercase();
        if tech.is_empty() || technologies.contains(&tech) {
            continue;
        }
        sqlx::query("INSERT INTO unit_technologies (unit_id, technology) VALUES (?1, ?2)")
            .bind(&id)
            .bind(&tech)
            .execute(&mut *tx)
            .await?;
        technologies.push(tech);
    }

    tx.commit().await?;

    Ok(Unit {
        id,
        course_id: course_id.map(str::to_string),
        title: req.title,
        description: req.description,
        position,
        kind: req.kind,
        exercise: req.exercise,
        technologies,
        created_at: now,
    })
}

/// Rewrites positions so that `unit_ids[i]` sits at position `i`.
pub async fn update_positions(
    db: &SqlitePool,
    course_id: &str,
    unit_ids: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    for (position, unit_id) in unit_ids.iter().enumerate() {
        sqlx::query("UPDATE units SET position = ?1 WHERE id = ?2 AND course_id = ?3")
            .bind(position as i64)
            .bind(unit_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

/// Deletes a unit; tests, technologies and progress rows go with it.
pub async fn delete_unit(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM units WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn insert_test_spec(
    db: &SqlitePool,
    unit_id: &str,
    req: NewTestSpecRequest,
) -> Result<TestSpec, sqlx::Error> {
    let spec = TestSpec {
        id: Uuid::new_v4().to_string(),
        unit_id: unit_id.to_string(),
        description: req.description,
        test_code: req.test_code,
        failure_message: req.failure_message,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO test_specs (id, unit_id, description, test_code, failure_message, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&spec.id)
    .bind(&spec.unit_id)
    .bind(&spec.description)
    .bind(&spec.test_code)
    .bind(&spec.failure_message)
    .bind(spec.created_at)
    .execute(db)
    .await?;

    Ok(spec)
}

/// Test specs of a unit in insertion order.
pub async fn fetch_test_specs(db: &SqlitePool, unit_id: &str) -> Result<Vec<TestSpec>, sqlx::Error> {
    sqlx::query_as::<_, TestSpec>(
        r#"
        SELECT id, unit_id, description, test_code, failure_message, created_at
        FROM test_specs
        WHERE unit_id = ?
        ORDER BY rowid
        "#,
    )
    .bind(unit_id)
    .fetch_all(db)
    .await
}

async fn fetch_technologies_for_unit(db: &SqlitePool, unit_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT technology FROM unit_technologies WHERE unit_id = ? ORDER BY rowid")
        .bind(unit_id)
        .fetch_all(db)
        .await
}

async fn attach_technologies(db: &SqlitePool, rows: Vec<UnitRow>) -> Result<Vec<Unit>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let pairs: Vec<(String, String)> =
        sqlx::query_as("SELECT unit_id, technology FROM unit_technologies ORDER BY rowid")
            .fetch_all(db)
            .await?;

    let mut by_unit: HashMap<String, Vec<String>> = HashMap::new();
    for (unit_id, technology) in pairs {
        by_unit.entry(unit_id).or_default().push(technology);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let technologies = by_unit.remove(&row.id).unwrap_or_default();
            row.into_unit(technologies)
        })
        .collect())
}
