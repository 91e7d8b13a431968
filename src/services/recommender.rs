use std::cmp::Reverse;
use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::debug;

use crate::db::{catalog, progress};
use crate::error::AppError;
use crate::models::{Unit, UnitKind};

pub const DEFAULT_LIMIT: usize = 5;

/// Exercise units the user has not completed, best technology match first.
pub async fn recommend(db: &SqlitePool, user_id: &str, limit: usize) -> Result<Vec<Unit>, AppError> {
    let exercises = catalog::fetch_units_by_kind(db, UnitKind::Exercise).await?;
    let completed: HashSet<String> = progress::fetch_completed_unit_ids(db, user_id)
        .await?
        .into_iter()
        .collect();

    let ranked = rank(exercises, &completed, limit);
    debug!(user_id, count = ranked.len(), "recommendations ranked");
    Ok(ranked)
}

/// Union of technology tags over the completed units of `catalog`.
pub fn mastered_set<'a>(catalog: &'a [Unit], completed: &HashSet<String>) -> HashSet<&'a str> {
    catalog
        .iter()
        .filter(|unit| completed.contains(&unit.id))
        .flat_map(|unit| unit.technologies.iter().map(String::as_str))
        .collect()
}

/// Drops completed units, then orders by overlap with the mastered set,
/// newest first on ties. Deterministic for identical inputs.
pub fn rank(catalog: Vec<Unit>, completed: &HashSet<String>, limit: usize) -> Vec<Unit> {
    let mastered: HashSet<String> = mastered_set(&catalog, completed)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut scored: Vec<(usize, Unit)> = catalog
        .into_iter()
        .filter(|unit| !completed.contains(&unit.id))
        .map(|unit| {
            let score = unit
                .technologies
                .iter()
                .filter(|tech| mastered.contains(tech.as_str()))
                .count();
            (score, unit)
        })
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        (Reverse(*score_a), Reverse(a.created_at), &a.id)
            .cmp(&(Reverse(*score_b), Reverse(b.created_at), &b.id))
    });

    scored.into_iter().take(limit).map(|(_, unit)| unit).collect()
}
