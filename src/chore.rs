use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

use crate::db::run_in_tx;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const CHORE_TITLE_REQUIRED: &str = "CHORE/TITLE_REQUIRED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chore {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub room: String,
    pub is_done: bool,
    pub household_id: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoreHistory {
    pub id: i64,
    pub chore_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    pub done_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Full replacement of a chore's mutable fields; not a partial patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoreUpdate {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub room: String,
    pub is_done: bool,
}

/// Explicit, caller-attributed history append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChoreHistory {
    pub chore_id: i64,
    #[serde(default)]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub member_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Defaults to now when omitted.
    #[serde(default)]
    pub done_at: Option<i64>,
}

impl TryFrom<&SqliteRow> for Chore {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            room: row
                .try_get::<Option<String>, _>("room")?
                .unwrap_or_default(),
            is_done: row.try_get::<i64, _>("is_done")? != 0,
            household_id: row.try_get("household_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for ChoreHistory {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chore_id: row.try_get("chore_id")?,
            member_id: row.try_get("member_id")?,
            member_name: row.try_get("member_name")?,
            done_at: row.try_get("done_at")?,
            notes: row.try_get("notes")?,
        })
    }
}

/// Create a chore for a household with the completion flag cleared.
pub async fn add_chore(
    pool: &SqlitePool,
    household_id: i64,
    title: &str,
    description: Option<&str>,
    room: Option<&str>,
) -> AppResult<Chore> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::new(CHORE_TITLE_REQUIRED, "Chore title is required")
            .with_context("household_id", household_id.to_string()));
    }

    let now = now_ms();
    let room = room.unwrap_or("");
    let res = sqlx::query(
        "INSERT INTO chores (title, description, room, is_done, household_id, created_at) \
         VALUES (?, ?, ?, 0, ?, ?)",
    )
    .bind(title)
    .bind(description)
    .bind(room)
    .bind(household_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Chore {
        id: res.last_insert_rowid(),
        title: title.to_string(),
        description: description.map(str::to_string),
        room: room.to_string(),
        is_done: false,
        household_id,
        created_at: now,
    })
}

/// Delete a chore and its history. Returns `false` when the id is unknown.
pub async fn remove_chore(pool: &SqlitePool, chore_id: i64) -> AppResult<bool> {
    let res = sqlx::query("DELETE FROM chores WHERE id = ?")
        .bind(chore_id)
        .execute(pool)
        .await?;
    let deleted = res.rows_affected() > 0;
    if deleted {
        info!(target: "chorehub", event = "chore_deleted", id = chore_id);
    }
    Ok(deleted)
}

/// Replace a chore's mutable fields. A false→true completion transition
/// appends one anonymous history row in the same transaction as the
/// update, so a crash can never leave a completed chore without a record.
pub async fn update_chore(pool: &SqlitePool, update: &ChoreUpdate) -> AppResult<Option<Chore>> {
    let update = update.clone();
    run_in_tx(pool, |tx| {
        async move {
            let existing = sqlx::query(
                "SELECT id, title, description, room, is_done, household_id, created_at \
                 FROM chores WHERE id = ?",
            )
            .bind(update.id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(AppError::from)?;

            let Some(row) = existing else {
                return Ok(None);
            };
            let existing = Chore::try_from(&row).map_err(AppError::from)?;

            sqlx::query(
                "UPDATE chores SET title = ?, description = ?, room = ?, is_done = ? WHERE id = ?",
            )
            .bind(&update.title)
            .bind(&update.description)
            .bind(&update.room)
            .bind(update.is_done)
            .bind(update.id)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from)?;

            let mut done_transition = false;
            if !existing.is_done && update.is_done {
                done_transition = true;
                sqlx::query(
                    "INSERT INTO chore_histories (chore_id, member_id, member_name, done_at, notes) \
                     VALUES (?, NULL, NULL, ?, NULL)",
                )
                .bind(update.id)
                .bind(now_ms())
                .execute(&mut **tx)
                .await
                .map_err(AppError::from)?;
            }

            if done_transition {
                info!(
                    target: "chorehub",
                    event = "chore_completed",
                    id = update.id,
                    household_id = existing.household_id
                );
            }

            Ok(Some(Chore {
                id: existing.id,
                title: update.title,
                description: update.description,
                room: update.room,
                is_done: update.is_done,
                household_id: existing.household_id,
                created_at: existing.created_at,
            }))
        }
        .boxed()
    })
    .await
}

/// Append a history entry on behalf of a member; `done_at` defaults to now.
pub async fn add_chore_history(
    pool: &SqlitePool,
    entry: &NewChoreHistory,
) -> AppResult<ChoreHistory> {
    let done_at = entry.done_at.unwrap_or_else(now_ms);
    let res = sqlx::query(
        "INSERT INTO chore_histories (chore_id, member_id, member_name, done_at, notes) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(entry.chore_id)
    .bind(entry.member_id)
    .bind(&entry.member_name)
    .bind(done_at)
    .bind(&entry.notes)
    .execute(pool)
    .await?;

    Ok(ChoreHistory {
        id: res.last_insert_rowid(),
        chore_id: entry.chore_id,
        member_id: entry.member_id,
        member_name: entry.member_name.clone(),
        done_at,
        notes: entry.notes.clone(),
    })
}

/// Completion history for a chore, newest first.
pub async fn get_chore_history(pool: &SqlitePool, chore_id: i64) -> AppResult<Vec<ChoreHistory>> {
    let rows = sqlx::query(
        "SELECT id, chore_id, member_id, member_name, done_at, notes FROM chore_histories \
         WHERE chore_id = ? ORDER BY done_at DESC, id DESC",
    )
    .bind(chore_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| ChoreHistory::try_from(row).map_err(AppError::from))
        .collect()
}

pub async fn get_chore(pool: &SqlitePool, chore_id: i64) -> AppResult<Option<Chore>> {
    let row = sqlx::query(
        "SELECT id, title, description, room, is_done, household_id, created_at \
         FROM chores WHERE id = ?",
    )
    .bind(chore_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref()
        .map(|row| Chore::try_from(row).map_err(AppError::from))
        .transpose()
}

pub(crate) async fn household_chores(
    pool: &SqlitePool,
    household_id: i64,
) -> Result<Vec<Chore>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, title, description, room, is_done, household_id, created_at \
         FROM chores WHERE household_id = ? ORDER BY id",
    )
    .bind(household_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(Chore::try_from).collect()
}
