use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chore::{household_chores, Chore};
use crate::db::run_in_tx;
use crate::time::now_ms;
use crate::AppError;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;
const MAX_CODE_ATTEMPTS: usize = 10;
const MAX_SAVE_ATTEMPTS: usize = 5;
const SAVE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub household_id: i64,
    pub created_at: i64,
}

/// A household with its members and chores eagerly loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdDetail {
    pub household: Household,
    pub members: Vec<Member>,
    pub chores: Vec<Chore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdWithMembers {
    pub household: Household,
    pub members: Vec<Member>,
}

impl TryFrom<&SqliteRow> for Household {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Member {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            household_id: row.try_get("household_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Error, Debug)]
pub enum HouseholdCreateError {
    #[error("{field} is required")]
    Validation { field: &'static str },
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    /// The save loop ran out of attempts without surfacing an error.
    #[error("household creation retries exhausted")]
    RetriesExhausted,
}

/// Tagged outcome for join attempts. Infrastructure failure is reported
/// distinctly from "no such household" so callers can decide whether to
/// retry or show an error.
#[derive(Debug)]
pub enum JoinOutcome {
    Joined(Member),
    NotFound,
    Unavailable(AppError),
}

impl JoinOutcome {
    pub fn member(&self) -> Option<&Member> {
        match self {
            JoinOutcome::Joined(member) => Some(member),
            _ => None,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

async fn generate_unique_code(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_code();
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM households WHERE code = ?")
            .bind(&code)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Ok(code);
        }
    }

    // Fallback after repeated collisions: 8 hex chars of a random UUID,
    // accepted without a further existence check. The UNIQUE index still
    // backstops it and the save loop retries on violation.
    let fallback = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    warn!(target: "chorehub", event = "join_code_fallback", code = %fallback);
    Ok(fallback)
}

/// Create a household together with its owner member.
///
/// The join code is generated fresh per attempt; a unique-constraint
/// collision (two creators racing to the same code) rolls back the
/// transaction and retries with a new code after a short delay.
pub async fn create_household(
    pool: &SqlitePool,
    name: &str,
    owner_username: &str,
) -> Result<Household, HouseholdCreateError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HouseholdCreateError::Validation { field: "name" });
    }
    let owner_username = owner_username.trim();
    if owner_username.is_empty() {
        return Err(HouseholdCreateError::Validation {
            field: "owner_username",
        });
    }

    for attempt in 0..MAX_SAVE_ATTEMPTS {
        let code = generate_unique_code(pool).await?;
        let now = now_ms();
        let tx_name = name.to_string();
        let tx_owner = owner_username.to_string();
        let tx_code = code.clone();

        let result: Result<Household, sqlx::Error> = run_in_tx(pool, |tx| {
            async move {
                let res =
                    sqlx::query("INSERT INTO households (name, code, created_at) VALUES (?, ?, ?)")
                        .bind(&tx_name)
                        .bind(&tx_code)
                        .bind(now)
                        .execute(&mut **tx)
                        .await?;
                let household_id = res.last_insert_rowid();
                sqlx::query(
                    "INSERT INTO members (username, household_id, created_at) VALUES (?, ?, ?)",
                )
                .bind(&tx_owner)
                .bind(household_id)
                .bind(now)
                .execute(&mut **tx)
                .await?;
                Ok::<_, sqlx::Error>(Household {
                    id: household_id,
                    name: tx_name,
                    code: tx_code,
                    created_at: now,
                })
            }
            .boxed()
        })
        .await;

        match result {
            Ok(household) => {
                info!(
                    target: "chorehub",
                    event = "household_created",
                    id = household.id,
                    code = %household.code
                );
                return Ok(household);
            }
            Err(err) if is_unique_violation(&err) => {
                warn!(
                    target: "chorehub",
                    event = "household_code_collision",
                    attempt = attempt as u64,
                    error = %err
                );
                if attempt == MAX_SAVE_ATTEMPTS - 1 {
                    return Err(err.into());
                }
                tokio::time::sleep(SAVE_RETRY_DELAY).await;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(HouseholdCreateError::RetriesExhausted)
}

/// Exact-match lookup by join code. Blank input cannot match any stored
/// code and short-circuits without a query.
pub async fn get_household_by_code(
    pool: &SqlitePool,
    code: &str,
) -> Result<Option<Household>, sqlx::Error> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }
    let row = sqlx::query("SELECT id, name, code, created_at FROM households WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Household::try_from).transpose()
}

pub async fn get_household(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<Household>, sqlx::Error> {
    let row = sqlx::query("SELECT id, name, code, created_at FROM households WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Household::try_from).transpose()
}

pub async fn household_members(
    pool: &SqlitePool,
    household_id: i64,
) -> Result<Vec<Member>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, username, household_id, created_at FROM members \
         WHERE household_id = ? ORDER BY id",
    )
    .bind(household_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(Member::try_from).collect()
}

/// Lookup by id with members and chores loaded.
pub async fn get_household_detail(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<HouseholdDetail>, sqlx::Error> {
    let Some(household) = get_household(pool, id).await? else {
        return Ok(None);
    };
    let members = household_members(pool, id).await?;
    let chores = household_chores(pool, id).await?;
    Ok(Some(HouseholdDetail {
        household,
        members,
        chores,
    }))
}

/// All households the username belongs to (case-insensitive), members loaded.
pub async fn get_households_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Vec<HouseholdWithMembers>, sqlx::Error> {
    let username = username.trim();
    if username.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT h.id, h.name, h.code, h.created_at FROM households h \
         WHERE EXISTS (\
           SELECT 1 FROM members m \
           WHERE m.household_id = h.id AND lower(m.username) = lower(?)\
         ) ORDER BY h.id",
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        let household = Household::try_from(row)?;
        let members = household_members(pool, household.id).await?;
        results.push(HouseholdWithMembers { household, members });
    }
    Ok(results)
}

async fn member_by_username(
    pool: &SqlitePool,
    household_id: i64,
    username: &str,
) -> Result<Option<Member>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, username, household_id, created_at FROM members \
         WHERE household_id = ? AND lower(username) = lower(?)",
    )
    .bind(household_id)
    .bind(username)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(Member::try_from).transpose()
}

async fn try_join(
    pool: &SqlitePool,
    code: &str,
    username: &str,
) -> Result<Option<Member>, sqlx::Error> {
    let Some(household) = get_household_by_code(pool, code).await? else {
        return Ok(None);
    };

    if let Some(existing) = member_by_username(pool, household.id, username).await? {
        return Ok(Some(existing));
    }

    let now = now_ms();
    let insert = sqlx::query("INSERT INTO members (username, household_id, created_at) VALUES (?, ?, ?)")
        .bind(username)
        .bind(household.id)
        .bind(now)
        .execute(pool)
        .await;

    match insert {
        Ok(res) => Ok(Some(Member {
            id: res.last_insert_rowid(),
            username: username.to_string(),
            household_id: household.id,
            created_at: now,
        })),
        Err(err) if is_unique_violation(&err) => {
            // Lost the race against a concurrent join; the row exists now.
            info!(
                target: "chorehub",
                event = "join_race_resolved",
                household_id = household.id
            );
            member_by_username(pool, household.id, username).await
        }
        Err(err) => Err(err),
    }
}

/// Join a household by code. Idempotent for an existing member of the same
/// username (compared case-insensitively, stored as provided).
pub async fn join_household(pool: &SqlitePool, code: &str, username: &str) -> JoinOutcome {
    let code = code.trim();
    let username = username.trim();
    if code.is_empty() || username.is_empty() {
        return JoinOutcome::NotFound;
    }

    match try_join(pool, code, username).await {
        Ok(Some(member)) => JoinOutcome::Joined(member),
        Ok(None) => JoinOutcome::NotFound,
        Err(err) => {
            error!(
                target: "chorehub",
                event = "join_failed",
                code = %code,
                username = %username,
                error = %err
            );
            JoinOutcome::Unavailable(
                AppError::from(err)
                    .with_context("operation", "join")
                    .with_context("code", code.to_string()),
            )
        }
    }
}

/// Delete a household; members, chores, and their histories cascade.
pub async fn delete_household(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query("DELETE FROM households WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    let deleted = res.rows_affected() > 0;
    if deleted {
        info!(target: "chorehub", event = "household_deleted", id);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use regex::Regex;

    /// Either the 6-char base36 draw or the 8-char hex fallback.
    static CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:[A-Z0-9]{6}|[0-9A-F]{8})$").expect("join code pattern to compile")
    });

    #[test]
    fn generated_codes_match_the_published_shape() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(CODE_PATTERN.is_match(&code), "bad code: {code}");
        }
    }

    #[test]
    fn fallback_shape_is_accepted_by_the_pattern() {
        let fallback = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
        assert!(CODE_PATTERN.is_match(&fallback));
    }

    #[test]
    fn shape_excludes_lowercase_and_garbage() {
        assert!(!CODE_PATTERN.is_match("abc123"));
        assert!(!CODE_PATTERN.is_match("ABC12"));
        assert!(!CODE_PATTERN.is_match("ABC-123"));
        assert!(!CODE_PATTERN.is_match(""));
    }
}
