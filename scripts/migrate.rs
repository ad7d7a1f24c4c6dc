#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chorehub::migrate::MIGRATIONS;
use clap::{Parser, Subcommand};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
    Row, SqlitePool,
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(name = "migrate", about = "Chorehub migration helper")]
struct Cli {
    /// Optional explicit DB path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List migrations and show applied/pending
    #[command(about, long_about = None)]
    List,
    /// Show current migration status
    #[command(about, long_about = None)]
    Status,
    /// Apply pending migrations
    #[command(about, long_about = None)]
    Up,
}

#[tokio::main]
async fn main() -> Result<()> {
    chorehub::logging::init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or(default_db_path()?);

    match cli.cmd {
        Cmd::List => list(&db_path).await,
        Cmd::Status => status(&db_path).await,
        Cmd::Up => up(&db_path).await,
    }
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().unwrap_or(std::env::current_dir()?);
    Ok(base.join("chorehub").join("chorehub.sqlite3"))
}

/// Open without creating, for read-only inspection of an existing DB.
async fn open_existing(db: &Path) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .filename(db)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&pool)
        .await
        .ok();
    Ok(pool)
}

async fn applied_set(pool: &SqlitePool) -> Result<HashSet<String>> {
    let exists: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if exists.is_none() {
        return Ok(HashSet::new());
    }
    let rows = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|r| r.try_get::<String, _>("version").ok())
        .collect())
}

async fn list(db: &Path) -> Result<()> {
    let applied = if db.exists() {
        let pool = open_existing(db).await?;
        applied_set(&pool).await?
    } else {
        HashSet::new()
    };
    println!("DB: {}", db.display());
    for (filename, _sql) in MIGRATIONS {
        let state = if applied.contains(*filename) {
            "applied"
        } else {
            "pending"
        };
        println!("{:<44}  {}", filename, state);
    }
    Ok(())
}

async fn status(db: &Path) -> Result<()> {
    let applied = if db.exists() {
        let pool = open_existing(db).await?;
        applied_set(&pool).await?
    } else {
        HashSet::new()
    };
    let applied_count = MIGRATIONS
        .iter()
        .filter(|(filename, _)| applied.contains(*filename))
        .count();
    let head = MIGRATIONS
        .iter()
        .rev()
        .find(|(filename, _)| applied.contains(*filename))
        .map(|(filename, _)| *filename)
        .unwrap_or("<none>");
    println!("DB: {}", db.display());
    println!("Applied: {}/{}", applied_count, MIGRATIONS.len());
    println!("Head: {}", head);
    Ok(())
}

async fn up(db: &Path) -> Result<()> {
    let pool = chorehub::db::open_sqlite_pool(db).await?;
    let before = applied_set(&pool).await?;
    chorehub::migrate::apply_migrations(&pool).await?;
    let after = applied_set(&pool).await?;

    let newly: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(filename, _)| after.contains(*filename) && !before.contains(*filename))
        .map(|(filename, _)| *filename)
        .collect();
    if newly.is_empty() {
        println!("Nothing to apply.");
    } else {
        for filename in newly {
            println!("applied {}", filename);
        }
    }
    Ok(())
}
