use anyhow::Result;
use chorehub::migrate;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

async fn table_names(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

#[tokio::test]
async fn migrations_create_the_full_schema() -> Result<()> {
    let pool = memory_pool().await?;
    migrate::apply_migrations(&pool).await?;

    let names = table_names(&pool).await?;
    for expected in ["households", "members", "chores", "chore_histories"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }

    let unique_indexes = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='index' AND sql LIKE 'CREATE UNIQUE%'",
    )
    .fetch_all(&pool)
    .await?;
    assert!(unique_indexes.iter().any(|n| n == "households_code_idx"));
    assert!(unique_indexes
        .iter()
        .any(|n| n == "members_household_username_idx"));
    Ok(())
}

#[tokio::test]
async fn reapplying_is_a_no_op() -> Result<()> {
    let pool = memory_pool().await?;
    migrate::apply_migrations(&pool).await?;
    migrate::apply_migrations(&pool).await?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(applied as usize, migrate::MIGRATIONS.len());
    Ok(())
}

#[tokio::test]
async fn edited_applied_migration_is_rejected() -> Result<()> {
    let pool = memory_pool().await?;
    migrate::apply_migrations(&pool).await?;

    sqlx::query("UPDATE schema_migrations SET checksum = 'deadbeef' WHERE version = ?")
        .bind(migrate::MIGRATIONS[0].0)
        .execute(&pool)
        .await?;

    let err = migrate::apply_migrations(&pool)
        .await
        .expect_err("checksum mismatch should fail");
    assert!(err.to_string().contains("edited after application"));
    Ok(())
}
