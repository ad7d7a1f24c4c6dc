use anyhow::Result;
use chorehub::{
    add_chore, add_chore_history, create_household, get_chore_history, join_household, migrate,
    NewChoreHistory,
};
use chorehub::time::now_ms;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    migrate::apply_migrations(&pool).await?;
    Ok(pool)
}

#[tokio::test]
async fn explicit_append_records_member_attribution() -> Result<()> {
    let pool = memory_pool().await?;
    let household = create_household(&pool, "Flat 3B", "paula").await?;
    let chore = add_chore(&pool, household.id, "Dishes", None, None).await?;
    let member = join_household(&pool, &household.code, "finn").await;
    let member = member.member().expect("finn joins").clone();

    let entry = add_chore_history(
        &pool,
        &NewChoreHistory {
            chore_id: chore.id,
            member_id: Some(member.id),
            member_name: Some(member.username.clone()),
            notes: Some("also wiped the counters".into()),
            done_at: Some(1_700_000_000_000),
        },
    )
    .await?;

    assert_eq!(entry.member_id, Some(member.id));
    assert_eq!(entry.member_name.as_deref(), Some("finn"));
    assert_eq!(entry.done_at, 1_700_000_000_000);
    assert_eq!(entry.notes.as_deref(), Some("also wiped the counters"));
    Ok(())
}

#[tokio::test]
async fn done_at_defaults_to_now() -> Result<()> {
    let pool = memory_pool().await?;
    let household = create_household(&pool, "Flat 3B", "paula").await?;
    let chore = add_chore(&pool, household.id, "Dishes", None, None).await?;

    let before = now_ms();
    let entry = add_chore_history(
        &pool,
        &NewChoreHistory {
            chore_id: chore.id,
            ..Default::default()
        },
    )
    .await?;
    let after = now_ms();

    assert!((before..=after).contains(&entry.done_at));
    assert_eq!(entry.member_id, None);
    Ok(())
}

#[tokio::test]
async fn history_is_ordered_newest_first() -> Result<()> {
    let pool = memory_pool().await?;
    let household = create_household(&pool, "Flat 3B", "paula").await?;
    let chore = add_chore(&pool, household.id, "Dishes", None, None).await?;

    for done_at in [1_000, 3_000, 2_000] {
        add_chore_history(
            &pool,
            &NewChoreHistory {
                chore_id: chore.id,
                done_at: Some(done_at),
                ..Default::default()
            },
        )
        .await?;
    }

    let history = get_chore_history(&pool, chore.id).await?;
    let times: Vec<i64> = history.iter().map(|h| h.done_at).collect();
    assert_eq!(times, vec![3_000, 2_000, 1_000]);
    Ok(())
}

#[tokio::test]
async fn history_is_scoped_to_the_chore() -> Result<()> {
    let pool = memory_pool().await?;
    let household = create_household(&pool, "Flat 3B", "paula").await?;
    let dishes = add_chore(&pool, household.id, "Dishes", None, None).await?;
    let bins = add_chore(&pool, household.id, "Bins", None, None).await?;

    add_chore_history(
        &pool,
        &NewChoreHistory {
            chore_id: dishes.id,
            ..Default::default()
        },
    )
    .await?;

    assert_eq!(get_chore_history(&pool, dishes.id).await?.len(), 1);
    assert!(get_chore_history(&pool, bins.id).await?.is_empty());
    Ok(())
}
