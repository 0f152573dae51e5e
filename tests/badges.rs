//! Points and badge awards against a real Postgres.

mod common;

use anyhow::Result;
use iskonnect::badges::{AwardError, BadgeRepo, EarnedBadge, award_points};
use sqlx::{PgPool, Row};

async fn insert_student(pool: &PgPool, id: &str, points: i32) -> Result<()> {
    let email = format!("{}@up.edu.ph", id.to_lowercase());
    sqlx::query("INSERT INTO credentials (id, email, password_hash) VALUES ($1, $2, 'x')")
        .bind(id)
        .bind(&email)
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO profiles (id, first_name, last_name, email, points, email_verified)
         VALUES ($1, 'Test', 'Student', $2, $3, TRUE)",
    )
    .bind(id)
    .bind(&email)
    .bind(points)
    .execute(pool)
    .await?;
    Ok(())
}

async fn points_of(pool: &PgPool, id: &str) -> Result<i32> {
    let row = sqlx::query("SELECT points FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("points")?)
}

#[tokio::test]
async fn awards_and_badges() -> Result<()> {
    let Some(db) = common::start_database().await? else {
        return Ok(());
    };
    let pool = &db.pool;

    concurrent_awards_sum(pool).await?;
    crossing_a_threshold_grants_once(pool).await?;
    invalid_awards_change_nothing(pool).await?;
    Ok(())
}

async fn concurrent_awards_sum(pool: &PgPool) -> Result<()> {
    let id = "2021-00001-MN-0";
    insert_student(pool, id, 0).await?;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            award_points(&pool, "2021-00001-MN-0", 5).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    assert_eq!(points_of(pool, id).await?, 50);

    // 0, 25 and 50 point badges, each held exactly once.
    let earned = BadgeRepo::earned_by(pool, id).await?;
    let names: Vec<&str> = earned.iter().map(|e| e.badge.name.as_str()).collect();
    assert_eq!(names.len(), 3, "{names:?}");
    assert!(names.contains(&"Freshie Fighter"));
    assert!(names.contains(&"Sophomore Scholar"));
    assert!(names.contains(&"Dean's Defender"));
    Ok(())
}

async fn hold_badges_up_to(pool: &PgPool, id: &str, points: i32) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_badges (user_id, badge_id, awarded_date)
         SELECT $1, id, NOW() - INTERVAL '1 day' FROM badges WHERE requirement_points <= $2",
    )
    .bind(id)
    .bind(points)
    .execute(pool)
    .await?;
    Ok(())
}

fn awarded_date(earned: &[EarnedBadge], name: &str) -> Option<String> {
    earned
        .iter()
        .find(|e| e.badge.name == name)
        .map(|e| e.awarded_date.clone())
}

async fn crossing_a_threshold_grants_once(pool: &PgPool) -> Result<()> {
    let id = "2021-00002-MN-0";
    insert_student(pool, id, 45).await?;
    hold_badges_up_to(pool, id, 45).await?;
    let before = BadgeRepo::earned_by(pool, id).await?;
    assert_eq!(before.len(), 2);
    let freshie_since = awarded_date(&before, "Freshie Fighter");
    assert!(freshie_since.is_some());

    // 45 -> 50 only adds the 50 point badge; held badges are not re-awarded.
    let outcome = award_points(pool, id, 5).await?;
    assert_eq!(outcome.points, 50);
    assert_eq!(outcome.badge_names(), vec!["Dean's Defender"]);

    let earned = BadgeRepo::earned_by(pool, id).await?;
    assert_eq!(earned.len(), 3);
    assert_eq!(awarded_date(&earned, "Freshie Fighter"), freshie_since);

    let outcome = award_points(pool, id, 5).await?;
    assert_eq!(outcome.points, 55);
    assert!(outcome.new_badges.is_empty());
    assert_eq!(BadgeRepo::earned_by(pool, id).await?.len(), 3);
    Ok(())
}

async fn invalid_awards_change_nothing(pool: &PgPool) -> Result<()> {
    let id = "2021-00003-MN-0";
    insert_student(pool, id, 10).await?;

    assert!(matches!(
        award_points(pool, id, 0).await,
        Err(AwardError::InvalidDelta(0))
    ));
    assert!(matches!(
        award_points(pool, "2099-99999-ZZ-9", 5).await,
        Err(AwardError::UserNotFound)
    ));
    assert_eq!(points_of(pool, id).await?, 10);
    assert!(BadgeRepo::earned_by(pool, id).await?.is_empty());

    let catalog = BadgeRepo::catalog(pool).await?;
    assert_eq!(catalog.len(), 5);
    Ok(())
}
