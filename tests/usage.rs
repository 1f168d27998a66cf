use avs_admin::db;
use chrono::{TimeZone, Utc};
use sqlx::PgPool;

async fn seed_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ($1, 'hashed') RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn monthly_stats_over_empty_month_yield_zeros(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "quiet@example.com").await;

    let stats = db::usage::monthly_stats(&pool, user_id, 2024, 3)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.total_calls, 0);
    assert_eq!(stats.total_duration, 0.0);
    assert_eq!(stats.avg_duration, 0.0);
    assert_eq!(stats.unique_callers, 0);
    assert!(stats.call_type_breakdown.is_empty());
    assert!(stats.status_breakdown.is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn monthly_stats_bucket_by_half_open_window(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "caller@example.com").await;

    let in_month = [
        ("call-1", "2024-06-03T10:00:00Z", Some(120.0), "completed", "inbound", "+111"),
        ("call-2", "2024-06-10T15:00:00Z", Some(300.0), "completed", "outbound", "+222"),
        ("call-3", "2024-06-20T08:00:00Z", None, "failed", "inbound", "+111"),
    ];
    for (call_id, start, duration, status, call_type, caller) in in_month {
        sqlx::query(
            "INSERT INTO usage (user_id, call_id, start_time, duration, status, caller_number, destination_number, call_type) \
             VALUES ($1, $2, $3::timestamptz, $4, $5, $6, '+999', $7)",
        )
        .bind(user_id)
        .bind(call_id)
        .bind(start)
        .bind(duration)
        .bind(status)
        .bind(caller)
        .bind(call_type)
        .execute(&pool)
        .await
        .unwrap();
    }
    // first instant of July falls outside June's window
    sqlx::query(
        "INSERT INTO usage (user_id, call_id, start_time, duration, status, caller_number, destination_number, call_type) \
         VALUES ($1, 'call-next-month', '2024-07-01T00:00:00Z', 60, 'completed', '+333', '+999', 'inbound')",
    )
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();

    let stats = db::usage::monthly_stats(&pool, user_id, 2024, 6)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.total_calls, 3);
    assert_eq!(stats.total_duration, 420.0);
    assert_eq!(stats.total_duration_minutes, 7.0);
    assert_eq!(stats.unique_callers, 2);

    let inbound = &stats.call_type_breakdown["inbound"];
    assert_eq!(inbound.count, 2);
    assert_eq!(inbound.duration, 120.0);
    let outbound = &stats.call_type_breakdown["outbound"];
    assert_eq!(outbound.count, 1);
    assert_eq!(outbound.duration, 300.0);

    assert_eq!(stats.status_breakdown["completed"], 2);
    assert_eq!(stats.status_breakdown["failed"], 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invalid_month_is_detected_before_querying(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "badmonth@example.com").await;
    assert!(db::usage::monthly_stats(&pool, user_id, 2024, 13)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn ending_a_call_removes_it_from_active_calls(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "live@example.com").await;
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

    sqlx::query(
        "INSERT INTO usage (user_id, call_id, start_time, status, caller_number, destination_number, call_type) \
         VALUES ($1, 'live-call', $2, 'initiated', '+111', '+999', 'inbound')",
    )
    .bind(user_id)
    .bind(start)
    .execute(&pool)
    .await
    .unwrap();

    let active = db::usage::active_calls(&pool).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].call_id, "live-call");

    let ended = db::usage::end_call(
        &pool,
        "live-call",
        start + chrono::Duration::seconds(120),
        120.0,
        "completed",
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(ended.status, "completed");
    assert_eq!(ended.duration, Some(120.0));
    assert!(ended.end_time.is_some());

    assert!(db::usage::active_calls(&pool).await.unwrap().is_empty());

    // the closed call reports two minutes in the joined listing
    let details = db::usage::list_detailed(
        &pool,
        db::usage::UsageFilter { limit: 10, ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].duration_minutes, 2.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn system_analytics_cover_totals_and_top_users(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let busy = seed_user(&pool, "busy@example.com").await;
    let idle = seed_user(&pool, "idle@example.com").await;
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();

    for i in 0..3 {
        sqlx::query(
            "INSERT INTO usage (user_id, call_id, start_time, duration, status, caller_number, destination_number, call_type) \
             VALUES ($1, $2, $3, 60, 'completed', '+111', '+999', 'outbound')",
        )
        .bind(busy)
        .bind(format!("busy-{}", i))
        .bind(now - chrono::Duration::days(i))
        .execute(&pool)
        .await
        .unwrap();
    }
    sqlx::query(
        "INSERT INTO usage (user_id, call_id, start_time, duration, status, caller_number, destination_number, call_type) \
         VALUES ($1, 'idle-0', $2, 30, 'completed', '+222', '+999', 'inbound')",
    )
    .bind(idle)
    .bind(now)
    .execute(&pool)
    .await
    .unwrap();

    let analytics = db::usage::system_analytics(&pool, None, None, now).await.unwrap();
    assert_eq!(analytics.overall.total_calls, 4);
    assert_eq!(analytics.overall.total_duration, 210.0);
    assert_eq!(analytics.overall.active_users, 2);
    assert!(!analytics.daily_volume.is_empty());
    assert_eq!(analytics.top_users[0].email, "busy@example.com");
    assert_eq!(analytics.top_users[0].total_calls, 3);
}
