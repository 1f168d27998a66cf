use avs_admin::billing::{BillingService, CreateSubscriptionInput};
use avs_admin::db;
use avs_admin::error::AppError;
use chrono::{Duration, TimeZone, Utc};
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

async fn seed_plan(pool: &PgPool, name: &str, price: f64, duration_days: i32) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO plans (name, price, duration_days) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(price)
    .bind(duration_days)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn create_input(user_id: i32, plan_id: i32, amount: f64) -> CreateSubscriptionInput {
    CreateSubscriptionInput {
        user_id,
        plan_id,
        start_date: None,
        end_date: None,
        is_active: None,
        payment_status: None,
        payment_amount: amount,
        payment_method: None,
        payment_id: None,
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn end_date_defaults_to_start_plus_plan_duration(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "starter@example.com").await;
    let plan_id = seed_plan(&pool, "Starter", 9.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let subscription = service
        .create_subscription(create_input(user_id, plan_id, 9.99), now)
        .await
        .unwrap();

    assert_eq!(subscription.start_date, now);
    assert_eq!(subscription.end_date, now + Duration::days(30));
    assert_eq!(subscription.payment_status, "pending");
    assert!(subscription.is_active);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn second_active_subscription_is_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "double@example.com").await;
    let plan_id = seed_plan(&pool, "Basic", 29.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let first = service
        .create_subscription(create_input(user_id, plan_id, 29.99), now)
        .await
        .unwrap();

    let second = service
        .create_subscription(create_input(user_id, plan_id, 29.99), now)
        .await;
    assert!(matches!(second, Err(AppError::BadRequest(_))));

    // the original subscription is untouched
    let unchanged = db::subscriptions::get(&pool, first.id).await.unwrap().unwrap();
    assert_eq!(unchanged.end_date, first.end_date);
    assert!(unchanged.is_active);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn inactive_or_missing_plan_is_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "noplan@example.com").await;
    let plan_id = seed_plan(&pool, "Retired", 19.99, 30).await;
    sqlx::query("UPDATE plans SET is_active = FALSE WHERE id = $1")
        .bind(plan_id)
        .execute(&pool)
        .await
        .unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let inactive = service
        .create_subscription(create_input(user_id, plan_id, 19.99), now)
        .await;
    assert!(matches!(inactive, Err(AppError::BadRequest(_))));

    let missing = service
        .create_subscription(create_input(user_id, 999_999, 19.99), now)
        .await;
    assert!(matches!(missing, Err(AppError::NotFound("Plan"))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_is_idempotent(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "cancel@example.com").await;
    let plan_id = seed_plan(&pool, "Monthly", 29.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let subscription = service
        .create_subscription(create_input(user_id, plan_id, 29.99), now)
        .await
        .unwrap();

    let first = service.cancel_subscription(subscription.id).await.unwrap();
    assert!(!first.is_active);

    let second = service.cancel_subscription(subscription.id).await.unwrap();
    assert!(!second.is_active);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn renewal_never_shrinks_coverage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "renew@example.com").await;
    let plan_id = seed_plan(&pool, "Pro", 79.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let subscription = service
        .create_subscription(create_input(user_id, plan_id, 79.99), now)
        .await
        .unwrap();

    // renewing mid-term extends from the current end date
    let later = now + Duration::days(10);
    let renewed = service
        .renew_subscription(subscription.id, 79.99, Some("pay_renew_1"), later)
        .await
        .unwrap();
    assert_eq!(renewed.end_date, subscription.end_date + Duration::days(30));
    assert_eq!(renewed.payment_status, "completed");
    assert!(renewed.is_active);

    // renewing after a lapse extends from now instead
    let long_after = renewed.end_date + Duration::days(90);
    let renewed_again = service
        .renew_subscription(subscription.id, 79.99, None, long_after)
        .await
        .unwrap();
    assert_eq!(renewed_again.end_date, long_after + Duration::days(30));
    assert!(renewed_again.end_date >= renewed.end_date);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn refund_only_applies_to_completed_payments(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "refund@example.com").await;
    let plan_id = seed_plan(&pool, "Enterprise", 199.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let subscription = service
        .create_subscription(create_input(user_id, plan_id, 199.99), now)
        .await
        .unwrap();

    // still pending: refusal
    let denied = service.refund_subscription(subscription.id, None).await;
    assert!(matches!(denied, Err(AppError::BadRequest(_))));

    service
        .renew_subscription(subscription.id, 199.99, None, now)
        .await
        .unwrap();

    let (refunded, amount) = service
        .refund_subscription(subscription.id, None)
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, "refunded");
    assert!(!refunded.is_active);
    assert_eq!(amount, 199.99);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn process_payment_creates_completed_subscription(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "gateway@example.com").await;
    let plan_id = seed_plan(&pool, "Gateway", 49.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();

    let service = BillingService::new(pool.clone());
    let (subscription, payment_id) = service
        .process_payment(user_id, plan_id, "card", now)
        .await
        .unwrap();
    assert_eq!(subscription.payment_status, "completed");
    assert_eq!(subscription.payment_amount, 49.99);
    assert_eq!(subscription.payment_id.as_deref(), Some(payment_id.as_str()));
    assert!(payment_id.starts_with("pay_20240601093000_"));

    // a second purchase while covered is refused
    let again = service.process_payment(user_id, plan_id, "card", now).await;
    assert!(matches!(again, Err(AppError::BadRequest(_))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn expiring_query_orders_by_soonest_end(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let plan_id = seed_plan(&pool, "Window", 9.99, 30).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    for (email, days) in [("soon@example.com", 2), ("later@example.com", 6), ("far@example.com", 20)] {
        let user_id = seed_user(&pool, email).await;
        sqlx::query(
            "INSERT INTO subscriptions (user_id, plan_id, start_date, end_date, payment_amount) \
             VALUES ($1, $2, $3, $4, 9.99)",
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(now - chrono::Duration::days(28))
        .bind(now + chrono::Duration::days(days))
        .execute(&pool)
        .await
        .unwrap();
    }

    let expiring = db::subscriptions::expiring(&pool, 7, 100, now).await.unwrap();
    assert_eq!(expiring.len(), 2);
    assert!(expiring[0].end_date <= expiring[1].end_date);
}
