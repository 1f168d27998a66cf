use avs_admin::routes::api_routes;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::{Extension, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

fn app(pool: PgPool) -> Router {
    Router::new().merge(api_routes()).layer(Extension(pool))
}

fn token(user_id: i32, role: &str) -> String {
    std::env::set_var("JWT_SECRET", "secret");
    let claims = serde_json::json!({
        "sub": user_id,
        "role": role,
        "exp": 9_999_999_999u64,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap()
}

fn request(method: Method, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed_user(pool: &PgPool, email: &str, is_superuser: bool) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, is_superuser) VALUES ($1, 'hashed', $2) RETURNING id",
    )
    .bind(email)
    .bind(is_superuser)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_plan(pool: &PgPool, name: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO plans (name, price, duration_days) VALUES ($1, 29.99, 30) RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn plan_delete_deactivates_when_subscribed(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin = seed_user(&pool, "admin@example.com", true).await;
    let subscriber = seed_user(&pool, "subscriber@example.com", false).await;
    let busy_plan = seed_plan(&pool, "Busy").await;
    let idle_plan = seed_plan(&pool, "Idle").await;

    sqlx::query(
        "INSERT INTO subscriptions (user_id, plan_id, start_date, end_date, payment_amount) \
         VALUES ($1, $2, NOW(), NOW() + INTERVAL '30 days', 29.99)",
    )
    .bind(subscriber)
    .bind(busy_plan)
    .execute(&pool)
    .await
    .unwrap();

    let admin_token = token(admin, "admin");

    // subscribed plan is demoted to inactive, not removed
    let response = app(pool.clone())
        .oneshot(request(
            Method::DELETE,
            &format!("/api/plans/{}", busy_plan),
            &admin_token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("deactivated"));
    assert_eq!(body["plan"]["is_active"], Value::Bool(false));
    let still_there: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM plans WHERE id = $1")
            .bind(busy_plan)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(still_there, 1);

    // unreferenced plan is removed outright
    let response = app(pool.clone())
        .oneshot(request(
            Method::DELETE,
            &format!("/api/plans/{}", idle_plan),
            &admin_token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Plan deleted successfully");
    let gone: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans WHERE id = $1")
        .bind(idle_plan)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(gone, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admins_cannot_deactivate_or_delete_themselves(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin = seed_user(&pool, "admin@example.com", true).await;
    let other = seed_user(&pool, "other@example.com", false).await;
    let admin_token = token(admin, "admin");

    let response = app(pool.clone())
        .oneshot(request(
            Method::POST,
            &format!("/api/users/{}/deactivate", admin),
            &admin_token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(pool.clone())
        .oneshot(request(
            Method::DELETE,
            &format!("/api/users/{}", admin),
            &admin_token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // other accounts can still be deactivated
    let response = app(pool.clone())
        .oneshot(request(
            Method::POST,
            &format!("/api/users/{}/deactivate", other),
            &admin_token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["user"]["is_active"], Value::Bool(false));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_endpoints_reject_ordinary_users(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user = seed_user(&pool, "plain@example.com", false).await;
    let user_token = token(user, "user");

    for uri in [
        "/api/users",
        "/api/subscriptions",
        "/api/usage/analytics",
        "/api/dashboard/admin",
        "/api/billing/revenue/summary",
    ] {
        let response = app(pool.clone())
            .oneshot(request(Method::GET, uri, &user_token, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "expected 403 for {}", uri);
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn owners_read_their_own_subscription_and_others_are_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool, "owner@example.com", false).await;
    let stranger = seed_user(&pool, "stranger@example.com", false).await;
    let plan = seed_plan(&pool, "Solo").await;
    let subscription_id: i32 = sqlx::query_scalar(
        "INSERT INTO subscriptions (user_id, plan_id, start_date, end_date, payment_amount) \
         VALUES ($1, $2, NOW(), NOW() + INTERVAL '30 days', 29.99) RETURNING id",
    )
    .bind(owner)
    .bind(plan)
    .fetch_one(&pool)
    .await
    .unwrap();

    let response = app(pool.clone())
        .oneshot(request(
            Method::GET,
            &format!("/api/subscriptions/{}", subscription_id),
            &token(owner, "user"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(pool.clone())
        .oneshot(request(
            Method::GET,
            &format!("/api/subscriptions/{}", subscription_id),
            &token(stranger, "user"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn duplicate_call_id_is_a_validation_error(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user = seed_user(&pool, "calls@example.com", false).await;
    let user_token = token(user, "user");
    let payload = serde_json::json!({
        "user_id": user,
        "call_id": "dup-call",
        "start_time": (Utc::now() - Duration::minutes(5)).to_rfc3339(),
        "status": "initiated",
        "caller_number": "+111",
        "destination_number": "+999",
        "call_type": "inbound",
    });

    let response = app(pool.clone())
        .oneshot(request(Method::POST, "/api/usage", &user_token, Some(payload.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(pool.clone())
        .oneshot(request(Method::POST, "/api/usage", &user_token, Some(payload)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
