use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};

use super::month_start;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: Option<&'a str>,
    pub is_active: bool,
    pub is_superuser: bool,
}

/// Merge-patch for a stored user. Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

pub async fn get<'c, E>(executor: E, id: i32) -> Result<Option<UserRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_email<'c, E>(
    executor: E,
    email: &str,
) -> Result<Option<UserRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await
}

pub async fn list(pool: &PgPool, skip: i64, limit: i64) -> Result<Vec<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(
        "SELECT * FROM users ORDER BY created_at DESC OFFSET $1 LIMIT $2",
    )
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn insert<'c, E>(executor: E, user: NewUser<'_>) -> Result<UserRecord, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRecord>(
        "INSERT INTO users (email, password_hash, full_name, is_active, is_superuser) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.full_name)
    .bind(user.is_active)
    .bind(user.is_superuser)
    .fetch_one(executor)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: i32,
    patch: UserPatch,
) -> Result<Option<UserRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE users SET updated_at = NOW()");
    if let Some(email) = patch.email {
        builder.push(", email = ");
        builder.push_bind(email);
    }
    if let Some(password_hash) = patch.password_hash {
        builder.push(", password_hash = ");
        builder.push_bind(password_hash);
    }
    if let Some(full_name) = patch.full_name {
        builder.push(", full_name = ");
        builder.push_bind(full_name);
    }
    if let Some(is_active) = patch.is_active {
        builder.push(", is_active = ");
        builder.push_bind(is_active);
    }
    if let Some(is_superuser) = patch.is_superuser {
        builder.push(", is_superuser = ");
        builder.push_bind(is_superuser);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING *");
    builder
        .build_query_as::<UserRecord>()
        .fetch_optional(pool)
        .await
}

/// Removes the user; subscriptions and usage cascade at the schema level.
pub async fn delete(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
}

pub async fn count_active(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
        .fetch_one(pool)
        .await
}

#[derive(Debug, Serialize)]
pub struct ActiveSubscriptionSummary {
    pub id: i32,
    pub plan_name: String,
    pub end_date: DateTime<Utc>,
    pub payment_status: String,
}

#[derive(Debug, Serialize)]
pub struct MonthCallStats {
    pub total_calls: i64,
    pub total_duration: f64,
}

#[derive(Debug, Serialize)]
pub struct UserWithStats {
    pub id: i32,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_subscription: Option<ActiveSubscriptionSummary>,
    pub current_month_stats: MonthCallStats,
}

/// Page of users with their active subscription and current-month call
/// stats attached. `search` matches email or name, case-insensitively.
pub async fn list_with_stats(
    pool: &PgPool,
    search: Option<&str>,
    is_active: Option<bool>,
    skip: i64,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<UserWithStats>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM users WHERE TRUE");
    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (email ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR full_name ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    if let Some(is_active) = is_active {
        builder.push(" AND is_active = ");
        builder.push_bind(is_active);
    }
    builder.push(" ORDER BY created_at DESC OFFSET ");
    builder.push_bind(skip);
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    let users = builder.build_query_as::<UserRecord>().fetch_all(pool).await?;

    let window_start = month_start(now);
    let mut result = Vec::with_capacity(users.len());
    for user in users {
        let active_subscription = active_subscription_summary(pool, user.id, now).await?;
        let current_month_stats = call_stats_since(pool, user.id, Some(window_start)).await?;
        result.push(UserWithStats {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            created_at: user.created_at,
            updated_at: user.updated_at,
            active_subscription,
            current_month_stats,
        });
    }
    Ok(result)
}

async fn active_subscription_summary(
    pool: &PgPool,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Option<ActiveSubscriptionSummary>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT s.id, s.end_date, s.payment_status, p.name AS plan_name \
         FROM subscriptions s JOIN plans p ON p.id = s.plan_id \
         WHERE s.user_id = $1 AND s.is_active = TRUE AND s.end_date > $2 \
         LIMIT 1",
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| ActiveSubscriptionSummary {
        id: row.get("id"),
        plan_name: row.get("plan_name"),
        end_date: row.get("end_date"),
        payment_status: row.get("payment_status"),
    }))
}

async fn call_stats_since(
    pool: &PgPool,
    user_id: i32,
    since: Option<DateTime<Utc>>,
) -> Result<MonthCallStats, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT COUNT(*) AS total_calls, COALESCE(SUM(duration), 0) AS total_duration \
         FROM usage WHERE user_id = ",
    );
    builder.push_bind(user_id);
    if let Some(since) = since {
        builder.push(" AND start_time >= ");
        builder.push_bind(since);
    }
    let row = builder.build().fetch_one(pool).await?;
    Ok(MonthCallStats {
        total_calls: row.get("total_calls"),
        total_duration: row.get("total_duration"),
    })
}

#[derive(Debug, Serialize)]
pub struct DashboardUser {
    pub id: i32,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DashboardSubscription {
    pub id: i32,
    pub plan_name: String,
    pub plan_price: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub payment_status: String,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CurrentMonthUsage {
    pub total_calls: i64,
    pub total_duration: f64,
    pub remaining_calls: Option<i64>,
    pub remaining_minutes: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct UserDashboardStats {
    pub user: DashboardUser,
    pub active_subscription: Option<DashboardSubscription>,
    pub current_month_usage: CurrentMonthUsage,
    pub all_time_usage: MonthCallStats,
}

/// Per-user dashboard aggregates: profile, active subscription with plan
/// caps, current-month usage with remaining allowances, all-time usage.
pub async fn dashboard_stats(
    pool: &PgPool,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Option<UserDashboardStats>, sqlx::Error> {
    let Some(user) = get(pool, user_id).await? else {
        return Ok(None);
    };

    let subscription_row = sqlx::query(
        "SELECT s.id, s.start_date, s.end_date, s.payment_status, \
                p.name AS plan_name, p.price AS plan_price, p.max_calls, p.max_minutes \
         FROM subscriptions s JOIN plans p ON p.id = s.plan_id \
         WHERE s.user_id = $1 AND s.is_active = TRUE AND s.end_date > $2 \
         LIMIT 1",
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    let active_subscription = subscription_row.map(|row| DashboardSubscription {
        id: row.get("id"),
        plan_name: row.get("plan_name"),
        plan_price: row.get("plan_price"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        payment_status: row.get("payment_status"),
        max_calls: row.get("max_calls"),
        max_minutes: row.get("max_minutes"),
    });

    let month_stats = call_stats_since(pool, user_id, Some(month_start(now))).await?;
    let all_time_usage = call_stats_since(pool, user_id, None).await?;

    let remaining_calls = active_subscription
        .as_ref()
        .and_then(|s| s.max_calls)
        .map(|max| i64::from(max) - month_stats.total_calls);
    let remaining_minutes = active_subscription
        .as_ref()
        .and_then(|s| s.max_minutes)
        .map(|max| f64::from(max) - month_stats.total_duration / 60.0);

    Ok(Some(UserDashboardStats {
        user: DashboardUser {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            created_at: user.created_at,
        },
        active_subscription,
        current_month_usage: CurrentMonthUsage {
            total_calls: month_stats.total_calls,
            total_duration: month_stats.total_duration,
            remaining_calls,
            remaining_minutes,
        },
        all_time_usage,
    }))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthlyRegistrations {
    pub year: i32,
    pub month: i32,
    pub count: i64,
}

pub async fn registrations_by_month(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<MonthlyRegistrations>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyRegistrations>(
        "SELECT EXTRACT(YEAR FROM created_at)::int AS year, \
                EXTRACT(MONTH FROM created_at)::int AS month, \
                COUNT(*) AS count \
         FROM users WHERE created_at >= $1 \
         GROUP BY 1, 2 ORDER BY 1, 2",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}
