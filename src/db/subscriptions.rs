use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};

use super::month_start;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub payment_status: String,
    pub payment_amount: f64,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// A subscription grants service while its active flag is set and its
    /// end date lies in the future.
    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_date > now
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription<'a> {
    pub user_id: i32,
    pub plan_id: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub payment_status: &'a str,
    pub payment_amount: f64,
    pub payment_method: Option<&'a str>,
    pub payment_id: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub user_id: Option<i32>,
    pub plan_id: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub payment_status: Option<String>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
}

pub async fn get<'c, E>(executor: E, id: i32) -> Result<Option<SubscriptionRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SubscriptionRecord>("SELECT * FROM subscriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn insert<'c, E>(
    executor: E,
    subscription: NewSubscription<'_>,
) -> Result<SubscriptionRecord, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SubscriptionRecord>(
        "INSERT INTO subscriptions \
         (user_id, plan_id, start_date, end_date, is_active, payment_status, payment_amount, payment_method, payment_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(subscription.user_id)
    .bind(subscription.plan_id)
    .bind(subscription.start_date)
    .bind(subscription.end_date)
    .bind(subscription.is_active)
    .bind(subscription.payment_status)
    .bind(subscription.payment_amount)
    .bind(subscription.payment_method)
    .bind(subscription.payment_id)
    .fetch_one(executor)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: i32,
    patch: SubscriptionPatch,
) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE subscriptions SET updated_at = NOW()");
    if let Some(user_id) = patch.user_id {
        builder.push(", user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(plan_id) = patch.plan_id {
        builder.push(", plan_id = ");
        builder.push_bind(plan_id);
    }
    if let Some(start_date) = patch.start_date {
        builder.push(", start_date = ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = patch.end_date {
        builder.push(", end_date = ");
        builder.push_bind(end_date);
    }
    if let Some(is_active) = patch.is_active {
        builder.push(", is_active = ");
        builder.push_bind(is_active);
    }
    if let Some(payment_status) = patch.payment_status {
        builder.push(", payment_status = ");
        builder.push_bind(payment_status);
    }
    if let Some(payment_amount) = patch.payment_amount {
        builder.push(", payment_amount = ");
        builder.push_bind(payment_amount);
    }
    if let Some(payment_method) = patch.payment_method {
        builder.push(", payment_method = ");
        builder.push_bind(payment_method);
    }
    if let Some(payment_id) = patch.payment_id {
        builder.push(", payment_id = ");
        builder.push_bind(payment_id);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING *");
    builder
        .build_query_as::<SubscriptionRecord>()
        .fetch_optional(pool)
        .await
}

/// The user's effectively-active subscription, if any.
pub async fn active_for_user<'c, E>(
    executor: E,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Option<SubscriptionRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SubscriptionRecord>(
        "SELECT * FROM subscriptions \
         WHERE user_id = $1 AND is_active = TRUE AND end_date > $2 \
         LIMIT 1",
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(executor)
    .await
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: i32,
    skip: i64,
    limit: i64,
) -> Result<Vec<SubscriptionRecord>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRecord>(
        "SELECT * FROM subscriptions WHERE user_id = $1 \
         ORDER BY created_at DESC OFFSET $2 LIMIT $3",
    )
    .bind(user_id)
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(pool)
        .await
}

pub async fn count_created_between(
    pool: &PgPool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) -> Result<i64, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) AS count FROM subscriptions WHERE TRUE");
    if let Some(start_date) = start_date {
        builder.push(" AND created_at >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = end_date {
        builder.push(" AND created_at <= ");
        builder.push_bind(end_date);
    }
    let row = builder.build().fetch_one(pool).await?;
    Ok(row.get("count"))
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub user_id: Option<i32>,
    pub user_email: Option<String>,
    pub plan_name: Option<String>,
    pub payment_status: Option<String>,
    pub is_active: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionUserSummary {
    pub id: i32,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionPlanSummary {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionDetail {
    pub id: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub payment_status: String,
    pub payment_amount: f64,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: SubscriptionUserSummary,
    pub plan: SubscriptionPlanSummary,
    pub is_expired: bool,
    pub days_remaining: i64,
}

fn map_detail_row(row: &PgRow, now: DateTime<Utc>) -> SubscriptionDetail {
    let end_date: DateTime<Utc> = row.get("end_date");
    SubscriptionDetail {
        id: row.get("id"),
        start_date: row.get("start_date"),
        end_date,
        is_active: row.get("is_active"),
        payment_status: row.get("payment_status"),
        payment_amount: row.get("payment_amount"),
        payment_method: row.get("payment_method"),
        payment_id: row.get("payment_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        user: SubscriptionUserSummary {
            id: row.get("u_id"),
            email: row.get("u_email"),
            full_name: row.get("u_full_name"),
        },
        plan: SubscriptionPlanSummary {
            id: row.get("p_id"),
            name: row.get("p_name"),
            price: row.get("p_price"),
            duration_days: row.get("p_duration_days"),
            max_calls: row.get("p_max_calls"),
            max_minutes: row.get("p_max_minutes"),
        },
        is_expired: end_date <= now,
        days_remaining: if end_date > now { (end_date - now).num_days() } else { 0 },
    }
}

/// Filtered page of subscriptions joined with user and plan details.
/// `is_active` filters on the effective-active predicate, not the raw flag.
pub async fn list_detailed(
    pool: &PgPool,
    filter: SubscriptionFilter,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionDetail>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT s.*, u.id AS u_id, u.email AS u_email, u.full_name AS u_full_name, \
                p.id AS p_id, p.name AS p_name, p.price AS p_price, p.duration_days AS p_duration_days, \
                p.max_calls AS p_max_calls, p.max_minutes AS p_max_minutes \
         FROM subscriptions s \
         JOIN users u ON u.id = s.user_id \
         JOIN plans p ON p.id = s.plan_id \
         WHERE TRUE",
    );
    if let Some(user_id) = filter.user_id {
        builder.push(" AND s.user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(user_email) = filter.user_email.as_ref() {
        builder.push(" AND u.email ILIKE ");
        builder.push_bind(format!("%{}%", user_email));
    }
    if let Some(plan_name) = filter.plan_name.as_ref() {
        builder.push(" AND p.name ILIKE ");
        builder.push_bind(format!("%{}%", plan_name));
    }
    if let Some(payment_status) = filter.payment_status.as_ref() {
        builder.push(" AND s.payment_status = ");
        builder.push_bind(payment_status);
    }
    match filter.is_active {
        Some(true) => {
            builder.push(" AND s.is_active = TRUE AND s.end_date > ");
            builder.push_bind(now);
        }
        Some(false) => {
            builder.push(" AND (s.is_active = FALSE OR s.end_date <= ");
            builder.push_bind(now);
            builder.push(")");
        }
        None => {}
    }
    if let Some(start_date) = filter.start_date {
        builder.push(" AND s.created_at >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = filter.end_date {
        builder.push(" AND s.created_at <= ");
        builder.push_bind(end_date);
    }
    builder.push(" ORDER BY s.created_at DESC OFFSET ");
    builder.push_bind(filter.skip);
    builder.push(" LIMIT ");
    builder.push_bind(filter.limit);

    let rows = builder.build().fetch_all(pool).await?;
    Ok(rows.iter().map(|row| map_detail_row(row, now)).collect())
}

/// Effectively-active subscriptions ending within `days_ahead` days,
/// soonest first.
pub async fn expiring(
    pool: &PgPool,
    days_ahead: i64,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionRecord>, sqlx::Error> {
    let horizon = now + chrono::Duration::days(days_ahead);
    sqlx::query_as::<_, SubscriptionRecord>(
        "SELECT * FROM subscriptions \
         WHERE is_active = TRUE AND end_date > $1 AND end_date <= $2 \
         ORDER BY end_date ASC LIMIT $3",
    )
    .bind(now)
    .bind(horizon)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Serialize)]
pub struct PlanRevenue {
    pub count: i64,
    pub revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct RevenueStats {
    pub total_revenue: f64,
    pub total_subscriptions: i64,
    pub average_revenue_per_subscription: f64,
    pub plan_breakdown: BTreeMap<String, PlanRevenue>,
}

/// Revenue over completed payments in an optional `created_at` window.
/// Aggregates over zero rows yield zeros, never missing values.
pub async fn revenue_stats(
    pool: &PgPool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) -> Result<RevenueStats, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT COALESCE(SUM(payment_amount), 0) AS total_revenue, COUNT(*) AS total_subscriptions \
         FROM subscriptions WHERE payment_status = 'completed'",
    );
    if let Some(start_date) = start_date {
        builder.push(" AND created_at >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = end_date {
        builder.push(" AND created_at <= ");
        builder.push_bind(end_date);
    }
    let row = builder.build().fetch_one(pool).await?;
    let total_revenue: f64 = row.get("total_revenue");
    let total_subscriptions: i64 = row.get("total_subscriptions");

    let mut builder = QueryBuilder::new(
        "SELECT p.name, COUNT(*) AS count, COALESCE(SUM(s.payment_amount), 0) AS revenue \
         FROM subscriptions s JOIN plans p ON p.id = s.plan_id \
         WHERE s.payment_status = 'completed'",
    );
    if let Some(start_date) = start_date {
        builder.push(" AND s.created_at >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = end_date {
        builder.push(" AND s.created_at <= ");
        builder.push_bind(end_date);
    }
    builder.push(" GROUP BY p.name");
    let rows = builder.build().fetch_all(pool).await?;
    let plan_breakdown = rows
        .into_iter()
        .map(|row| {
            (
                row.get::<String, _>("name"),
                PlanRevenue { count: row.get("count"), revenue: row.get("revenue") },
            )
        })
        .collect();

    let average_revenue_per_subscription = if total_subscriptions > 0 {
        total_revenue / total_subscriptions as f64
    } else {
        0.0
    };
    Ok(RevenueStats {
        total_revenue,
        total_subscriptions,
        average_revenue_per_subscription,
        plan_breakdown,
    })
}

#[derive(Debug, Serialize)]
pub struct SubscriptionAnalytics {
    pub total_subscriptions: i64,
    pub active_subscriptions: i64,
    pub expired_subscriptions: i64,
    pub monthly_revenue: f64,
    pub total_revenue: f64,
    pub conversion_rate: f64,
}

pub async fn analytics(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<SubscriptionAnalytics, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE is_active = TRUE AND end_date > $1) AS active, \
                COUNT(*) FILTER (WHERE is_active = FALSE OR end_date <= $1) AS expired, \
                COALESCE(SUM(payment_amount) FILTER (WHERE payment_status = 'completed' AND created_at >= $2), 0) AS monthly_revenue, \
                COALESCE(SUM(payment_amount) FILTER (WHERE payment_status = 'completed'), 0) AS total_revenue \
         FROM subscriptions",
    )
    .bind(now)
    .bind(month_start(now))
    .fetch_one(pool)
    .await?;
    let total: i64 = row.get("total");
    let active: i64 = row.get("active");
    Ok(SubscriptionAnalytics {
        total_subscriptions: total,
        active_subscriptions: active,
        expired_subscriptions: row.get("expired"),
        monthly_revenue: row.get("monthly_revenue"),
        total_revenue: row.get("total_revenue"),
        conversion_rate: if total > 0 { active as f64 / total as f64 * 100.0 } else { 0.0 },
    })
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthlySubscriptions {
    pub year: i32,
    pub month: i32,
    pub count: i64,
    pub revenue: f64,
}

/// Completed subscriptions bucketed by calendar month of creation.
pub async fn by_month(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<MonthlySubscriptions>, sqlx::Error> {
    sqlx::query_as::<_, MonthlySubscriptions>(
        "SELECT EXTRACT(YEAR FROM created_at)::int AS year, \
                EXTRACT(MONTH FROM created_at)::int AS month, \
                COUNT(*) AS count, \
                COALESCE(SUM(payment_amount), 0) AS revenue \
         FROM subscriptions \
         WHERE created_at >= $1 AND payment_status = 'completed' \
         GROUP BY 1, 2 ORDER BY 1, 2",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodStat {
    pub payment_method: String,
    pub transaction_count: i64,
    pub total_amount: f64,
}

/// Completed payments grouped by method; a missing method reports as
/// "Unknown".
pub async fn payment_method_stats(pool: &PgPool) -> Result<Vec<PaymentMethodStat>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT payment_method, COUNT(*) AS count, COALESCE(SUM(payment_amount), 0) AS total_amount \
         FROM subscriptions WHERE payment_status = 'completed' \
         GROUP BY payment_method",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| PaymentMethodStat {
            payment_method: row
                .get::<Option<String>, _>("payment_method")
                .unwrap_or_else(|| "Unknown".to_string()),
            transaction_count: row.get("count"),
            total_amount: row.get("total_amount"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn effective_active_requires_flag_and_future_end() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut sub = SubscriptionRecord {
            id: 1,
            user_id: 1,
            plan_id: 1,
            start_date: now - chrono::Duration::days(10),
            end_date: now + chrono::Duration::days(20),
            is_active: true,
            payment_status: "completed".into(),
            payment_amount: 29.99,
            payment_method: None,
            payment_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(sub.is_effectively_active(now));
        sub.is_active = false;
        assert!(!sub.is_effectively_active(now));
        sub.is_active = true;
        sub.end_date = now;
        assert!(!sub.is_effectively_active(now));
    }
}
