use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};

use super::{month_bounds, round2};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub id: i32,
    pub user_id: i32,
    pub call_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub status: String,
    pub caller_number: String,
    pub destination_number: String,
    pub call_type: String,
    pub call_summary: Option<String>,
    pub recording_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsage<'a> {
    pub user_id: i32,
    pub call_id: &'a str,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub status: &'a str,
    pub caller_number: &'a str,
    pub destination_number: &'a str,
    pub call_type: &'a str,
    pub call_summary: Option<&'a str>,
    pub recording_url: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct UsagePatch {
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub status: Option<String>,
    pub caller_number: Option<String>,
    pub destination_number: Option<String>,
    pub call_type: Option<String>,
    pub call_summary: Option<String>,
    pub recording_url: Option<String>,
}

pub async fn get<'c, E>(executor: E, id: i32) -> Result<Option<UsageRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageRecord>("SELECT * FROM usage WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_call_id<'c, E>(
    executor: E,
    call_id: &str,
) -> Result<Option<UsageRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageRecord>("SELECT * FROM usage WHERE call_id = $1")
        .bind(call_id)
        .fetch_optional(executor)
        .await
}

pub async fn insert(pool: &PgPool, usage: NewUsage<'_>) -> Result<UsageRecord, sqlx::Error> {
    sqlx::query_as::<_, UsageRecord>(
        "INSERT INTO usage \
         (user_id, call_id, start_time, end_time, duration, status, caller_number, destination_number, call_type, call_summary, recording_url) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
    )
    .bind(usage.user_id)
    .bind(usage.call_id)
    .bind(usage.start_time)
    .bind(usage.end_time)
    .bind(usage.duration)
    .bind(usage.status)
    .bind(usage.caller_number)
    .bind(usage.destination_number)
    .bind(usage.call_type)
    .bind(usage.call_summary)
    .bind(usage.recording_url)
    .fetch_one(pool)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: i32,
    patch: UsagePatch,
) -> Result<Option<UsageRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE usage SET updated_at = NOW()");
    if let Some(end_time) = patch.end_time {
        builder.push(", end_time = ");
        builder.push_bind(end_time);
    }
    if let Some(duration) = patch.duration {
        builder.push(", duration = ");
        builder.push_bind(duration);
    }
    if let Some(status) = patch.status {
        builder.push(", status = ");
        builder.push_bind(status);
    }
    if let Some(caller_number) = patch.caller_number {
        builder.push(", caller_number = ");
        builder.push_bind(caller_number);
    }
    if let Some(destination_number) = patch.destination_number {
        builder.push(", destination_number = ");
        builder.push_bind(destination_number);
    }
    if let Some(call_type) = patch.call_type {
        builder.push(", call_type = ");
        builder.push_bind(call_type);
    }
    if let Some(call_summary) = patch.call_summary {
        builder.push(", call_summary = ");
        builder.push_bind(call_summary);
    }
    if let Some(recording_url) = patch.recording_url {
        builder.push(", recording_url = ");
        builder.push_bind(recording_url);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING *");
    builder
        .build_query_as::<UsageRecord>()
        .fetch_optional(pool)
        .await
}

pub async fn delete(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM usage WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM usage")
        .fetch_one(pool)
        .await
}

/// Call count and total duration across all users since an instant.
pub async fn totals_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<(i64, f64), sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS calls, COALESCE(SUM(duration), 0) AS duration \
         FROM usage WHERE start_time >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok((row.get("calls"), row.get("duration")))
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: i32,
    skip: i64,
    limit: i64,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) -> Result<Vec<UsageRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM usage WHERE user_id = ");
    builder.push_bind(user_id);
    if let Some(start_date) = start_date {
        builder.push(" AND start_time >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = end_date {
        builder.push(" AND start_time <= ");
        builder.push_bind(end_date);
    }
    builder.push(" ORDER BY start_time DESC OFFSET ");
    builder.push_bind(skip);
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    builder.build_query_as::<UsageRecord>().fetch_all(pool).await
}

#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub user_email: Option<String>,
    pub call_status: Option<String>,
    pub call_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct UsageUserSummary {
    pub id: i32,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UsageDetail {
    pub id: i32,
    pub call_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub status: String,
    pub caller_number: String,
    pub destination_number: String,
    pub call_type: String,
    pub call_summary: Option<String>,
    pub recording_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user: UsageUserSummary,
    pub duration_minutes: f64,
}

/// Filtered page of usage records joined with the owning user.
pub async fn list_detailed(
    pool: &PgPool,
    filter: UsageFilter,
) -> Result<Vec<UsageDetail>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT g.*, u.id AS u_id, u.email AS u_email, u.full_name AS u_full_name \
         FROM usage g JOIN users u ON u.id = g.user_id WHERE TRUE",
    );
    if let Some(user_email) = filter.user_email.as_ref() {
        builder.push(" AND u.email ILIKE ");
        builder.push_bind(format!("%{}%", user_email));
    }
    if let Some(call_status) = filter.call_status.as_ref() {
        builder.push(" AND g.status = ");
        builder.push_bind(call_status);
    }
    if let Some(call_type) = filter.call_type.as_ref() {
        builder.push(" AND g.call_type = ");
        builder.push_bind(call_type);
    }
    if let Some(start_date) = filter.start_date {
        builder.push(" AND g.start_time >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = filter.end_date {
        builder.push(" AND g.start_time <= ");
        builder.push_bind(end_date);
    }
    builder.push(" ORDER BY g.start_time DESC OFFSET ");
    builder.push_bind(filter.skip);
    builder.push(" LIMIT ");
    builder.push_bind(filter.limit);

    let rows = builder.build().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let duration: Option<f64> = row.get("duration");
            UsageDetail {
                id: row.get("id"),
                call_id: row.get("call_id"),
                start_time: row.get("start_time"),
                end_time: row.get("end_time"),
                duration,
                status: row.get("status"),
                caller_number: row.get("caller_number"),
                destination_number: row.get("destination_number"),
                call_type: row.get("call_type"),
                call_summary: row.get("call_summary"),
                recording_url: row.get("recording_url"),
                created_at: row.get("created_at"),
                user: UsageUserSummary {
                    id: row.get("u_id"),
                    email: row.get("u_email"),
                    full_name: row.get("u_full_name"),
                },
                duration_minutes: duration.map(|d| round2(d / 60.0)).unwrap_or(0.0),
            }
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct CallTypeStats {
    pub count: i64,
    pub duration: f64,
    pub duration_minutes: f64,
}

#[derive(Debug, Serialize)]
pub struct MonthlyUsage {
    pub year: i32,
    pub month: u32,
    pub total_calls: i64,
    pub total_duration: f64,
    pub total_duration_minutes: f64,
    pub avg_duration: f64,
    pub avg_duration_minutes: f64,
    pub unique_callers: i64,
    pub call_type_breakdown: BTreeMap<String, CallTypeStats>,
    pub status_breakdown: BTreeMap<String, i64>,
}

/// Usage statistics for one user over the half-open month window
/// [first of month, first of next month). Returns `None` for an invalid
/// month. Zero matching records yield zero totals and empty breakdowns.
pub async fn monthly_stats(
    pool: &PgPool,
    user_id: i32,
    year: i32,
    month: u32,
) -> Result<Option<MonthlyUsage>, sqlx::Error> {
    let Some((window_start, window_end)) = month_bounds(year, month) else {
        return Ok(None);
    };

    let totals = sqlx::query(
        "SELECT COUNT(*) AS total_calls, \
                COALESCE(SUM(duration), 0) AS total_duration, \
                COALESCE(AVG(duration), 0) AS avg_duration, \
                COUNT(DISTINCT caller_number) AS unique_callers \
         FROM usage WHERE user_id = $1 AND start_time >= $2 AND start_time < $3",
    )
    .bind(user_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_one(pool)
    .await?;

    let call_type_rows = sqlx::query(
        "SELECT call_type, COUNT(*) AS count, COALESCE(SUM(duration), 0) AS duration \
         FROM usage WHERE user_id = $1 AND start_time >= $2 AND start_time < $3 \
         GROUP BY call_type",
    )
    .bind(user_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;
    let call_type_breakdown = call_type_rows
        .into_iter()
        .map(|row| {
            let duration: f64 = row.get("duration");
            (
                row.get::<String, _>("call_type"),
                CallTypeStats {
                    count: row.get("count"),
                    duration,
                    duration_minutes: round2(duration / 60.0),
                },
            )
        })
        .collect();

    let status_rows = sqlx::query(
        "SELECT status, COUNT(*) AS count \
         FROM usage WHERE user_id = $1 AND start_time >= $2 AND start_time < $3 \
         GROUP BY status",
    )
    .bind(user_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;
    let status_breakdown = status_rows
        .into_iter()
        .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("count")))
        .collect();

    let total_duration: f64 = totals.get("total_duration");
    let avg_duration: f64 = totals.get("avg_duration");
    Ok(Some(MonthlyUsage {
        year,
        month,
        total_calls: totals.get("total_calls"),
        total_duration,
        total_duration_minutes: round2(total_duration / 60.0),
        avg_duration,
        avg_duration_minutes: round2(avg_duration / 60.0),
        unique_callers: totals.get("unique_callers"),
        call_type_breakdown,
        status_breakdown,
    }))
}

#[derive(Debug, Serialize)]
pub struct OverallUsage {
    pub total_calls: i64,
    pub total_duration: f64,
    pub total_duration_hours: f64,
    pub avg_duration: f64,
    pub avg_duration_minutes: f64,
    pub active_users: i64,
}

#[derive(Debug, Serialize)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub calls: i64,
    pub duration: f64,
    pub duration_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct HourlyCalls {
    pub hour: i32,
    pub calls: i64,
}

#[derive(Debug, Serialize)]
pub struct TopUser {
    pub email: String,
    pub full_name: Option<String>,
    pub total_calls: i64,
    pub total_duration: f64,
    pub total_duration_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct UsageAnalytics {
    pub overall: OverallUsage,
    pub daily_volume: Vec<DailyVolume>,
    pub hourly_distribution: Vec<HourlyCalls>,
    pub top_users: Vec<TopUser>,
}

fn push_window(
    builder: &mut QueryBuilder<'_, Postgres>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) {
    if let Some(start_date) = start_date {
        builder.push(" AND g.start_time >= ");
        builder.push_bind(start_date);
    }
    if let Some(end_date) = end_date {
        builder.push(" AND g.start_time <= ");
        builder.push_bind(end_date);
    }
}

/// System-wide analytics over an optional date window (all time when
/// absent). The daily series is always the 30 days leading up to `now`.
pub async fn system_analytics(
    pool: &PgPool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<UsageAnalytics, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT COUNT(*) AS total_calls, \
                COALESCE(SUM(g.duration), 0) AS total_duration, \
                COALESCE(AVG(g.duration), 0) AS avg_duration, \
                COUNT(DISTINCT g.user_id) AS active_users \
         FROM usage g WHERE TRUE",
    );
    push_window(&mut builder, start_date, end_date);
    let row = builder.build().fetch_one(pool).await?;
    let total_duration: f64 = row.get("total_duration");
    let avg_duration: f64 = row.get("avg_duration");
    let overall = OverallUsage {
        total_calls: row.get("total_calls"),
        total_duration,
        total_duration_hours: round2(total_duration / 3600.0),
        avg_duration,
        avg_duration_minutes: round2(avg_duration / 60.0),
        active_users: row.get("active_users"),
    };

    let thirty_days_ago = now - chrono::Duration::days(30);
    let daily_rows = sqlx::query(
        "SELECT start_time::date AS date, COUNT(*) AS calls, COALESCE(SUM(duration), 0) AS duration \
         FROM usage WHERE start_time >= $1 \
         GROUP BY 1 ORDER BY 1",
    )
    .bind(thirty_days_ago)
    .fetch_all(pool)
    .await?;
    let daily_volume = daily_rows
        .into_iter()
        .map(|row| {
            let duration: f64 = row.get("duration");
            DailyVolume {
                date: row.get("date"),
                calls: row.get("calls"),
                duration,
                duration_hours: round2(duration / 3600.0),
            }
        })
        .collect();

    let mut builder = QueryBuilder::new(
        "SELECT EXTRACT(HOUR FROM g.start_time)::int AS hour, COUNT(*) AS calls \
         FROM usage g WHERE TRUE",
    );
    push_window(&mut builder, start_date, end_date);
    builder.push(" GROUP BY 1 ORDER BY 1");
    let hourly_rows = builder.build().fetch_all(pool).await?;
    let hourly_distribution = hourly_rows
        .into_iter()
        .map(|row| HourlyCalls { hour: row.get("hour"), calls: row.get("calls") })
        .collect();

    let mut builder = QueryBuilder::new(
        "SELECT u.email, u.full_name, COUNT(*) AS total_calls, \
                COALESCE(SUM(g.duration), 0) AS total_duration \
         FROM usage g JOIN users u ON u.id = g.user_id WHERE TRUE",
    );
    push_window(&mut builder, start_date, end_date);
    builder.push(" GROUP BY u.id, u.email, u.full_name ORDER BY COUNT(*) DESC LIMIT 10");
    let top_rows = builder.build().fetch_all(pool).await?;
    let top_users = top_rows
        .into_iter()
        .map(|row| {
            let total_duration: f64 = row.get("total_duration");
            TopUser {
                email: row.get("email"),
                full_name: row.get("full_name"),
                total_calls: row.get("total_calls"),
                total_duration,
                total_duration_hours: round2(total_duration / 3600.0),
            }
        })
        .collect();

    Ok(UsageAnalytics { overall, daily_volume, hourly_distribution, top_users })
}

/// Calls still in flight: no end time yet and a non-terminal status.
pub async fn active_calls(pool: &PgPool) -> Result<Vec<UsageRecord>, sqlx::Error> {
    sqlx::query_as::<_, UsageRecord>(
        "SELECT * FROM usage \
         WHERE end_time IS NULL AND status IN ('initiated', 'connected') \
         ORDER BY start_time DESC",
    )
    .fetch_all(pool)
    .await
}

/// Closes a call: end time, duration, and terminal status land together.
pub async fn end_call(
    pool: &PgPool,
    call_id: &str,
    end_time: DateTime<Utc>,
    duration: f64,
    status: &str,
) -> Result<Option<UsageRecord>, sqlx::Error> {
    sqlx::query_as::<_, UsageRecord>(
        "UPDATE usage SET end_time = $2, duration = $3, status = $4, updated_at = NOW() \
         WHERE call_id = $1 RETURNING *",
    )
    .bind(call_id)
    .bind(end_time)
    .bind(duration)
    .bind(status)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthlyCallVolume {
    pub year: i32,
    pub month: i32,
    pub calls: i64,
    pub duration: f64,
}

pub async fn by_month(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<MonthlyCallVolume>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyCallVolume>(
        "SELECT EXTRACT(YEAR FROM start_time)::int AS year, \
                EXTRACT(MONTH FROM start_time)::int AS month, \
                COUNT(*) AS calls, \
                COALESCE(SUM(duration), 0) AS duration \
         FROM usage WHERE start_time >= $1 \
         GROUP BY 1, 2 ORDER BY 1, 2",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

