use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlanRecord {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanRecord {
    /// Parsed feature map. Malformed or non-object payloads degrade to an
    /// empty map rather than failing the read.
    pub fn features_map(&self) -> Map<String, Value> {
        self.features
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewPlan<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlanPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub duration_days: Option<i32>,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn get<'c, E>(executor: E, id: i32) -> Result<Option<PlanRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, PlanRecord>("SELECT * FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<PlanRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlanRecord>("SELECT * FROM plans WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &PgPool, skip: i64, limit: i64) -> Result<Vec<PlanRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlanRecord>(
        "SELECT * FROM plans ORDER BY created_at DESC OFFSET $1 LIMIT $2",
    )
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_active(pool: &PgPool) -> Result<Vec<PlanRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlanRecord>(
        "SELECT * FROM plans WHERE is_active = TRUE ORDER BY price ASC",
    )
    .fetch_all(pool)
    .await
}

pub async fn insert(pool: &PgPool, plan: NewPlan<'_>) -> Result<PlanRecord, sqlx::Error> {
    sqlx::query_as::<_, PlanRecord>(
        "INSERT INTO plans (name, description, price, duration_days, max_calls, max_minutes, features, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(plan.name)
    .bind(plan.description)
    .bind(plan.price)
    .bind(plan.duration_days)
    .bind(plan.max_calls)
    .bind(plan.max_minutes)
    .bind(plan.features)
    .bind(plan.is_active)
    .fetch_one(pool)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: i32,
    patch: PlanPatch,
) -> Result<Option<PlanRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE plans SET updated_at = NOW()");
    if let Some(name) = patch.name {
        builder.push(", name = ");
        builder.push_bind(name);
    }
    if let Some(description) = patch.description {
        builder.push(", description = ");
        builder.push_bind(description);
    }
    if let Some(price) = patch.price {
        builder.push(", price = ");
        builder.push_bind(price);
    }
    if let Some(duration_days) = patch.duration_days {
        builder.push(", duration_days = ");
        builder.push_bind(duration_days);
    }
    if let Some(max_calls) = patch.max_calls {
        builder.push(", max_calls = ");
        builder.push_bind(max_calls);
    }
    if let Some(max_minutes) = patch.max_minutes {
        builder.push(", max_minutes = ");
        builder.push_bind(max_minutes);
    }
    if let Some(features) = patch.features {
        builder.push(", features = ");
        builder.push_bind(features);
    }
    if let Some(is_active) = patch.is_active {
        builder.push(", is_active = ");
        builder.push_bind(is_active);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING *");
    builder
        .build_query_as::<PlanRecord>()
        .fetch_optional(pool)
        .await
}

pub async fn set_active(
    pool: &PgPool,
    id: i32,
    is_active: bool,
) -> Result<Option<PlanRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlanRecord>(
        "UPDATE plans SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(is_active)
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM plans")
        .fetch_one(pool)
        .await
}

/// Number of effectively-active subscriptions still referencing the plan.
/// Gates hard deletion.
pub async fn count_active_subscriptions(
    pool: &PgPool,
    plan_id: i32,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscriptions \
         WHERE plan_id = $1 AND is_active = TRUE AND end_date > $2",
    )
    .bind(plan_id)
    .bind(now)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Serialize)]
pub struct PlanWithFeatures {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Map<String, Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PlanRecord> for PlanWithFeatures {
    fn from(plan: PlanRecord) -> Self {
        let features = plan.features_map();
        PlanWithFeatures {
            id: plan.id,
            name: plan.name,
            description: plan.description,
            price: plan.price,
            duration_days: plan.duration_days,
            max_calls: plan.max_calls,
            max_minutes: plan.max_minutes,
            features,
            is_active: plan.is_active,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanStats {
    pub total_subscriptions: i64,
    pub active_subscriptions: i64,
    pub total_revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct PlanWithStats {
    #[serde(flatten)]
    pub plan: PlanWithFeatures,
    pub stats: PlanStats,
}

/// All plans with subscription counts and completed revenue attached.
pub async fn list_with_stats(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<PlanWithStats>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT p.*, \
                (SELECT COUNT(*) FROM subscriptions s WHERE s.plan_id = p.id) AS total_subscriptions, \
                (SELECT COUNT(*) FROM subscriptions s \
                  WHERE s.plan_id = p.id AND s.is_active = TRUE AND s.end_date > $1) AS active_subscriptions, \
                (SELECT COALESCE(SUM(s.payment_amount), 0) FROM subscriptions s \
                  WHERE s.plan_id = p.id AND s.payment_status = 'completed') AS total_revenue \
         FROM plans p ORDER BY p.created_at DESC",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let plan = PlanRecord {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                price: row.get("price"),
                duration_days: row.get("duration_days"),
                max_calls: row.get("max_calls"),
                max_minutes: row.get("max_minutes"),
                features: row.get("features"),
                is_active: row.get("is_active"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            PlanWithStats {
                stats: PlanStats {
                    total_subscriptions: row.get("total_subscriptions"),
                    active_subscriptions: row.get("active_subscriptions"),
                    total_revenue: row.get("total_revenue"),
                },
                plan: plan.into(),
            }
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct PopularPlan {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Map<String, Value>,
    pub active_subscriptions: i64,
}

/// Active plans ranked by effectively-active subscription count.
pub async fn popular(
    pool: &PgPool,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<PopularPlan>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT p.*, COUNT(s.id) AS subscription_count \
         FROM plans p JOIN subscriptions s ON s.plan_id = p.id \
         WHERE s.is_active = TRUE AND s.end_date > $1 AND p.is_active = TRUE \
         GROUP BY p.id ORDER BY COUNT(s.id) DESC LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let plan = PlanRecord {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                price: row.get("price"),
                duration_days: row.get("duration_days"),
                max_calls: row.get("max_calls"),
                max_minutes: row.get("max_minutes"),
                features: row.get("features"),
                is_active: row.get("is_active"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            PopularPlan {
                active_subscriptions: row.get("subscription_count"),
                features: plan.features_map(),
                id: plan.id,
                name: plan.name,
                description: plan.description,
                price: plan.price,
                duration_days: plan.duration_days,
                max_calls: plan.max_calls,
                max_minutes: plan.max_minutes,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn plan_with_features(raw: Option<&str>) -> PlanRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PlanRecord {
            id: 1,
            name: "Starter".into(),
            description: None,
            price: 9.99,
            duration_days: 30,
            max_calls: Some(25),
            max_minutes: Some(100),
            features: raw.map(str::to_string),
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn features_parse_into_map() {
        let plan = plan_with_features(Some(r#"{"api_access": false, "concurrent_calls": 1}"#));
        let map = plan.features_map();
        assert_eq!(map.get("api_access"), Some(&Value::Bool(false)));
        assert_eq!(map.get("concurrent_calls"), Some(&Value::from(1)));
    }

    #[test]
    fn malformed_features_degrade_to_empty_map() {
        assert!(plan_with_features(Some("not json")).features_map().is_empty());
        assert!(plan_with_features(Some("[1, 2]")).features_map().is_empty());
        assert!(plan_with_features(None).features_map().is_empty());
    }
}
