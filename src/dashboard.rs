use axum::{
    extract::Extension,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::db;
use crate::db::users::DashboardSubscription;
use crate::db::{month_start, round2};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/dashboard/admin", get(read_admin_dashboard))
        .route("/api/dashboard/user", get(read_user_dashboard))
        .route("/api/dashboard/stats/overview", get(read_overview_stats))
        .route("/api/dashboard/stats/growth", get(read_growth_stats))
}

/// Composite admin view. Sub-queries that find nothing contribute zeros
/// and empty lists; they never fail the whole response.
pub async fn read_admin_dashboard(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let now = Utc::now();

    let subscription_analytics = db::subscriptions::analytics(&pool, now).await?;
    let usage_analytics =
        db::usage::system_analytics(&pool, Some(now - Duration::days(30)), Some(now), now).await?;
    let monthly_revenue =
        db::subscriptions::revenue_stats(&pool, Some(month_start(now)), Some(now)).await?;

    let total_users = db::users::count(&pool).await?;
    let active_users = db::users::count_active(&pool).await?;

    let recent_subscriptions = db::subscriptions::list_detailed(
        &pool,
        db::subscriptions::SubscriptionFilter { limit: 5, ..Default::default() },
        now,
    )
    .await?;
    let recent_usage = db::usage::list_detailed(
        &pool,
        db::usage::UsageFilter { limit: 5, ..Default::default() },
    )
    .await?;

    let expiring_subscriptions = db::subscriptions::expiring(&pool, 7, 20, now).await?;
    let popular_plans = db::plans::popular(&pool, 5, now).await?;
    let active_calls = db::usage::active_calls(&pool).await?;

    Ok(Json(json!({
        "overview": {
            "total_users": total_users,
            "active_users": active_users,
            "total_subscriptions": subscription_analytics.total_subscriptions,
            "active_subscriptions": subscription_analytics.active_subscriptions,
            "monthly_revenue": monthly_revenue.total_revenue,
            "total_revenue": subscription_analytics.total_revenue,
            "active_calls": active_calls.len(),
        },
        "subscription_analytics": subscription_analytics,
        "usage_analytics": usage_analytics,
        "monthly_revenue": monthly_revenue,
        "recent_activity": {
            "subscriptions": recent_subscriptions,
            "usage": recent_usage,
        },
        "alerts": {
            "expiring_subscriptions": expiring_subscriptions.len(),
            "expiring_subscriptions_list": expiring_subscriptions,
        },
        "popular_plans": popular_plans,
        "active_calls": active_calls,
    })))
}

#[derive(Debug, Serialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub warning_type: &'static str,
    pub message: String,
    pub severity: &'static str,
}

/// Usage-limit and expiry warnings for the user dashboard. Thresholds:
/// 90% of a cap warns, 95% escalates; expiry within 7 days warns, within
/// 3 days escalates.
fn build_warnings(
    subscription: Option<&DashboardSubscription>,
    total_calls: i64,
    total_duration_secs: f64,
    now: DateTime<Utc>,
) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let Some(subscription) = subscription else {
        return warnings;
    };

    if let Some(max_calls) = subscription.max_calls.filter(|max| *max > 0) {
        let percentage = total_calls as f64 / f64::from(max_calls) * 100.0;
        if percentage >= 90.0 {
            warnings.push(Warning {
                warning_type: "calls_limit",
                message: format!(
                    "You've used {:.1}% of your monthly call limit",
                    percentage
                ),
                severity: if percentage >= 95.0 { "high" } else { "medium" },
            });
        }
    }

    if let Some(max_minutes) = subscription.max_minutes.filter(|max| *max > 0) {
        let minutes_used = total_duration_secs / 60.0;
        let percentage = minutes_used / f64::from(max_minutes) * 100.0;
        if percentage >= 90.0 {
            warnings.push(Warning {
                warning_type: "minutes_limit",
                message: format!(
                    "You've used {:.1}% of your monthly minutes limit",
                    percentage
                ),
                severity: if percentage >= 95.0 { "high" } else { "medium" },
            });
        }
    }

    let days_remaining = (subscription.end_date - now).num_days();
    if days_remaining <= 7 {
        warnings.push(Warning {
            warning_type: "subscription_expiry",
            message: format!("Your subscription expires in {} days", days_remaining),
            severity: if days_remaining <= 3 { "high" } else { "medium" },
        });
    }

    warnings
}

pub async fn read_user_dashboard(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Value>> {
    let now = Utc::now();
    let stats = db::users::dashboard_stats(&pool, user_id, now)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let recent_usage = db::usage::list_for_user(&pool, user_id, 0, 10, None, None).await?;
    let current_month_detailed =
        db::usage::monthly_stats(&pool, user_id, now.year(), now.month()).await?;

    let warnings = build_warnings(
        stats.active_subscription.as_ref(),
        stats.current_month_usage.total_calls,
        stats.current_month_usage.total_duration,
        now,
    );

    Ok(Json(json!({
        "user": stats.user,
        "active_subscription": stats.active_subscription,
        "current_month_usage": stats.current_month_usage,
        "all_time_usage": stats.all_time_usage,
        "recent_usage": recent_usage,
        "current_month_detailed": current_month_detailed,
        "warnings": warnings,
    })))
}

pub async fn read_overview_stats(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let now = Utc::now();

    let total_users = db::users::count(&pool).await?;
    let active_users = db::users::count_active(&pool).await?;
    let total_plans = db::plans::count(&pool).await?;
    let total_usage_records = db::usage::count(&pool).await?;
    let analytics = db::subscriptions::analytics(&pool, now).await?;
    let (monthly_calls, monthly_duration) =
        db::usage::totals_since(&pool, month_start(now)).await?;

    Ok(Json(json!({
        "users": {
            "total": total_users,
            "active": active_users,
            "inactive": total_users - active_users,
        },
        "plans": {
            "total": total_plans,
        },
        "subscriptions": {
            "total": analytics.total_subscriptions,
            "active": analytics.active_subscriptions,
            "expired": analytics.total_subscriptions - analytics.active_subscriptions,
        },
        "usage": {
            "total_records": total_usage_records,
            "monthly_calls": monthly_calls,
            "monthly_duration_hours": round2(monthly_duration / 3600.0),
        },
        "revenue": {
            "total": analytics.total_revenue,
            "monthly": analytics.monthly_revenue,
        },
    })))
}

/// Twelve-month registration, subscription, and usage series.
pub async fn read_growth_stats(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let now = Utc::now();
    let twelve_months_ago = now - Duration::days(365);

    let monthly_users = db::users::registrations_by_month(&pool, twelve_months_ago).await?;
    let monthly_subscriptions =
        db::subscriptions::by_month(&pool, twelve_months_ago).await?;
    let monthly_usage = db::usage::by_month(&pool, twelve_months_ago).await?;

    let monthly_usage: Vec<Value> = monthly_usage
        .into_iter()
        .map(|row| {
            json!({
                "year": row.year,
                "month": row.month,
                "calls": row.calls,
                "duration_hours": round2(row.duration / 3600.0),
            })
        })
        .collect();

    Ok(Json(json!({
        "monthly_users": monthly_users,
        "monthly_subscriptions": monthly_subscriptions,
        "monthly_usage": monthly_usage,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subscription(
        max_calls: Option<i32>,
        max_minutes: Option<i32>,
        end_date: DateTime<Utc>,
    ) -> DashboardSubscription {
        DashboardSubscription {
            id: 1,
            plan_name: "Basic".into(),
            plan_price: 29.99,
            start_date: end_date - Duration::days(30),
            end_date,
            payment_status: "completed".into(),
            max_calls,
            max_minutes,
        }
    }

    fn far_future(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::days(60)
    }

    #[test]
    fn no_subscription_means_no_warnings() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(build_warnings(None, 1000, 100000.0, now).is_empty());
    }

    #[test]
    fn call_limit_warning_thresholds() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let sub = subscription(Some(100), None, far_future(now));

        assert!(build_warnings(Some(&sub), 89, 0.0, now).is_empty());

        let warnings = build_warnings(Some(&sub), 90, 0.0, now);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, "calls_limit");
        assert_eq!(warnings[0].severity, "medium");

        let warnings = build_warnings(Some(&sub), 95, 0.0, now);
        assert_eq!(warnings[0].severity, "high");
    }

    #[test]
    fn minutes_limit_warning_uses_seconds_input() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let sub = subscription(None, Some(100), far_future(now));

        // 90 minutes of a 100-minute cap
        let warnings = build_warnings(Some(&sub), 0, 90.0 * 60.0, now);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, "minutes_limit");
        assert_eq!(warnings[0].severity, "medium");
    }

    #[test]
    fn expiry_warning_escalates_near_the_end() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let sub = subscription(None, None, now + Duration::days(6));
        let warnings = build_warnings(Some(&sub), 0, 0.0, now);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, "subscription_expiry");
        assert_eq!(warnings[0].severity, "medium");

        let sub = subscription(None, None, now + Duration::days(2));
        let warnings = build_warnings(Some(&sub), 0, 0.0, now);
        assert_eq!(warnings[0].severity, "high");
    }

    #[test]
    fn zero_caps_do_not_divide_by_zero() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let sub = subscription(Some(0), Some(0), far_future(now));
        assert!(build_warnings(Some(&sub), 10, 600.0, now).is_empty());
    }
}
