use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db::{self, month_start, previous_month_start};
use crate::db::subscriptions::{NewSubscription, SubscriptionRecord};
use crate::error::{AppError, AppResult};

use super::models::{MonthRevenue, RevenueGrowth, RevenueSummary};

/// key: billing-service -> subscription lifecycle
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionInput {
    pub user_id: i32,
    pub plan_id: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub payment_status: Option<String>,
    pub payment_amount: f64,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a subscription. The plan must exist and be active, the user
    /// must exist, and the user must not already hold an effectively-active
    /// subscription. `end_date` defaults to the start plus the plan's
    /// duration. Runs in a single transaction.
    pub async fn create_subscription(
        &self,
        input: CreateSubscriptionInput,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await?;

        let plan = db::plans::get(&mut *tx, input.plan_id)
            .await?
            .ok_or(AppError::NotFound("Plan"))?;
        if !plan.is_active {
            return Err(AppError::BadRequest("Plan is not active".into()));
        }
        if db::users::get(&mut *tx, input.user_id).await?.is_none() {
            return Err(AppError::NotFound("User"));
        }
        if db::subscriptions::active_for_user(&mut *tx, input.user_id, now)
            .await?
            .is_some()
        {
            return Err(AppError::BadRequest(
                "User already has an active subscription".into(),
            ));
        }

        let start_date = input.start_date.unwrap_or(now);
        let end_date = input
            .end_date
            .unwrap_or(start_date + Duration::days(i64::from(plan.duration_days)));
        let subscription = db::subscriptions::insert(
            &mut *tx,
            NewSubscription {
                user_id: input.user_id,
                plan_id: input.plan_id,
                start_date,
                end_date,
                is_active: input.is_active.unwrap_or(true),
                payment_status: input.payment_status.as_deref().unwrap_or("pending"),
                payment_amount: input.payment_amount,
                payment_method: input.payment_method.as_deref(),
                payment_id: input.payment_id.as_deref(),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(subscription)
    }

    /// Payment-gateway placeholder: runs the same guards as creation and
    /// records a completed, active subscription priced at the plan's price.
    pub async fn process_payment(
        &self,
        user_id: i32,
        plan_id: i32,
        payment_method: &str,
        now: DateTime<Utc>,
    ) -> AppResult<(SubscriptionRecord, String)> {
        let mut tx = self.pool.begin().await?;

        let plan = db::plans::get(&mut *tx, plan_id)
            .await?
            .ok_or(AppError::NotFound("Plan"))?;
        if !plan.is_active {
            return Err(AppError::BadRequest("Plan is not active".into()));
        }
        if db::subscriptions::active_for_user(&mut *tx, user_id, now)
            .await?
            .is_some()
        {
            return Err(AppError::BadRequest(
                "User already has an active subscription".into(),
            ));
        }

        let payment_id = format!("pay_{}_{}", now.format("%Y%m%d%H%M%S"), user_id);
        let subscription = db::subscriptions::insert(
            &mut *tx,
            NewSubscription {
                user_id,
                plan_id,
                start_date: now,
                end_date: now + Duration::days(i64::from(plan.duration_days)),
                is_active: true,
                payment_status: "completed",
                payment_amount: plan.price,
                payment_method: Some(payment_method),
                payment_id: Some(&payment_id),
            },
        )
        .await?;
        tx.commit().await?;
        Ok((subscription, payment_id))
    }

    /// Deactivates the subscription. Idempotent: cancelling an already
    /// cancelled subscription succeeds without further effect.
    pub async fn cancel_subscription(&self, id: i32) -> AppResult<SubscriptionRecord> {
        sqlx::query_as::<_, SubscriptionRecord>(
            "UPDATE subscriptions SET is_active = FALSE, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Subscription"))
    }

    /// Extends coverage by one plan duration from `max(end_date, now)` and
    /// marks the payment completed. The plan never changes on renewal.
    pub async fn renew_subscription(
        &self,
        id: i32,
        payment_amount: f64,
        payment_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await?;

        let subscription = db::subscriptions::get(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound("Subscription"))?;
        let plan = db::plans::get(&mut *tx, subscription.plan_id)
            .await?
            .ok_or(AppError::NotFound("Plan"))?;

        let new_end = extended_end(subscription.end_date, now, plan.duration_days);
        let renewed = sqlx::query_as::<_, SubscriptionRecord>(
            "UPDATE subscriptions SET end_date = $2, is_active = TRUE, \
                    payment_status = 'completed', payment_amount = $3, payment_id = $4, \
                    updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(new_end)
        .bind(payment_amount)
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(renewed)
    }

    /// Marks a completed payment refunded and deactivates the subscription.
    /// The refund amount defaults to the recorded payment amount.
    pub async fn refund_subscription(
        &self,
        id: i32,
        refund_amount: Option<f64>,
    ) -> AppResult<(SubscriptionRecord, f64)> {
        let mut tx = self.pool.begin().await?;

        let subscription = db::subscriptions::get(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound("Subscription"))?;
        if subscription.payment_status != "completed" {
            return Err(AppError::BadRequest(
                "Can only refund completed payments".into(),
            ));
        }
        let amount = refund_amount.unwrap_or(subscription.payment_amount);
        let refunded = sqlx::query_as::<_, SubscriptionRecord>(
            "UPDATE subscriptions SET payment_status = 'refunded', is_active = FALSE, \
                    updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((refunded, amount))
    }

    /// Revenue roll-up: overall stats over the optional window plus
    /// current-month, previous-month, and month-over-month growth figures.
    pub async fn revenue_summary(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<RevenueSummary> {
        let overall = db::subscriptions::revenue_stats(&self.pool, start_date, end_date).await?;

        let current_start = month_start(now);
        let current =
            db::subscriptions::revenue_stats(&self.pool, Some(current_start), Some(now)).await?;
        let previous = db::subscriptions::revenue_stats(
            &self.pool,
            Some(previous_month_start(now)),
            Some(current_start),
        )
        .await?;

        Ok(RevenueSummary {
            total_revenue: overall.total_revenue,
            total_subscriptions: overall.total_subscriptions,
            average_revenue_per_subscription: overall.average_revenue_per_subscription,
            plan_breakdown: overall.plan_breakdown,
            current_month: MonthRevenue {
                revenue: current.total_revenue,
                subscriptions: current.total_subscriptions,
            },
            previous_month: MonthRevenue {
                revenue: previous.total_revenue,
                subscriptions: previous.total_subscriptions,
            },
            growth: RevenueGrowth {
                revenue_growth_rate: growth_rate(current.total_revenue, previous.total_revenue),
                revenue_difference: current.total_revenue - previous.total_revenue,
            },
        })
    }
}

/// Renewal never shrinks coverage: the new end extends from whichever is
/// later, the current end date or now.
fn extended_end(current_end: DateTime<Utc>, now: DateTime<Utc>, duration_days: i32) -> DateTime<Utc> {
    current_end.max(now) + Duration::days(i64::from(duration_days))
}

/// Month-over-month growth in percent, rounded to two decimals. Defined as
/// 0 when the previous month had no revenue.
fn growth_rate(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        ((current - previous) / previous * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renewal_extends_from_future_end_date() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        assert_eq!(extended_end(end, now, 30), end + Duration::days(30));
    }

    #[test]
    fn renewal_extends_from_now_when_lapsed() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(extended_end(end, now, 30), now + Duration::days(30));
    }

    #[test]
    fn growth_rate_handles_zero_previous_month() {
        assert_eq!(growth_rate(150.0, 0.0), 0.0);
        assert_eq!(growth_rate(0.0, 0.0), 0.0);
    }

    #[test]
    fn growth_rate_is_percentage_of_previous() {
        assert_eq!(growth_rate(150.0, 100.0), 50.0);
        assert_eq!(growth_rate(50.0, 100.0), -50.0);
        assert_eq!(growth_rate(100.0, 300.0), -66.67);
    }
}
