use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::subscriptions::{PlanRevenue, SubscriptionUserSummary};

/// An invoice is a view over a subscription payment; nothing is stored
/// beyond the subscription row itself.
#[derive(Debug, Serialize)]
pub struct Invoice {
    pub id: String,
    pub subscription_id: i32,
    pub amount: f64,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
    pub payment_date: DateTime<Utc>,
    pub plan_name: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SubscriptionUserSummary>,
}

#[derive(Debug, Serialize)]
pub struct MonthRevenue {
    pub revenue: f64,
    pub subscriptions: i64,
}

#[derive(Debug, Serialize)]
pub struct RevenueGrowth {
    pub revenue_growth_rate: f64,
    pub revenue_difference: f64,
}

#[derive(Debug, Serialize)]
pub struct RevenueSummary {
    pub total_revenue: f64,
    pub total_subscriptions: i64,
    pub average_revenue_per_subscription: f64,
    pub plan_breakdown: BTreeMap<String, PlanRevenue>,
    pub current_month: MonthRevenue,
    pub previous_month: MonthRevenue,
    pub growth: RevenueGrowth,
}
