use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::billing::{BillingService, CreateSubscriptionInput};
use crate::db;
use crate::db::subscriptions::{
    SubscriptionDetail, SubscriptionFilter, SubscriptionPatch, SubscriptionRecord,
};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/api/subscriptions/me", get(list_my_subscriptions))
        .route("/api/subscriptions/me/active", get(read_my_active_subscription))
        .route("/api/subscriptions/expiring", get(list_expiring_subscriptions))
        .route("/api/subscriptions/analytics", get(read_subscription_analytics))
        .route("/api/subscriptions/revenue", get(read_revenue_stats))
        .route(
            "/api/subscriptions/:subscription_id",
            get(read_subscription).put(update_subscription),
        )
        .route(
            "/api/subscriptions/:subscription_id/cancel",
            post(cancel_subscription),
        )
        .route(
            "/api/subscriptions/:subscription_id/renew",
            post(renew_subscription),
        )
}

#[derive(Deserialize)]
pub struct SubscriptionListQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub user_email: Option<String>,
    pub plan_name: Option<String>,
    pub payment_status: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list_subscriptions(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<SubscriptionListQuery>,
) -> AppResult<Json<Vec<SubscriptionDetail>>> {
    user.require_admin()?;
    let subscriptions = db::subscriptions::list_detailed(
        &pool,
        SubscriptionFilter {
            user_email: params.user_email,
            plan_name: params.plan_name,
            payment_status: params.payment_status,
            is_active: params.is_active,
            skip: params.skip.unwrap_or(0),
            limit: params.limit.unwrap_or(100),
            ..Default::default()
        },
        Utc::now(),
    )
    .await?;
    Ok(Json(subscriptions))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_my_subscriptions(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Query(params): Query<PageQuery>,
) -> AppResult<Json<Vec<SubscriptionRecord>>> {
    let subscriptions = db::subscriptions::list_for_user(
        &pool,
        user_id,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
    )
    .await?;
    Ok(Json(subscriptions))
}

pub async fn read_my_active_subscription(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Value>> {
    let subscription = db::subscriptions::active_for_user(&pool, user_id, Utc::now()).await?;
    match subscription {
        Some(subscription) => Ok(Json(json!(subscription))),
        None => Ok(Json(json!({ "message": "No active subscription found" }))),
    }
}

#[derive(Deserialize)]
pub struct SubscriptionCreate {
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

pub async fn create_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<SubscriptionCreate>,
) -> AppResult<Json<SubscriptionRecord>> {
    if !user.is_admin() && payload.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to create subscription for another user".into(),
        ));
    }
    let subscription = BillingService::new(pool)
        .create_subscription(
            CreateSubscriptionInput {
                user_id: payload.user_id,
                plan_id: payload.plan_id,
                start_date: payload.start_date,
                end_date: payload.end_date,
                is_active: payload.is_active,
                payment_status: payload.payment_status,
                payment_amount: payload.payment_amount,
                payment_method: payload.payment_method,
                payment_id: payload.payment_id,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(subscription))
}

#[derive(Deserialize)]
pub struct ExpiringQuery {
    pub days_ahead: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_expiring_subscriptions(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<ExpiringQuery>,
) -> AppResult<Json<Vec<SubscriptionRecord>>> {
    user.require_admin()?;
    let subscriptions = db::subscriptions::expiring(
        &pool,
        params.days_ahead.unwrap_or(7),
        params.limit.unwrap_or(100),
        Utc::now(),
    )
    .await?;
    Ok(Json(subscriptions))
}

pub async fn read_subscription_analytics(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<db::subscriptions::SubscriptionAnalytics>> {
    user.require_admin()?;
    let analytics = db::subscriptions::analytics(&pool, Utc::now()).await?;
    Ok(Json(analytics))
}

#[derive(Deserialize)]
pub struct RevenueQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn read_revenue_stats(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<RevenueQuery>,
) -> AppResult<Json<db::subscriptions::RevenueStats>> {
    user.require_admin()?;
    let stats =
        db::subscriptions::revenue_stats(&pool, params.start_date, params.end_date).await?;
    Ok(Json(stats))
}

pub async fn read_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(subscription_id): Path<i32>,
) -> AppResult<Json<SubscriptionRecord>> {
    let subscription = db::subscriptions::get(&pool, subscription_id)
        .await?
        .ok_or(AppError::NotFound("Subscription"))?;
    if !user.is_admin() && subscription.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to view this subscription".into(),
        ));
    }
    Ok(Json(subscription))
}

#[derive(Deserialize)]
pub struct SubscriptionUpdate {
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

pub async fn update_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(subscription_id): Path<i32>,
    Json(payload): Json<SubscriptionUpdate>,
) -> AppResult<Json<SubscriptionRecord>> {
    user.require_admin()?;
    if db::subscriptions::get(&pool, subscription_id).await?.is_none() {
        return Err(AppError::NotFound("Subscription"));
    }
    let updated = db::subscriptions::update(
        &pool,
        subscription_id,
        SubscriptionPatch {
            user_id: payload.user_id,
            plan_id: payload.plan_id,
            start_date: payload.start_date,
            end_date: payload.end_date,
            is_active: payload.is_active,
            payment_status: payload.payment_status,
            payment_amount: payload.payment_amount,
            payment_method: payload.payment_method,
            payment_id: payload.payment_id,
        },
    )
    .await?
    .ok_or(AppError::NotFound("Subscription"))?;
    Ok(Json(updated))
}

pub async fn cancel_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(subscription_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let subscription = db::subscriptions::get(&pool, subscription_id)
        .await?
        .ok_or(AppError::NotFound("Subscription"))?;
    if !user.is_admin() && subscription.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to cancel this subscription".into(),
        ));
    }
    let cancelled = BillingService::new(pool)
        .cancel_subscription(subscription_id)
        .await?;
    Ok(Json(json!({
        "message": "Subscription cancelled successfully",
        "subscription": cancelled,
    })))
}

#[derive(Deserialize)]
pub struct RenewRequest {
    pub payment_amount: f64,
    pub payment_id: Option<String>,
}

pub async fn renew_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(subscription_id): Path<i32>,
    Json(payload): Json<RenewRequest>,
) -> AppResult<Json<Value>> {
    let subscription = db::subscriptions::get(&pool, subscription_id)
        .await?
        .ok_or(AppError::NotFound("Subscription"))?;
    if !user.is_admin() && subscription.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to renew this subscription".into(),
        ));
    }
    let renewed = BillingService::new(pool)
        .renew_subscription(
            subscription_id,
            payload.payment_amount,
            payload.payment_id.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(Json(json!({
        "message": "Subscription renewed successfully",
        "subscription": renewed,
    })))
}
