use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::db;
use crate::db::subscriptions::{SubscriptionDetail, SubscriptionFilter};
use crate::error::AppResult;
use crate::extractor::AuthUser;

use super::models::Invoice;
use super::service::BillingService;

pub fn routes() -> Router {
    Router::new()
        .route("/api/billing/invoices/me", get(my_invoices))
        .route("/api/billing/invoices", get(all_invoices))
        .route("/api/billing/revenue/summary", get(revenue_summary))
        .route("/api/billing/payment-methods", get(payment_methods))
        .route("/api/billing/failed-payments", get(failed_payments))
        .route("/api/billing/pending-payments", get(pending_payments))
        .route("/api/billing/process-payment", post(process_payment))
        .route("/api/billing/refund/:subscription_id", post(process_refund))
        .route("/api/billing/export/invoices", get(export_invoices))
}

fn invoice_from_detail(detail: SubscriptionDetail, include_user: bool) -> Invoice {
    Invoice {
        id: format!("INV-{}", detail.id),
        subscription_id: detail.id,
        amount: detail.payment_amount,
        payment_method: detail.payment_method,
        payment_id: detail.payment_id,
        payment_date: detail.created_at,
        plan_name: detail.plan.name,
        period_start: detail.start_date,
        period_end: detail.end_date,
        status: detail.payment_status,
        user: include_user.then_some(detail.user),
    }
}

#[derive(Deserialize)]
pub struct InvoicePageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// key: billing-invoices -> completed subscriptions rendered as invoices
pub async fn my_invoices(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Query(params): Query<InvoicePageQuery>,
) -> AppResult<Json<Vec<Invoice>>> {
    let details = db::subscriptions::list_detailed(
        &pool,
        SubscriptionFilter {
            user_id: Some(user_id),
            payment_status: Some("completed".into()),
            skip: params.skip.unwrap_or(0),
            limit: params.limit.unwrap_or(100),
            ..Default::default()
        },
        Utc::now(),
    )
    .await?;
    let invoices = details
        .into_iter()
        .map(|detail| invoice_from_detail(detail, false))
        .collect();
    Ok(Json(invoices))
}

#[derive(Deserialize)]
pub struct InvoiceFilterQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub user_email: Option<String>,
    pub payment_status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn all_invoices(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<InvoiceFilterQuery>,
) -> AppResult<Json<Vec<Invoice>>> {
    user.require_admin()?;
    let details = db::subscriptions::list_detailed(
        &pool,
        SubscriptionFilter {
            user_email: params.user_email,
            payment_status: params.payment_status,
            start_date: params.start_date,
            end_date: params.end_date,
            skip: params.skip.unwrap_or(0),
            limit: params.limit.unwrap_or(100),
            ..Default::default()
        },
        Utc::now(),
    )
    .await?;
    let invoices = details
        .into_iter()
        .map(|detail| invoice_from_detail(detail, true))
        .collect();
    Ok(Json(invoices))
}

#[derive(Deserialize)]
pub struct RevenueWindowQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn revenue_summary(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<RevenueWindowQuery>,
) -> AppResult<Json<super::models::RevenueSummary>> {
    user.require_admin()?;
    let summary = BillingService::new(pool)
        .revenue_summary(params.start_date, params.end_date, Utc::now())
        .await?;
    Ok(Json(summary))
}

pub async fn payment_methods(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Vec<db::subscriptions::PaymentMethodStat>>> {
    user.require_admin()?;
    let stats = db::subscriptions::payment_method_stats(&pool).await?;
    Ok(Json(stats))
}

async fn payments_with_status(
    pool: &PgPool,
    status: &str,
    skip: i64,
    limit: i64,
) -> AppResult<Vec<SubscriptionDetail>> {
    Ok(db::subscriptions::list_detailed(
        pool,
        SubscriptionFilter {
            payment_status: Some(status.into()),
            skip,
            limit,
            ..Default::default()
        },
        Utc::now(),
    )
    .await?)
}

pub async fn failed_payments(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<InvoicePageQuery>,
) -> AppResult<Json<Vec<SubscriptionDetail>>> {
    user.require_admin()?;
    let details = payments_with_status(
        &pool,
        "failed",
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
    )
    .await?;
    Ok(Json(details))
}

pub async fn pending_payments(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<InvoicePageQuery>,
) -> AppResult<Json<Vec<SubscriptionDetail>>> {
    user.require_admin()?;
    let details = payments_with_status(
        &pool,
        "pending",
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
    )
    .await?;
    Ok(Json(details))
}

#[derive(Deserialize)]
pub struct ProcessPaymentRequest {
    pub plan_id: i32,
    pub payment_method: String,
    #[allow(dead_code)]
    pub payment_token: Option<String>,
}

pub async fn process_payment(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<ProcessPaymentRequest>,
) -> AppResult<Json<Value>> {
    let (subscription, payment_id) = BillingService::new(pool)
        .process_payment(user_id, payload.plan_id, &payload.payment_method, Utc::now())
        .await?;
    Ok(Json(json!({
        "message": "Payment processed successfully",
        "subscription": subscription,
        "payment_id": payment_id,
    })))
}

#[derive(Deserialize)]
pub struct RefundRequest {
    pub refund_amount: Option<f64>,
    pub reason: Option<String>,
}

pub async fn process_refund(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(subscription_id): Path<i32>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let (subscription, refund_amount) = BillingService::new(pool)
        .refund_subscription(subscription_id, payload.refund_amount)
        .await?;
    Ok(Json(json!({
        "message": "Refund processed successfully",
        "subscription": subscription,
        "refund_amount": refund_amount,
        "reason": payload.reason,
    })))
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub format: Option<String>,
}

/// Export placeholder: reports how many invoices the window covers and a
/// synthetic download URL. No file is produced.
pub async fn export_invoices(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<ExportQuery>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let record_count =
        db::subscriptions::count_created_between(&pool, params.start_date, params.end_date).await?;
    let format = params.format.unwrap_or_else(|| "csv".to_string());
    let stamp = Utc::now().format("%Y%m%d");
    Ok(Json(json!({
        "message": format!("Export prepared with {} records", record_count),
        "format": format,
        "record_count": record_count,
        "download_url": format!("/api/billing/download/invoices_{}.{}", stamp, format),
    })))
}
