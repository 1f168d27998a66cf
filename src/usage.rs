use axum::{
    extract::{Extension, Path, Query},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::db;
use crate::db::usage::{NewUsage, UsageDetail, UsageFilter, UsagePatch, UsageRecord};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/usage", get(list_usage_records).post(create_usage_record))
        .route("/api/usage/me", get(list_my_usage))
        .route("/api/usage/me/monthly/:year/:month", get(read_my_monthly_usage))
        .route("/api/usage/analytics", get(read_usage_analytics))
        .route("/api/usage/active-calls", get(list_active_calls))
        .route("/api/usage/user/:user_id", get(list_user_usage))
        .route(
            "/api/usage/user/:user_id/monthly/:year/:month",
            get(read_user_monthly_usage),
        )
        .route(
            "/api/usage/:usage_id",
            get(read_usage_record)
                .put(update_usage_record)
                .delete(delete_usage_record),
        )
        .route("/api/usage/call/:call_id/end", put(end_call))
}

#[derive(Deserialize)]
pub struct UsageListQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub user_email: Option<String>,
    pub call_status: Option<String>,
    pub call_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn list_usage_records(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<UsageListQuery>,
) -> AppResult<Json<Vec<UsageDetail>>> {
    user.require_admin()?;
    let records = db::usage::list_detailed(
        &pool,
        UsageFilter {
            user_email: params.user_email,
            call_status: params.call_status,
            call_type: params.call_type,
            start_date: params.start_date,
            end_date: params.end_date,
            skip: params.skip.unwrap_or(0),
            limit: params.limit.unwrap_or(100),
        },
    )
    .await?;
    Ok(Json(records))
}

#[derive(Deserialize)]
pub struct UserUsageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn list_my_usage(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Query(params): Query<UserUsageQuery>,
) -> AppResult<Json<Vec<UsageRecord>>> {
    let records = db::usage::list_for_user(
        &pool,
        user_id,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
        params.start_date,
        params.end_date,
    )
    .await?;
    Ok(Json(records))
}

pub async fn read_my_monthly_usage(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path((year, month)): Path<(i32, u32)>,
) -> AppResult<Json<db::usage::MonthlyUsage>> {
    let stats = db::usage::monthly_stats(&pool, user_id, year, month)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid month".into()))?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn read_usage_analytics(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<AnalyticsQuery>,
) -> AppResult<Json<db::usage::UsageAnalytics>> {
    user.require_admin()?;
    let analytics = db::usage::system_analytics(
        &pool,
        params.start_date,
        params.end_date,
        Utc::now(),
    )
    .await?;
    Ok(Json(analytics))
}

pub async fn list_active_calls(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Vec<UsageRecord>>> {
    user.require_admin()?;
    let calls = db::usage::active_calls(&pool).await?;
    Ok(Json(calls))
}

#[derive(Deserialize)]
pub struct UsageCreate {
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
}

/// Usually invoked by the call-control system when a call starts.
pub async fn create_usage_record(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<UsageCreate>,
) -> AppResult<Json<UsageRecord>> {
    if !user.is_admin() && payload.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to create usage record for another user".into(),
        ));
    }
    if db::users::get(&pool, payload.user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    if db::usage::get_by_call_id(&pool, &payload.call_id).await?.is_some() {
        return Err(AppError::BadRequest(
            "Usage record with this call_id already exists".into(),
        ));
    }
    let record = db::usage::insert(
        &pool,
        NewUsage {
            user_id: payload.user_id,
            call_id: &payload.call_id,
            start_time: payload.start_time,
            end_time: payload.end_time,
            duration: payload.duration,
            status: &payload.status,
            caller_number: &payload.caller_number,
            destination_number: &payload.destination_number,
            call_type: &payload.call_type,
            call_summary: payload.call_summary.as_deref(),
            recording_url: payload.recording_url.as_deref(),
        },
    )
    .await?;
    Ok(Json(record))
}

pub async fn list_user_usage(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
    Query(params): Query<UserUsageQuery>,
) -> AppResult<Json<Vec<UsageRecord>>> {
    user.require_admin()?;
    if db::users::get(&pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    let records = db::usage::list_for_user(
        &pool,
        user_id,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
        params.start_date,
        params.end_date,
    )
    .await?;
    Ok(Json(records))
}

pub async fn read_user_monthly_usage(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path((user_id, year, month)): Path<(i32, i32, u32)>,
) -> AppResult<Json<db::usage::MonthlyUsage>> {
    user.require_admin()?;
    if db::month_bounds(year, month).is_none() {
        return Err(AppError::BadRequest("Invalid month".into()));
    }
    if db::users::get(&pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    let stats = db::usage::monthly_stats(&pool, user_id, year, month)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid month".into()))?;
    Ok(Json(stats))
}

pub async fn read_usage_record(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(usage_id): Path<i32>,
) -> AppResult<Json<UsageRecord>> {
    let record = db::usage::get(&pool, usage_id)
        .await?
        .ok_or(AppError::NotFound("Usage record"))?;
    if !user.is_admin() && record.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to view this usage record".into(),
        ));
    }
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct UsageUpdate {
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub status: Option<String>,
    pub caller_number: Option<String>,
    pub destination_number: Option<String>,
    pub call_type: Option<String>,
    pub call_summary: Option<String>,
    pub recording_url: Option<String>,
}

pub async fn update_usage_record(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(usage_id): Path<i32>,
    Json(payload): Json<UsageUpdate>,
) -> AppResult<Json<UsageRecord>> {
    user.require_admin()?;
    if db::usage::get(&pool, usage_id).await?.is_none() {
        return Err(AppError::NotFound("Usage record"));
    }
    let updated = db::usage::update(
        &pool,
        usage_id,
        UsagePatch {
            end_time: payload.end_time,
            duration: payload.duration,
            status: payload.status,
            caller_number: payload.caller_number,
            destination_number: payload.destination_number,
            call_type: payload.call_type,
            call_summary: payload.call_summary,
            recording_url: payload.recording_url,
        },
    )
    .await?
    .ok_or(AppError::NotFound("Usage record"))?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct EndCallRequest {
    pub end_time: DateTime<Utc>,
    pub duration: f64,
    pub status: Option<String>,
}

/// Usually invoked by the call-control system when a call finishes. End
/// time, duration, and the terminal status are written together.
pub async fn end_call(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(call_id): Path<String>,
    Json(payload): Json<EndCallRequest>,
) -> AppResult<Json<Value>> {
    let record = db::usage::get_by_call_id(&pool, &call_id)
        .await?
        .ok_or(AppError::NotFound("Usage record"))?;
    if !user.is_admin() && record.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not enough permissions to update this usage record".into(),
        ));
    }
    let updated = db::usage::end_call(
        &pool,
        &call_id,
        payload.end_time,
        payload.duration,
        payload.status.as_deref().unwrap_or("completed"),
    )
    .await?
    .ok_or(AppError::NotFound("Usage record"))?;
    Ok(Json(json!({
        "message": "Call ended successfully",
        "usage": updated,
    })))
}

pub async fn delete_usage_record(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(usage_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    if db::usage::get(&pool, usage_id).await?.is_none() {
        return Err(AppError::NotFound("Usage record"));
    }
    db::usage::delete(&pool, usage_id).await?;
    Ok(Json(json!({ "message": "Usage record deleted successfully" })))
}
