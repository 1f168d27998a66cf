use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::db;
use crate::db::plans::{NewPlan, PlanPatch, PlanRecord, PlanWithFeatures};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/plans", get(list_plans).post(create_plan))
        .route("/api/plans/all", get(list_all_plans))
        .route("/api/plans/with-stats", get(list_plans_with_stats))
        .route("/api/plans/popular", get(list_popular_plans))
        .route(
            "/api/plans/:plan_id",
            get(read_plan).put(update_plan).delete(delete_plan),
        )
        .route("/api/plans/:plan_id/activate", post(activate_plan))
        .route("/api/plans/:plan_id/deactivate", post(deactivate_plan))
}

/// Public pricing-page listing: active plans only.
pub async fn list_plans(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<PlanRecord>>> {
    let plans = db::plans::list_active(&pool).await?;
    Ok(Json(plans))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_all_plans(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<PageQuery>,
) -> AppResult<Json<Vec<PlanRecord>>> {
    user.require_admin()?;
    let plans = db::plans::list(
        &pool,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
    )
    .await?;
    Ok(Json(plans))
}

pub async fn list_plans_with_stats(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Vec<db::plans::PlanWithStats>>> {
    user.require_admin()?;
    let plans = db::plans::list_with_stats(&pool, Utc::now()).await?;
    Ok(Json(plans))
}

#[derive(Deserialize)]
pub struct PopularQuery {
    pub limit: Option<i64>,
}

pub async fn list_popular_plans(
    Extension(pool): Extension<PgPool>,
    Query(params): Query<PopularQuery>,
) -> AppResult<Json<Vec<db::plans::PopularPlan>>> {
    let plans = db::plans::popular(&pool, params.limit.unwrap_or(5), Utc::now()).await?;
    Ok(Json(plans))
}

/// Feature payloads may arrive as an object or a pre-serialized string;
/// both are stored as serialized text.
fn features_to_text(features: Option<Value>) -> AppResult<Option<String>> {
    match features {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw)),
        Some(value) => serde_json::to_string(&value)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("Invalid features payload: {}", e))),
    }
}

#[derive(Deserialize)]
pub struct PlanCreate {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_days: i32,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Option<Value>,
    pub is_active: Option<bool>,
}

pub async fn create_plan(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<PlanCreate>,
) -> AppResult<Json<PlanRecord>> {
    user.require_admin()?;
    if payload.price < 0.0 {
        return Err(AppError::BadRequest("Price must be non-negative".into()));
    }
    if payload.duration_days <= 0 {
        return Err(AppError::BadRequest("Duration must be positive".into()));
    }
    if db::plans::get_by_name(&pool, &payload.name).await?.is_some() {
        return Err(AppError::BadRequest(
            "A plan with this name already exists.".into(),
        ));
    }
    let features = features_to_text(payload.features)?;
    let created = db::plans::insert(
        &pool,
        NewPlan {
            name: &payload.name,
            description: payload.description.as_deref(),
            price: payload.price,
            duration_days: payload.duration_days,
            max_calls: payload.max_calls,
            max_minutes: payload.max_minutes,
            features,
            is_active: payload.is_active.unwrap_or(true),
        },
    )
    .await?;
    Ok(Json(created))
}

pub async fn read_plan(
    Extension(pool): Extension<PgPool>,
    Path(plan_id): Path<i32>,
) -> AppResult<Json<PlanWithFeatures>> {
    let plan = db::plans::get(&pool, plan_id)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;
    Ok(Json(plan.into()))
}

#[derive(Deserialize)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub duration_days: Option<i32>,
    pub max_calls: Option<i32>,
    pub max_minutes: Option<i32>,
    pub features: Option<Value>,
    pub is_active: Option<bool>,
}

pub async fn update_plan(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(plan_id): Path<i32>,
    Json(payload): Json<PlanUpdate>,
) -> AppResult<Json<PlanRecord>> {
    user.require_admin()?;
    let plan = db::plans::get(&pool, plan_id)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;
    if let Some(price) = payload.price {
        if price < 0.0 {
            return Err(AppError::BadRequest("Price must be non-negative".into()));
        }
    }
    if let Some(duration_days) = payload.duration_days {
        if duration_days <= 0 {
            return Err(AppError::BadRequest("Duration must be positive".into()));
        }
    }
    if let Some(name) = payload.name.as_deref() {
        if name != plan.name && db::plans::get_by_name(&pool, name).await?.is_some() {
            return Err(AppError::BadRequest(
                "A plan with this name already exists.".into(),
            ));
        }
    }
    let features = features_to_text(payload.features)?;
    let updated = db::plans::update(
        &pool,
        plan_id,
        PlanPatch {
            name: payload.name,
            description: payload.description,
            price: payload.price,
            duration_days: payload.duration_days,
            max_calls: payload.max_calls,
            max_minutes: payload.max_minutes,
            features,
            is_active: payload.is_active,
        },
    )
    .await?
    .ok_or(AppError::NotFound("Plan"))?;
    Ok(Json(updated))
}

/// Conditional delete: plans still carrying effectively-active
/// subscriptions are deactivated instead of removed.
pub async fn delete_plan(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(plan_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    if db::plans::get(&pool, plan_id).await?.is_none() {
        return Err(AppError::NotFound("Plan"));
    }
    let active = db::plans::count_active_subscriptions(&pool, plan_id, Utc::now()).await?;
    if active > 0 {
        let plan = db::plans::set_active(&pool, plan_id, false)
            .await?
            .ok_or(AppError::NotFound("Plan"))?;
        return Ok(Json(json!({
            "message": format!("Plan deactivated due to {} active subscriptions", active),
            "plan": plan,
        })));
    }
    db::plans::delete(&pool, plan_id).await?;
    Ok(Json(json!({ "message": "Plan deleted successfully" })))
}

pub async fn activate_plan(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(plan_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let plan = db::plans::set_active(&pool, plan_id, true)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;
    Ok(Json(json!({
        "message": "Plan activated successfully",
        "plan": plan,
    })))
}

pub async fn deactivate_plan(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(plan_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let plan = db::plans::set_active(&pool, plan_id, false)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;
    Ok(Json(json!({
        "message": "Plan deactivated successfully",
        "plan": plan,
    })))
}
