use axum::Router;

use crate::{auth, billing, dashboard, plans, subscriptions, usage, users};

pub fn api_routes() -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(plans::routes())
        .merge(subscriptions::routes())
        .merge(usage::routes())
        .merge(dashboard::routes())
        .merge(billing::api::routes())
}
