pub mod alerts;
pub mod cabinets;
pub mod commands;
pub mod edge;
pub mod error;
pub mod models;
pub mod policies;
pub mod traffic;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;
use crate::registry::Registries;

pub fn router<R: Registries>() -> Router<AppState<R>> {
    Router::new()
        .route("/health", get(traffic::health::<R>))
        // Edge-facing, bearer key required
        .route(
            "/cabinets/{id}/sync",
            post(edge::sync_batch::<R>).put(edge::sync_metadata::<R>),
        )
        .route("/cabinets/{id}/alerts/sync", post(edge::sync_alerts::<R>))
        .route(
            "/cabinets/{id}/vulnerability/sync",
            post(edge::sync_vulnerability::<R>),
        )
        .route("/commands/{id}/ack", post(commands::ack_command::<R>))
        // Operator routes
        .route("/cabinets", post(cabinets::register_cabinet::<R>))
        .route("/cabinets/{id}/commands", get(cabinets::list_commands::<R>))
        .route(
            "/cabinets/{id}/license",
            post(cabinets::push_license::<R>).delete(cabinets::revoke_license::<R>),
        )
        .route(
            "/cabinets/{id}/policies/full-sync",
            post(cabinets::full_sync_policies::<R>),
        )
        .route("/cabinets/{id}/telemetry", get(cabinets::telemetry::<R>))
        // `{id}` is a cabinet id for POST and a command id for GET
        .route(
            "/commands/{id}",
            post(commands::send_command::<R>).get(commands::get_command::<R>),
        )
        .route("/alerts", get(alerts::list_alerts::<R>))
        .route("/alerts/{id}/resolve", post(alerts::resolve_alert::<R>))
        .route("/policies", post(policies::save_policy::<R>))
        .route("/policies/{id}/distribute", post(policies::distribute::<R>))
        .route("/policies/{id}/broadcast", post(policies::broadcast::<R>))
        .route(
            "/policies/{id}/distributions",
            get(policies::distributions::<R>),
        )
        .route("/traffic", get(traffic::all_traffic::<R>))
        .route("/traffic/{id}", get(traffic::cabinet_traffic::<R>))
}
