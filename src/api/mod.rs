//! HTTP API - axum router and handlers over the core operations.
//!
//! Handlers parse input, call into [`crate::core`], dispatch any follow-up
//! family job and serialize the result. Errors become `{"error": "..."}`
//! bodies with a status from [`crate::errors::Error::status_code`].

pub mod contracts;
pub mod error;
pub mod family;
pub mod students;

use crate::jobs::FamilyJobs;
use axum::{
    Json, Router,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: DatabaseConnection,
    /// Background family job dispatcher
    pub jobs: FamilyJobs,
}

impl AppState {
    /// Creates the state and a job dispatcher sharing the same pool.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        let jobs = FamilyJobs::new(db.clone());
        Self { db, jobs }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/api/students/:id",
            get(students::get_student)
                .put(students::update_student)
                .delete(students::delete_student),
        )
        .route("/api/students/:id/family", get(family::get_family))
        .route("/api/students/:id/relatives", post(family::add_relative))
        .route(
            "/api/students/:id/relatives/:link_id",
            delete(family::remove_relative),
        )
        .route(
            "/api/students/:id/contracts",
            get(contracts::list_for_student),
        )
        .route("/api/family-order", post(family::set_family_order))
        .route("/api/contracts", post(contracts::create_contract))
        .route(
            "/api/contracts/:id",
            get(contracts::get_contract)
                .put(contracts::update_contract)
                .delete(contracts::delete_contract),
        )
        .route("/api/jobs", get(family::job_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
