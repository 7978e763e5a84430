//! Family link, ordering and job status endpoints.

use crate::{
    api::AppState,
    core::family::{self, FamilyMember, FamilyOrderEntry},
    errors::Result,
    jobs::{FamilyJob, JobStats},
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Body of POST /api/students/:id/relatives
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRelative {
    /// Student to link with the one in the path
    pub relative_id: i64,
    /// Optional label, defaults to "sibling"
    #[serde(default)]
    pub relationship_type: Option<String>,
}

/// GET /api/students/:id/family
pub async fn get_family(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<Vec<FamilyMember>>> {
    Ok(Json(family::family_members(&state.db, student_id).await?))
}

/// POST /api/students/:id/relatives
pub async fn add_relative(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
    Json(body): Json<AddRelative>,
) -> Result<Json<Value>> {
    let merged =
        family::add_family_link(&state.db, student_id, body.relative_id, body.relationship_type)
            .await?;

    state.jobs.dispatch(FamilyJob::Recompute(merged.clone()));

    Ok(Json(json!({
        "message": "Family link created and order updated",
        "family": merged,
    })))
}

/// DELETE /api/students/:id/relatives/:link_id
///
/// `link_id` is the id of the `family_links` row, not of the relative.
pub async fn remove_relative(
    State(state): State<AppState>,
    Path((student_id, link_id)): Path<(i64, i64)>,
) -> Result<Json<Value>> {
    let removed = family::remove_family_link(&state.db, student_id, link_id).await?;

    state.jobs.dispatch(FamilyJob::LinkRemoved {
        family_before: removed.family_before,
        endpoints: [removed.student_id, removed.relative_id],
    });

    Ok(Json(json!({
        "message": "Relative removed",
    })))
}

/// POST /api/family-order
pub async fn set_family_order(
    State(state): State<AppState>,
    Json(entries): Json<Vec<FamilyOrderEntry>>,
) -> Result<Json<Value>> {
    if entries.is_empty() {
        return Ok(Json(json!({ "message": "No order data to update" })));
    }

    let updated = family::set_family_order(&state.db, &entries).await?;
    state.jobs.dispatch(FamilyJob::Recompute(updated));

    Ok(Json(json!({ "message": "Family order updated" })))
}

/// GET /api/jobs
pub async fn job_stats(State(state): State<AppState>) -> Json<JobStats> {
    Json(state.jobs.stats())
}
