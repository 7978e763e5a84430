//! Contract endpoints.

use crate::{
    api::AppState,
    core::contract::{self, ContractChanges, NewContract},
    entities::ContractModel,
    errors::Result,
    jobs::FamilyJob,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// GET /api/students/:id/contracts
pub async fn list_for_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<Vec<ContractModel>>> {
    Ok(Json(
        contract::list_contracts_for_student(&state.db, student_id).await?,
    ))
}

/// POST /api/contracts
pub async fn create_contract(
    State(state): State<AppState>,
    Json(input): Json<NewContract>,
) -> Result<(StatusCode, Json<ContractModel>)> {
    let created = contract::create_contract(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/contracts/:id
pub async fn get_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
) -> Result<Json<ContractModel>> {
    Ok(Json(contract::get_contract(&state.db, contract_id).await?))
}

/// PUT /api/contracts/:id
///
/// The family recompute that follows may overwrite a hand-set discount on the
/// student's latest contract.
pub async fn update_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
    Json(changes): Json<ContractChanges>,
) -> Result<Json<ContractModel>> {
    let updated = contract::update_contract(&state.db, contract_id, changes).await?;
    state
        .jobs
        .dispatch(FamilyJob::Recompute(vec![updated.student_id]));
    Ok(Json(updated))
}

/// DELETE /api/contracts/:id
pub async fn delete_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
) -> Result<StatusCode> {
    contract::delete_contract(&state.db, contract_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
