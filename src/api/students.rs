//! Student endpoints.
//!
//! Every write that can move a family's ranks dispatches a family job and
//! answers without waiting for it.

use crate::{
    api::AppState,
    core::family::{FamilyMember, family_members},
    core::student::{self, StudentInput},
    entities::StudentModel,
    errors::Result,
    jobs::FamilyJob,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Query parameters for the student list
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Substring of last name, first name or IIN
    pub search: Option<String>,
}

/// Student card: the record plus its family.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    /// The student
    #[serde(flatten)]
    pub student: StudentModel,
    /// Family members in rank order, the student included
    pub family_members: Vec<FamilyMember>,
}

/// GET /api/students
pub async fn list_students(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StudentModel>>> {
    let students = student::list_students(&state.db, query.search.as_deref()).await?;
    Ok(Json(students))
}

/// POST /api/students
pub async fn create_student(
    State(state): State<AppState>,
    Json(input): Json<StudentInput>,
) -> Result<(StatusCode, Json<StudentModel>)> {
    let created = student::create_student(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/students/:id
pub async fn get_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<StudentDetail>> {
    let student = student::get_student(&state.db, student_id).await?;
    let family_members = family_members(&state.db, student_id).await?;
    Ok(Json(StudentDetail {
        student,
        family_members,
    }))
}

/// PUT /api/students/:id
///
/// A changed birth date re-ranks the family; any other change just
/// re-checks the discounts.
pub async fn update_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
    Json(input): Json<StudentInput>,
) -> Result<Json<StudentModel>> {
    let update = student::update_student(&state.db, student_id, input).await?;

    let job = if update.birth_date_changed {
        FamilyJob::BirthDateChanged(student_id)
    } else {
        FamilyJob::Recompute(vec![student_id])
    };
    state.jobs.dispatch(job);

    Ok(Json(update.student))
}

/// DELETE /api/students/:id
pub async fn delete_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<Value>> {
    let remaining = student::delete_student(&state.db, student_id).await?;

    if !remaining.is_empty() {
        state.jobs.dispatch(FamilyJob::StudentRemoved { remaining });
    }

    Ok(Json(json!({
        "message": "Student deleted, family discounts are being updated",
    })))
}
