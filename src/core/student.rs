//! Student business logic - Handles student record operations.
//!
//! Creation, lookup, search, update and soft deletion. Nothing here touches
//! discounts directly; callers hand the returned ids to the family jobs so
//! ranks and contract discounts converge after the write.

use crate::{
    core::discount::SINGLETON_FAMILY_ORDER,
    core::family::find_full_family,
    entities::{FamilyLink, Student, family_link, student},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{Condition, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Deserialize;

/// Editable student fields, as accepted by create and update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    /// Family name (required)
    pub last_name: String,
    /// Given name (required)
    pub first_name: String,
    /// Patronymic
    #[serde(default)]
    pub middle_name: Option<String>,
    /// National identification number
    #[serde(default)]
    pub iin: Option<String>,
    /// Date of birth
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Enrollment date
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Defaults to `true` when absent
    #[serde(default)]
    pub is_studying: Option<bool>,
}

impl StudentInput {
    fn validate(&self) -> Result<()> {
        if self.last_name.trim().is_empty() {
            return Err(Error::Validation {
                message: "lastName cannot be empty".to_string(),
            });
        }
        if self.first_name.trim().is_empty() {
            return Err(Error::Validation {
                message: "firstName cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Trimmed IIN, with blank values treated as absent.
    fn normalized_iin(&self) -> Option<String> {
        self.iin
            .as_deref()
            .map(str::trim)
            .filter(|iin| !iin.is_empty())
            .map(str::to_string)
    }
}

/// Result of an update, telling the caller which recompute to schedule.
#[derive(Debug, Clone)]
pub struct StudentUpdate {
    /// The student as stored after the update
    pub student: student::Model,
    /// Whether the birth date differs from the previous value
    pub birth_date_changed: bool,
}

/// Finds an active student by id, returning None if missing or soft-deleted.
pub async fn find_student<C>(db: &C, student_id: i64) -> Result<Option<student::Model>>
where
    C: ConnectionTrait,
{
    Student::find_by_id(student_id)
        .filter(student::Column::DeletedAt.is_null())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Like [`find_student`] but a missing student is an error.
pub async fn get_student<C>(db: &C, student_id: i64) -> Result<student::Model>
where
    C: ConnectionTrait,
{
    find_student(db, student_id)
        .await?
        .ok_or(Error::StudentNotFound { id: student_id })
}

/// Lists active students ordered by last name then first name.
///
/// `search` matches a substring of the last name, first name or IIN.
pub async fn list_students(
    db: &DatabaseConnection,
    search: Option<&str>,
) -> Result<Vec<student::Model>> {
    let mut query = Student::find().filter(student::Column::DeletedAt.is_null());

    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        query = query.filter(
            Condition::any()
                .add(student::Column::LastName.contains(term))
                .add(student::Column::FirstName.contains(term))
                .add(student::Column::Iin.contains(term)),
        );
    }

    query
        .order_by_asc(student::Column::LastName)
        .order_by_asc(student::Column::FirstName)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn ensure_iin_available(
    db: &DatabaseConnection,
    iin: &str,
    exclude_id: Option<i64>,
) -> Result<()> {
    let mut query = Student::find()
        .filter(student::Column::Iin.eq(iin))
        .filter(student::Column::DeletedAt.is_null());
    if let Some(id) = exclude_id {
        query = query.filter(student::Column::Id.ne(id));
    }

    if query.one(db).await?.is_some() {
        return Err(Error::DuplicateIin {
            iin: iin.to_string(),
        });
    }
    Ok(())
}

/// Creates a new student with no family (`family_order` = sentinel).
pub async fn create_student(db: &DatabaseConnection, input: StudentInput) -> Result<student::Model> {
    input.validate()?;
    let iin = input.normalized_iin();
    if let Some(iin) = &iin {
        ensure_iin_available(db, iin, None).await?;
    }

    let now = Utc::now();
    let student = student::ActiveModel {
        last_name: Set(input.last_name.trim().to_string()),
        first_name: Set(input.first_name.trim().to_string()),
        middle_name: Set(input.middle_name),
        iin: Set(iin),
        birth_date: Set(input.birth_date),
        start_date: Set(input.start_date),
        is_studying: Set(input.is_studying.unwrap_or(true)),
        family_order: Set(SINGLETON_FAMILY_ORDER),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    };

    let created = student.insert(db).await?;
    tracing::info!(student_id = created.id, "Student created");
    Ok(created)
}

/// Replaces the editable fields of a student.
///
/// `family_order` is left alone; it only changes through the family operations.
pub async fn update_student(
    db: &DatabaseConnection,
    student_id: i64,
    input: StudentInput,
) -> Result<StudentUpdate> {
    input.validate()?;
    let existing = get_student(db, student_id).await?;

    let iin = input.normalized_iin();
    if let Some(iin) = iin.as_deref().filter(|&new| existing.iin.as_deref() != Some(new)) {
        ensure_iin_available(db, iin, Some(student_id)).await?;
    }

    let birth_date_changed = existing.birth_date != input.birth_date;

    let mut active: student::ActiveModel = existing.into();
    active.last_name = Set(input.last_name.trim().to_string());
    active.first_name = Set(input.first_name.trim().to_string());
    active.middle_name = Set(input.middle_name);
    active.iin = Set(iin);
    active.birth_date = Set(input.birth_date);
    active.start_date = Set(input.start_date);
    active.is_studying = Set(input.is_studying.unwrap_or(true));
    active.updated_at = Set(Utc::now());
    let student = active.update(db).await?;

    Ok(StudentUpdate {
        student,
        birth_date_changed,
    })
}

/// Soft-deletes a student together with every family link touching them.
///
/// Runs in one transaction. Returns the ids of the family members left
/// behind, whose ranks and discounts need recomputing.
pub async fn delete_student(db: &DatabaseConnection, student_id: i64) -> Result<Vec<i64>> {
    let txn = db.begin().await?;

    get_student(&txn, student_id).await?;

    let remaining: Vec<i64> = find_full_family(&txn, student_id)
        .await?
        .into_iter()
        .filter(|&id| id != student_id)
        .collect();

    let now = Utc::now();
    FamilyLink::update_many()
        .col_expr(family_link::Column::DeletedAt, Expr::value(now))
        .filter(
            Condition::any()
                .add(family_link::Column::StudentId.eq(student_id))
                .add(family_link::Column::RelativeId.eq(student_id)),
        )
        .filter(family_link::Column::DeletedAt.is_null())
        .exec(&txn)
        .await?;

    Student::update_many()
        .col_expr(student::Column::DeletedAt, Expr::value(now))
        .filter(student::Column::Id.eq(student_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    tracing::info!(student_id, remaining = ?remaining, "Student deleted");
    Ok(remaining)
}
