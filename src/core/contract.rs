//! Contract business logic - Handles tuition contract operations.
//!
//! A new contract takes its discount from the student's current family rank;
//! afterwards the family reconciliation keeps the student's latest contract in
//! line with the rank. Contracts are soft-deleted only.

use crate::{
    core::discount::{discount_for_family_order, discounted_amount},
    core::student::get_student,
    entities::{Contract, contract},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Set, SqlErr, prelude::*};
use serde::Deserialize;

/// Attempts at finding a free contract number before giving up.
const MAX_NUMBER_ATTEMPTS: usize = 10;

/// Fields accepted when creating a contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContract {
    /// Student the contract is for
    pub student_id: i64,
    /// Full price before discount
    pub total_amount: f64,
    /// First day covered
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last day covered
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Free-form note
    #[serde(default)]
    pub comment: Option<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractChanges {
    /// New full price
    pub total_amount: Option<f64>,
    /// New discount percentage
    pub discount_percentage: Option<f64>,
    /// New amount paid
    pub paid_amount: Option<f64>,
    /// New start date
    pub start_date: Option<NaiveDate>,
    /// New end date
    pub end_date: Option<NaiveDate>,
    /// New note
    pub comment: Option<String>,
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

fn validate_discount(discount: f64) -> Result<()> {
    if !discount.is_finite() || !(0.0..=100.0).contains(&discount) {
        return Err(Error::Validation {
            message: format!("discountPercentage must be between 0 and 100, got {discount}"),
        });
    }
    Ok(())
}

/// Creates a contract numbered `N {student_id}-{seq}`.
///
/// `seq` starts at the student's active contract count plus one and moves on
/// to the next value whenever the number is already taken. The discount comes
/// from the student's current `family_order`.
pub async fn create_contract(db: &DatabaseConnection, input: NewContract) -> Result<contract::Model> {
    validate_amount(input.total_amount)?;
    let student = get_student(db, input.student_id).await?;

    let discount = discount_for_family_order(student.family_order);
    let discounted = discounted_amount(input.total_amount, discount);

    let existing = Contract::find()
        .filter(contract::Column::StudentId.eq(student.id))
        .filter(contract::Column::DeletedAt.is_null())
        .count(db)
        .await?;
    let mut seq = existing + 1;

    for _ in 0..MAX_NUMBER_ATTEMPTS {
        let number = format!("N {}-{seq}", student.id);
        let candidate = contract::ActiveModel {
            contract_number: Set(number.clone()),
            student_id: Set(student.id),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            total_amount: Set(input.total_amount),
            discount_percentage: Set(discount),
            discounted_amount: Set(discounted),
            paid_amount: Set(0.0),
            comment: Set(input.comment.clone().unwrap_or_default()),
            created_at: Set(Utc::now()),
            deleted_at: Set(None),
            ..Default::default()
        };

        match candidate.insert(db).await {
            Ok(created) => {
                tracing::info!(
                    contract_id = created.id,
                    student_id = student.id,
                    discount,
                    "Contract created"
                );
                return Ok(created);
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                tracing::debug!(number, "Contract number taken, trying next");
                seq += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Validation {
        message: format!(
            "could not allocate a contract number for student {} after {MAX_NUMBER_ATTEMPTS} attempts",
            student.id
        ),
    })
}

/// Finds an active contract by id.
pub async fn get_contract<C>(db: &C, contract_id: i64) -> Result<contract::Model>
where
    C: ConnectionTrait,
{
    Contract::find_by_id(contract_id)
        .filter(contract::Column::DeletedAt.is_null())
        .one(db)
        .await?
        .ok_or(Error::ContractNotFound { id: contract_id })
}

/// Active contracts of a student, latest first.
pub async fn list_contracts_for_student(
    db: &DatabaseConnection,
    student_id: i64,
) -> Result<Vec<contract::Model>> {
    get_student(db, student_id).await?;
    let mut contracts = Contract::find()
        .filter(contract::Column::StudentId.eq(student_id))
        .filter(contract::Column::DeletedAt.is_null())
        .order_by_desc(contract::Column::Id)
        .all(db)
        .await?;
    contracts.sort_by(|a, b| (b.start_date, b.id).cmp(&(a.start_date, a.id)));
    Ok(contracts)
}

/// The student's most recently started active contract.
///
/// Ordered by start date then id, both descending; contracts without a start
/// date lose to dated ones.
pub async fn latest_contract<C>(db: &C, student_id: i64) -> Result<Option<contract::Model>>
where
    C: ConnectionTrait,
{
    let contracts = Contract::find()
        .filter(contract::Column::StudentId.eq(student_id))
        .filter(contract::Column::DeletedAt.is_null())
        .all(db)
        .await?;
    Ok(contracts.into_iter().max_by_key(|c| (c.start_date, c.id)))
}

/// Writes `discount` and the matching discounted amount onto `contract`.
pub async fn apply_contract_discount<C>(
    db: &C,
    contract: &contract::Model,
    discount: f64,
) -> Result<contract::Model>
where
    C: ConnectionTrait,
{
    let mut active: contract::ActiveModel = contract.clone().into();
    active.discount_percentage = Set(discount);
    active.discounted_amount = Set(discounted_amount(contract.total_amount, discount));
    active.update(db).await.map_err(Into::into)
}

/// Applies `changes` and recomputes the discounted amount.
pub async fn update_contract(
    db: &DatabaseConnection,
    contract_id: i64,
    changes: ContractChanges,
) -> Result<contract::Model> {
    let existing = get_contract(db, contract_id).await?;

    let total = changes.total_amount.unwrap_or(existing.total_amount);
    let discount = changes
        .discount_percentage
        .unwrap_or(existing.discount_percentage);
    validate_amount(total)?;
    validate_discount(discount)?;
    if let Some(paid) = changes.paid_amount {
        validate_amount(paid)?;
    }

    let mut active: contract::ActiveModel = existing.into();
    active.total_amount = Set(total);
    active.discount_percentage = Set(discount);
    active.discounted_amount = Set(discounted_amount(total, discount));
    if let Some(paid) = changes.paid_amount {
        active.paid_amount = Set(paid);
    }
    if let Some(start) = changes.start_date {
        active.start_date = Set(Some(start));
    }
    if let Some(end) = changes.end_date {
        active.end_date = Set(Some(end));
    }
    if let Some(comment) = changes.comment {
        active.comment = Set(comment);
    }

    active.update(db).await.map_err(Into::into)
}

/// Soft-deletes a contract.
pub async fn delete_contract(db: &DatabaseConnection, contract_id: i64) -> Result<contract::Model> {
    let existing = get_contract(db, contract_id).await?;
    let mut active: contract::ActiveModel = existing.into();
    active.deleted_at = Set(Some(Utc::now()));
    active.update(db).await.map_err(Into::into)
}
