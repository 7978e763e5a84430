//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating students, links and contracts with sensible defaults.

use crate::{
    core::{family, student},
    entities::{Contract, contract, family_link},
    errors::Result,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Shorthand for a calendar date; panics on an invalid date.
#[allow(clippy::unwrap_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Builds a student input with only names and birth date filled in.
pub fn student_input(
    last_name: &str,
    first_name: &str,
    birth_date: Option<NaiveDate>,
) -> student::StudentInput {
    student::StudentInput {
        last_name: last_name.to_string(),
        first_name: first_name.to_string(),
        birth_date,
        ..Default::default()
    }
}

/// Creates a test student with last name "Test".
pub async fn create_test_student(
    db: &DatabaseConnection,
    first_name: &str,
    birth_date: Option<NaiveDate>,
) -> Result<crate::entities::StudentModel> {
    student::create_student(db, student_input("Test", first_name, birth_date)).await
}

/// Creates A (2010), B (2012) and C (2015) and links them into one family.
///
/// Afterwards the ranks are A = 0, B = 1, C = 2.
pub async fn three_siblings(
    db: &DatabaseConnection,
) -> Result<(
    crate::entities::StudentModel,
    crate::entities::StudentModel,
    crate::entities::StudentModel,
)> {
    let a = create_test_student(db, "A", Some(date(2010, 1, 1))).await?;
    let b = create_test_student(db, "B", Some(date(2012, 1, 1))).await?;
    let c = create_test_student(db, "C", Some(date(2015, 1, 1))).await?;
    family::add_family_link(db, a.id, b.id, None).await?;
    family::add_family_link(db, b.id, c.id, None).await?;
    Ok((a, b, c))
}

/// Inserts a single directed link without merging families or mirroring it.
pub async fn insert_raw_link(
    db: &DatabaseConnection,
    student_id: i64,
    relative_id: i64,
) -> Result<crate::entities::FamilyLinkModel> {
    let link = family_link::ActiveModel {
        student_id: Set(student_id),
        relative_id: Set(relative_id),
        relationship_type: Set(family::DEFAULT_RELATIONSHIP.to_string()),
        created_at: Set(Utc::now()),
        deleted_at: Set(None),
        ..Default::default()
    };
    Ok(link.insert(db).await?)
}

async fn insert_contract(
    db: &DatabaseConnection,
    student_id: i64,
    total_amount: f64,
    start_date: Option<NaiveDate>,
) -> Result<crate::entities::ContractModel> {
    let seq = Contract::find().count(db).await? + 1;
    let contract = contract::ActiveModel {
        contract_number: Set(format!("T {student_id}-{seq}")),
        student_id: Set(student_id),
        start_date: Set(start_date),
        end_date: Set(None),
        total_amount: Set(total_amount),
        discount_percentage: Set(0.0),
        discounted_amount: Set(total_amount),
        paid_amount: Set(0.0),
        comment: Set(String::new()),
        created_at: Set(Utc::now()),
        deleted_at: Set(None),
        ..Default::default()
    };
    Ok(contract.insert(db).await?)
}

/// Inserts a contract with no discount, starting 2024-09-01.
///
/// Bypasses `create_contract`, so the discount does not reflect the family rank.
pub async fn create_test_contract(
    db: &DatabaseConnection,
    student_id: i64,
    total_amount: f64,
) -> Result<crate::entities::ContractModel> {
    insert_contract(db, student_id, total_amount, Some(date(2024, 9, 1))).await
}

/// Inserts a contract with no discount and a custom start date.
pub async fn create_dated_contract(
    db: &DatabaseConnection,
    student_id: i64,
    total_amount: f64,
    start_date: NaiveDate,
) -> Result<crate::entities::ContractModel> {
    insert_contract(db, student_id, total_amount, Some(start_date)).await
}

/// Inserts a contract with no discount and no start date.
pub async fn create_undated_contract(
    db: &DatabaseConnection,
    student_id: i64,
    total_amount: f64,
) -> Result<crate::entities::ContractModel> {
    insert_contract(db, student_id, total_amount, None).await
}
