//! Contract entity - A tuition agreement for one student.
//!
//! `discounted_amount` is always derived from `total_amount` and
//! `discount_percentage`; the family reconciliation rewrites both discount
//! fields together on the student's latest contract.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Contract database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier for the contract
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-facing number in the form `N {student_id}-{seq}`
    #[sea_orm(unique)]
    pub contract_number: String,
    /// ID of the student this contract belongs to
    pub student_id: i64,
    /// First day covered; picks the student's latest contract
    pub start_date: Option<Date>,
    /// Last day covered
    pub end_date: Option<Date>,
    /// Full price before any discount
    pub total_amount: f64,
    /// Family discount in percent (0, 5 or 10)
    pub discount_percentage: f64,
    /// `total_amount * (1 - discount_percentage / 100)`
    pub discounted_amount: f64,
    /// Amount paid so far
    pub paid_amount: f64,
    /// Free-form note
    pub comment: String,
    /// When the contract was created
    pub created_at: DateTimeUtc,
    /// Soft delete marker
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between Contract and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each contract belongs to one student
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
