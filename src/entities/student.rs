//! Student entity - A person enrolled (or once enrolled) at the school.
//!
//! `family_order` holds the student's zero-based rank inside their sibling
//! group, or the singleton sentinel when they have no relatives on record.
//! Rows are never removed; `deleted_at` marks a soft delete.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Student database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "students")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier for the student
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Family name
    pub last_name: String,
    /// Given name
    pub first_name: String,
    /// Patronymic, if any
    pub middle_name: Option<String>,
    /// National identification number; unique among active students
    pub iin: Option<String>,
    /// Date of birth, used to rank siblings (older first)
    pub birth_date: Option<Date>,
    /// Enrollment date
    pub start_date: Option<Date>,
    /// Whether the student currently attends
    pub is_studying: bool,
    /// Rank inside the family component, `999` when the student has no family
    pub family_order: i32,
    /// When the record was created; breaks ties between equal ranks
    pub created_at: DateTimeUtc,
    /// When the record was last modified
    pub updated_at: DateTimeUtc,
    /// Soft delete marker
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between Student and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One student has many contracts
    #[sea_orm(has_many = "super::contract::Entity")]
    Contracts,
    /// Outgoing sibling edges
    #[sea_orm(has_many = "super::family_link::Entity")]
    FamilyLinks,
}

impl Related<super::contract::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contracts.def()
    }
}

impl Related<super::family_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FamilyLinks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
