//! Family link entity - One direction of a sibling relationship.
//!
//! Siblings are stored as a pair of mirrored rows, `(a, b)` and `(b, a)`.
//! The `(student_id, relative_id)` pair is unique; re-linking a pair restores
//! the soft-deleted row instead of inserting a new one.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Family link database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "family_links")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier for the link
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Student the edge starts from
    pub student_id: i64,
    /// Student the edge points to
    pub relative_id: i64,
    /// Free-form label such as "sibling"
    pub relationship_type: String,
    /// When the link was first created
    pub created_at: DateTimeUtc,
    /// Soft delete marker
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,

    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::RelativeId",
        to = "super::student::Column::Id"
    )]
    Relative,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
