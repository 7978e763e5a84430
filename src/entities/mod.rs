//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod contract;
pub mod family_link;
pub mod student;

// Re-export specific types to avoid conflicts
pub use contract::{Column as ContractColumn, Entity as Contract, Model as ContractModel};
pub use family_link::{
    Column as FamilyLinkColumn, Entity as FamilyLink, Model as FamilyLinkModel,
};
pub use student::{Column as StudentColumn, Entity as Student, Model as StudentModel};
