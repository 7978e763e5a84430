//! Unified error type for the school office back end.
//!
//! Storage failures and the various "not found" cases are kept apart so the
//! HTTP layer can map them to status codes; background jobs only ever log them.

use thiserror::Error;

/// Every error the crate can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file or environment problem
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Query or update failed in the storage layer
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error (config file, listener socket)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No non-deleted student with this id
    #[error("Student not found: {id}")]
    StudentNotFound {
        /// Requested student id
        id: i64,
    },

    /// No non-deleted family link with this id
    #[error("Family link not found: {id}")]
    FamilyLinkNotFound {
        /// Requested link id
        id: i64,
    },

    /// No non-deleted contract with this id
    #[error("Contract not found: {id}")]
    ContractNotFound {
        /// Requested contract id
        id: i64,
    },

    /// A student was linked to themselves
    #[error("Student {id} cannot be a relative of themselves")]
    SelfRelation {
        /// The student id on both ends of the link
        id: i64,
    },

    /// Another active student already holds this IIN
    #[error("A student with IIN {iin} already exists")]
    DuplicateIin {
        /// The conflicting IIN
        iin: String,
    },

    /// Request data failed validation
    #[error("Invalid input: {message}")]
    Validation {
        /// Which field and why
        message: String,
    },

    /// Money amount is negative, NaN or infinite
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: f64,
    },

    /// A background family job panicked or was cancelled
    #[error("Background job failed: {message}")]
    Job {
        /// Join error description
        message: String,
    },
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
