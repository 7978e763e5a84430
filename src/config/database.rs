//! Database configuration module.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! structs. The only hand-built piece is the composite unique index on
//! `family_links(student_id, relative_id)`, which entity attributes cannot express.

use crate::entities::{Contract, FamilyLink, Student, family_link};
use crate::errors::Result;
use sea_orm::sea_query::{Index, TableCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use std::path::Path;

/// Fallback used when neither `DATABASE_URL` nor the config file name a database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/school_office.sqlite?mode=rwc";

/// File path of a `sqlite://` URL, or `None` for in-memory and other backends.
fn sqlite_file_path(database_url: &str) -> Option<&Path> {
    let rest = database_url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(Path::new(path))
}

/// Establishes a connection to the database at `database_url`.
///
/// For a `SQLite` file the parent directory is created first, since
/// `mode=rwc` creates the file but not the folder it lives in.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    tracing::debug!(database_url, "Connecting to database");
    if let Some(parent) = sqlite_file_path(database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all tables (and the family link pair index) if they do not exist yet.
///
/// Safe to call on every start-up.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let tables: [TableCreateStatement; 3] = [
        schema.create_table_from_entity(Student),
        schema.create_table_from_entity(FamilyLink),
        schema.create_table_from_entity(Contract),
    ];
    for mut table in tables {
        table.if_not_exists();
        db.execute(builder.build(&table)).await?;
    }

    let link_pair_index = Index::create()
        .name("idx_family_links_pair")
        .table(FamilyLink)
        .col(family_link::Column::StudentId)
        .col(family_link::Column::RelativeId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&link_pair_index)).await?;

    Ok(())
}
