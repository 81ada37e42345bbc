pub mod schema;
pub mod ledger;
pub mod roster;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open the registry database, creating its tables on first use.
pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let db_path = db_path.as_ref();
    let conn = Connection::open(db_path).with_context(|| format!("Failed to open registry {:?}", db_path))?;
    schema::apply_pragmas(&conn)?;
    schema::apply_registry_schema(&conn)?;
    Ok(conn)
}
