// src/cli/migrate.rs — Schema status and manual rollback
//
// Migrations run automatically whenever the database is opened; this
// command exposes the applied set and can roll back to an older version.

use std::path::Path;

use rusqlite::Connection;

use crate::memory::schema;

pub async fn run_migrate(db_path: &Path, status_only: bool, rollback: Option<u32>) -> anyhow::Result<()> {
    if !db_path.exists() && (status_only || rollback.is_some()) {
        println!("No database found at: {}", db_path.display());
        println!("Run `homeminer analyze` to create it.");
        return Ok(());
    }

    let conn = Connection::open(db_path)?;

    if status_only {
        return show_migration_status(&conn, db_path);
    }

    if let Some(target) = rollback {
        let current = schema::current_version(&conn)?;
        if target >= current {
            println!("Schema already at v{current}; nothing to roll back.");
            return Ok(());
        }
        println!("Rolling back schema v{current} -> v{target}...");
        schema::rollback_to(&conn, target)?;
        return show_migration_status(&conn, db_path);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");
    show_migration_status(&conn, db_path)
}

fn show_migration_status(conn: &Connection, db_path: &Path) -> anyhow::Result<()> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='_migrations'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        println!("No migrations have been run yet.");
        return Ok(());
    }

    println!("Database: {}", db_path.display());
    println!("Current schema version: {}", schema::current_version(conn)?);

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (version, name, applied_at) = row?;
        println!("  v{version}: {name} (applied {applied_at})");
    }
    Ok(())
}
