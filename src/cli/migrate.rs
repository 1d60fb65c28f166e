// src/cli/migrate.rs — Database migration command
//
// Migrations run whenever the store is opened; this command shows what has
// been applied and can revert the newest migration.

use crate::memory::schema;

/// Show migration status, roll back one version, or apply pending ones.
pub fn run_migrate(status_only: bool, rollback: bool) -> anyhow::Result<()> {
    let db_path = crate::infra::paths::db_path();

    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        println!("Create a task with `promptkoi create` to initialize it.");
        return Ok(());
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = rusqlite::Connection::open(&db_path)?;

    if status_only {
        return show_migration_status(&conn);
    }

    if rollback {
        return run_rollback(&conn);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");

    show_migration_status(&conn)
}

fn show_migration_status(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let version = schema::current_version(conn)?;

    println!("Database: {}", crate::infra::paths::db_path().display());
    println!("Current schema version: {}", version);
    println!("Latest known version:   {}", schema::latest_version());
    println!();

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut any = false;
    for row in rows {
        if !any {
            println!("Applied migrations:");
            any = true;
        }
        let (version, name, applied_at) = row?;
        println!("  v{}: {} (applied {})", version, name, applied_at);
    }
    if !any {
        println!("No migrations have been run yet.");
    }

    Ok(())
}

/// Revert the most recent migration, running its down SQL.
fn run_rollback(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let version = schema::current_version(conn)?;
    if version == 0 {
        println!("No migrations to roll back.");
        return Ok(());
    }

    println!("Rolling back migration v{}...", version);
    println!("WARNING: data in tables created by this migration is dropped.");
    schema::rollback_to(conn, version - 1)?;
    println!("Now at schema version {}.", schema::current_version(conn)?);
    Ok(())
}
