// src/cli/export.rs — Task export/import commands
//
// Snapshots are the same camelCase JSON the store persists, so an exported
// task can be inspected, versioned, or moved to another machine.

use std::path::Path;

use crate::core::engine::IterationEngine;
use crate::memory;

/// Write one task snapshot to a file, or stdout.
pub fn run_export(
    engine: &IterationEngine,
    task_id: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let json = memory::export_task(engine.store(), task_id)?;

    if let Some(path) = output {
        std::fs::write(path, &json)?;
        println!("Exported task {} to {}", task_id, path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

/// Load a task snapshot from a file.
pub fn run_import(engine: &IterationEngine, file: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", file.display()))?;
    let task = memory::import_task(engine.store(), &json)?;
    println!(
        "Imported task {} ({}, {} iterations)",
        task.id,
        task.status,
        task.prompt_iterations.len()
    );
    Ok(())
}
