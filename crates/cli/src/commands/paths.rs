use mpa_core::config::LoadOptions;
use mpa_core::settings::{enumerate_leaf_paths, ConfigurationManager};
use mpa_db::SqlSettingsStore;

use crate::commands::{with_migrated_pool, CommandResult};

/// Lists every leaf of the stored configuration with its kind, one per line.
pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    with_migrated_pool("paths", options, |_, pool| async move {
        let tree = SqlSettingsStore::new(pool)
            .current_config()
            .await
            .map_err(|error| ("settings_unavailable", error.to_string(), 6u8))?;

        let lines: Vec<String> = enumerate_leaf_paths(&tree)
            .iter()
            .map(|leaf| format!("{} ({})", leaf.path, leaf.kind_description()))
            .collect();
        if lines.is_empty() {
            return Ok("configuration has no leaf values".to_string());
        }
        Ok(lines.join("\n"))
    })
}
