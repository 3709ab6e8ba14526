use std::path::PathBuf;

use mpa_core::config::{load_seed_file, LoadOptions};
use mpa_db::SqlSettingsStore;

use crate::commands::{with_migrated_pool, CommandResult};

/// Applies pending migrations. With a seed file (argument, `[settings] seed_file` or
/// `MPA_SETTINGS_SEED_FILE`), stores it as the first configuration snapshot when none exists.
pub fn run(seed: Option<PathBuf>) -> CommandResult {
    run_with(LoadOptions::default(), seed)
}

pub fn run_with(options: LoadOptions, seed: Option<PathBuf>) -> CommandResult {
    with_migrated_pool("migrate", options, |config, pool| async move {
        let seed_path = seed.or(config.settings.seed_file);
        let Some(seed_path) = seed_path else {
            return Ok("applied pending migrations".to_string());
        };

        let tree = load_seed_file(&seed_path)
            .map_err(|error| ("seed_file", error.to_string(), 6u8))?;
        let written = SqlSettingsStore::new(pool)
            .seed_if_empty(&tree)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 7u8))?;

        Ok(if written {
            format!("applied pending migrations; seeded configuration from {}", seed_path.display())
        } else {
            "applied pending migrations; configuration snapshot already present, seed skipped"
                .to_string()
        })
    })
}
