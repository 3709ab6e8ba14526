use mpa_core::config::LoadOptions;
use mpa_core::settings::{resolve, ConfigurationManager};
use mpa_db::SqlSettingsStore;

use crate::commands::{path_segments, with_migrated_pool, CommandResult};

pub fn run(fields: &[String]) -> CommandResult {
    run_with(LoadOptions::default(), fields)
}

pub fn run_with(options: LoadOptions, fields: &[String]) -> CommandResult {
    let path = path_segments(fields);
    with_migrated_pool("show", options, |_, pool| async move {
        let tree = SqlSettingsStore::new(pool)
            .current_config()
            .await
            .map_err(|error| ("settings_unavailable", error.to_string(), 6u8))?;
        let leaf = resolve(&tree, &path)
            .map_err(|error| ("path_resolution", error.to_string(), 7u8))?;

        Ok(format!("{} = {} ({})", leaf.path, leaf.current, leaf.kind))
    })
}
