use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mpa_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

fn entry(key: &'static str, value: impl Into<String>, env_key: Option<&'static str>) -> Entry {
    Entry { key, value: value.into(), env_key }
}

pub fn run() -> String {
    run_with(LoadOptions::default())
}

/// Renders the effective configuration with the source of every value. Tokens are redacted.
pub fn run_with(options: LoadOptions) -> String {
    let config_file_path = options.config_path.clone().or_else(detect_config_path);
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Entry { key, value, env_key } in entries(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let app_token = config
        .slack
        .app_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let seed_file = config
        .settings
        .seed_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string());
    let approvers = if config.workflow.approvers.is_empty() {
        "<role based>".to_string()
    } else {
        config.workflow.approvers.join(",")
    };

    vec![
        entry("database.url", &config.database.url, Some("MPA_DATABASE_URL")),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("MPA_DATABASE_MAX_CONNECTIONS"),
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("MPA_DATABASE_TIMEOUT_SECS"),
        ),
        entry(
            "slack.bot_token",
            redact_token(config.slack.bot_token.expose_secret()),
            Some("MPA_SLACK_BOT_TOKEN"),
        ),
        entry("slack.app_token", app_token, Some("MPA_SLACK_APP_TOKEN")),
        entry("slack.api_base_url", &config.slack.api_base_url, Some("MPA_SLACK_API_BASE_URL")),
        entry("slack.bot_username", &config.slack.bot_username, None),
        entry(
            "workflow.approver_role",
            &config.workflow.approver_role,
            Some("MPA_WORKFLOW_APPROVER_ROLE"),
        ),
        entry("workflow.approvers", approvers, Some("MPA_WORKFLOW_APPROVERS")),
        entry(
            "workflow.approvals_required",
            config.workflow.approvals_required.to_string(),
            Some("MPA_WORKFLOW_APPROVALS_REQUIRED"),
        ),
        entry(
            "workflow.max_attempts",
            config.workflow.max_attempts.to_string(),
            Some("MPA_WORKFLOW_MAX_ATTEMPTS"),
        ),
        entry(
            "workflow.pending_ttl_secs",
            config.workflow.pending_ttl_secs.to_string(),
            Some("MPA_WORKFLOW_PENDING_TTL_SECS"),
        ),
        entry(
            "workflow.finalize_lease_secs",
            config.workflow.finalize_lease_secs.to_string(),
            None,
        ),
        entry(
            "workflow.sweep_interval_secs",
            config.workflow.sweep_interval_secs.to_string(),
            Some("MPA_WORKFLOW_SWEEP_INTERVAL_SECS"),
        ),
        entry("directory.users", config.directory.users.len().to_string(), None),
        entry("server.bind_address", &config.server.bind_address, Some("MPA_SERVER_BIND_ADDRESS")),
        entry(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            Some("MPA_SERVER_HEALTH_CHECK_PORT"),
        ),
        entry("settings.seed_file", seed_file, Some("MPA_SETTINGS_SEED_FILE")),
        entry("logging.level", &config.logging.level, Some("MPA_LOGGING_LEVEL")),
        entry("logging.format", format!("{:?}", config.logging.format), Some("MPA_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("mpa.toml"), PathBuf::from("config/mpa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) => format!("{prefix}-***"),
        None => "<redacted>".to_string(),
    }
}
