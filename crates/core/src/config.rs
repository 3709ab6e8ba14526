use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::{
    ApproverPolicy, ModificationPolicy, RequesterAllowList, RoleApproverPolicy,
    StaticApproverPolicy, DEFAULT_APPROVER_ROLE,
};
use crate::directory::{DirectoryUser, StaticDirectory};
use crate::domain::authorization::UserId;
use crate::notify::BotIdentity;
use crate::settings::SettingValue;
use crate::workflow::WorkflowConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub workflow: WorkflowSettings,
    pub directory: DirectoryConfig,
    pub server: ServerConfig,
    pub settings: SettingsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub app_token: Option<SecretString>,
    pub api_base_url: String,
    pub bot_username: String,
    pub bot_display_name: String,
    pub bot_description: String,
}

/// Approval rules. An empty `approvers` list means "the first directory user holding
/// `approver_role`", which always needs a single approval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub approver_role: String,
    pub approvers: Vec<String>,
    pub approvals_required: u32,
    pub allowed_requesters: Vec<String>,
    pub max_attempts: u32,
    pub pending_ttl_secs: u64,
    pub finalize_lease_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUserConfig {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub users: Vec<DirectoryUserConfig>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SettingsConfig {
    /// JSON or TOML snapshot imported when the settings table is still empty.
    pub seed_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub approvals_required: Option<u32>,
    pub settings_seed_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let bot = BotIdentity::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://mpa.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                app_token: None,
                api_base_url: "https://slack.com/api".to_string(),
                bot_username: bot.username,
                bot_display_name: bot.display_name,
                bot_description: bot.description,
            },
            workflow: WorkflowSettings::default(),
            directory: DirectoryConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            settings: SettingsConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let engine = WorkflowConfig::default();
        Self {
            approver_role: DEFAULT_APPROVER_ROLE.to_string(),
            approvers: Vec::new(),
            approvals_required: 1,
            allowed_requesters: Vec::new(),
            max_attempts: engine.max_attempts,
            pending_ttl_secs: 24 * 60 * 60,
            finalize_lease_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

impl WorkflowSettings {
    pub fn engine_config(&self) -> WorkflowConfig {
        let pending_ttl = match self.pending_ttl_secs {
            0 => None,
            secs => Some(seconds(secs)),
        };
        WorkflowConfig {
            max_attempts: self.max_attempts,
            pending_ttl,
            finalize_lease: seconds(self.finalize_lease_secs),
        }
    }

    pub fn approver_policy(&self) -> Arc<dyn ApproverPolicy> {
        if self.approvers.is_empty() {
            Arc::new(RoleApproverPolicy::new(self.approver_role.clone()))
        } else {
            Arc::new(StaticApproverPolicy::new(
                self.approvers.iter().map(|id| UserId::new(id.as_str())).collect(),
                self.approvals_required,
            ))
        }
    }

    pub fn modification_policy(&self) -> Arc<dyn ModificationPolicy> {
        Arc::new(RequesterAllowList::new(&self.allowed_requesters))
    }

    /// Human-readable summary used by `mpa doctor` and startup logs.
    pub fn describe_policy(&self) -> String {
        if self.approvers.is_empty() {
            format!("first user with role `{}`, 1 approval", self.approver_role)
        } else {
            format!(
                "{} of {} configured approver(s)",
                self.approvals_required,
                self.approvers.len()
            )
        }
    }
}

impl DirectoryConfig {
    pub fn build(&self) -> StaticDirectory {
        StaticDirectory::new(self.users.iter().map(|user| DirectoryUser {
            id: UserId::new(user.id.as_str()),
            username: user.username.clone(),
            roles: user.roles.clone(),
        }))
    }
}

impl SettingsConfig {
    /// Reads the configured seed snapshot, if any.
    pub fn load_seed(&self) -> Result<Option<SettingValue>, ConfigError> {
        self.seed_file.as_deref().map(load_seed_file).transpose()
    }
}

/// Parses a plain configuration document (`.toml`, otherwise JSON) into a settings tree.
pub fn load_seed_file(path: &Path) -> Result<SettingValue, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let is_toml = path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));

    let document: serde_json::Value = if is_toml {
        let parsed: toml::Value = toml::from_str(&raw)
            .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;
        serde_json::to_value(parsed).map_err(|error| {
            ConfigError::Validation(format!("seed file `{}`: {error}", path.display()))
        })?
    } else {
        serde_json::from_str(&raw).map_err(|error| {
            let path = path.display();
            ConfigError::Validation(format!("seed file `{path}` is not valid JSON: {error}"))
        })?
    };

    if !document.is_object() {
        return Err(ConfigError::Validation(format!(
            "seed file `{}` must contain an object at the top level",
            path.display()
        )));
    }
    Ok(SettingValue::from_plain_json(&document))
}

impl SlackConfig {
    pub fn bot_identity(&self) -> BotIdentity {
        BotIdentity {
            username: self.bot_username.clone(),
            display_name: self.bot_display_name.clone(),
            description: self.bot_description.clone(),
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("mpa.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = Some(secret_value(app_token));
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(bot_username) = slack.bot_username {
                self.slack.bot_username = bot_username;
            }
            if let Some(bot_display_name) = slack.bot_display_name {
                self.slack.bot_display_name = bot_display_name;
            }
            if let Some(bot_description) = slack.bot_description {
                self.slack.bot_description = bot_description;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(approver_role) = workflow.approver_role {
                self.workflow.approver_role = approver_role;
            }
            if let Some(approvers) = workflow.approvers {
                self.workflow.approvers = approvers;
            }
            if let Some(approvals_required) = workflow.approvals_required {
                self.workflow.approvals_required = approvals_required;
            }
            if let Some(allowed_requesters) = workflow.allowed_requesters {
                self.workflow.allowed_requesters = allowed_requesters;
            }
            if let Some(max_attempts) = workflow.max_attempts {
                self.workflow.max_attempts = max_attempts;
            }
            if let Some(pending_ttl_secs) = workflow.pending_ttl_secs {
                self.workflow.pending_ttl_secs = pending_ttl_secs;
            }
            if let Some(finalize_lease_secs) = workflow.finalize_lease_secs {
                self.workflow.finalize_lease_secs = finalize_lease_secs;
            }
            if let Some(sweep_interval_secs) = workflow.sweep_interval_secs {
                self.workflow.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(directory) = patch.directory {
            if let Some(users) = directory.users {
                self.directory.users = users;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(settings) = patch.settings {
            if let Some(seed_file) = settings.seed_file {
                self.settings.seed_file = Some(seed_file);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MPA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MPA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("MPA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MPA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MPA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MPA_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("MPA_SLACK_APP_TOKEN") {
            self.slack.app_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("MPA_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("MPA_WORKFLOW_APPROVER_ROLE") {
            self.workflow.approver_role = value;
        }
        if let Some(value) = read_env("MPA_WORKFLOW_APPROVERS") {
            self.workflow.approvers = split_list(&value);
        }
        if let Some(value) = read_env("MPA_WORKFLOW_APPROVALS_REQUIRED") {
            self.workflow.approvals_required =
                parse_u32("MPA_WORKFLOW_APPROVALS_REQUIRED", &value)?;
        }
        if let Some(value) = read_env("MPA_WORKFLOW_ALLOWED_REQUESTERS") {
            self.workflow.allowed_requesters = split_list(&value);
        }
        if let Some(value) = read_env("MPA_WORKFLOW_MAX_ATTEMPTS") {
            self.workflow.max_attempts = parse_u32("MPA_WORKFLOW_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("MPA_WORKFLOW_PENDING_TTL_SECS") {
            self.workflow.pending_ttl_secs = parse_u64("MPA_WORKFLOW_PENDING_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("MPA_WORKFLOW_SWEEP_INTERVAL_SECS") {
            self.workflow.sweep_interval_secs =
                parse_u64("MPA_WORKFLOW_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("MPA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MPA_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("MPA_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("MPA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MPA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("MPA_SETTINGS_SEED_FILE") {
            self.settings.seed_file = Some(PathBuf::from(value));
        }

        let log_level = read_env("MPA_LOGGING_LEVEL").or_else(|| read_env("MPA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("MPA_LOGGING_FORMAT").or_else(|| read_env("MPA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(app_token) = overrides.slack_app_token {
            self.slack.app_token = Some(secret_value(app_token));
        }
        if let Some(approvals_required) = overrides.approvals_required {
            self.workflow.approvals_required = approvals_required;
        }
        if let Some(seed_file) = overrides.settings_seed_file {
            self.settings.seed_file = Some(seed_file);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_workflow(&self.workflow)?;
        validate_directory(&self.directory)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("mpa.toml"), PathBuf::from("config/mpa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if let Some(app_token) = &slack.app_token {
        if !app_token.expose_secret().starts_with("xapp-") {
            return Err(ConfigError::Validation(
                "slack.app_token must start with `xapp-` when set".to_string(),
            ));
        }
    }

    let base = slack.api_base_url.trim();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.bot_username.trim().is_empty() {
        return Err(ConfigError::Validation("slack.bot_username must not be empty".to_string()));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowSettings) -> Result<(), ConfigError> {
    if workflow.approvals_required == 0 {
        return Err(ConfigError::Validation(
            "workflow.approvals_required must be greater than zero".to_string(),
        ));
    }

    if workflow.approvers.is_empty() {
        if workflow.approver_role.trim().is_empty() {
            return Err(ConfigError::Validation(
                "workflow.approver_role is required when workflow.approvers is empty".to_string(),
            ));
        }
        if workflow.approvals_required != 1 {
            return Err(ConfigError::Validation(
                "workflow.approvals_required above 1 needs an explicit workflow.approvers list"
                    .to_string(),
            ));
        }
    } else if (workflow.approvals_required as usize) > workflow.approvers.len() {
        return Err(ConfigError::Validation(format!(
            "workflow.approvals_required ({}) exceeds the number of workflow.approvers ({})",
            workflow.approvals_required,
            workflow.approvers.len()
        )));
    }

    if workflow.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "workflow.max_attempts must be greater than zero".to_string(),
        ));
    }

    if workflow.finalize_lease_secs == 0 {
        return Err(ConfigError::Validation(
            "workflow.finalize_lease_secs must be greater than zero".to_string(),
        ));
    }

    if workflow.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "workflow.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_directory(directory: &DirectoryConfig) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for user in &directory.users {
        if user.id.trim().is_empty() || user.username.trim().is_empty() {
            return Err(ConfigError::Validation(
                "directory.users entries need a non-empty id and username".to_string(),
            ));
        }
        if !seen.insert(user.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "directory.users contains duplicate id `{}`",
                user.id
            )));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    workflow: Option<WorkflowPatch>,
    directory: Option<DirectoryPatch>,
    server: Option<ServerPatch>,
    settings: Option<SettingsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    app_token: Option<String>,
    api_base_url: Option<String>,
    bot_username: Option<String>,
    bot_display_name: Option<String>,
    bot_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    approver_role: Option<String>,
    approvers: Option<Vec<String>>,
    approvals_required: Option<u32>,
    allowed_requesters: Option<Vec<String>>,
    max_attempts: Option<u32>,
    pending_ttl_secs: Option<u64>,
    finalize_lease_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryPatch {
    users: Option<Vec<DirectoryUserConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsPatch {
    seed_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
