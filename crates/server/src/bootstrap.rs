use std::sync::Arc;

use mpa_core::audit::TracingAuditSink;
use mpa_core::config::{AppConfig, ConfigError, LoadOptions};
use mpa_core::notify::{NotificationDelivery, NotificationSynchronizer};
use mpa_core::settings::SettingsStoreError;
use mpa_core::workflow::{AuthorizationWorkflow, WorkflowContext};
use mpa_db::{connect_with_config, migrations, DbPool, SqlAuthorizationStore, SqlSettingsStore};
use mpa_slack::delivery::{SlackNotificationDelivery, SlackWebApiClient};
use mpa_slack::events::workflow_dispatcher;
use mpa_slack::socket::{NoopSocketTransport, ReconnectPolicy, SocketModeRunner};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<AuthorizationWorkflow>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("settings seed failed: {0}")]
    Seed(#[from] SettingsStoreError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let client =
        SlackWebApiClient::new(config.slack.api_base_url.clone(), config.slack.bot_token.clone());
    let delivery = Arc::new(SlackNotificationDelivery::new(Arc::new(client)));
    bootstrap_with_delivery(config, delivery).await
}

/// Connects, migrates, seeds the settings store and assembles the workflow around `delivery`.
pub async fn bootstrap_with_delivery(
    config: AppConfig,
    delivery: Arc<dyn NotificationDelivery>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let settings = SqlSettingsStore::new(db_pool.clone());
    if let Some(seed) = config.settings.load_seed()? {
        settings.seed_if_empty(&seed).await?;
    }
    if settings.latest_revision().await?.is_none() {
        warn!(
            event_name = "system.bootstrap.settings_empty",
            correlation_id = "bootstrap",
            "no configuration snapshot stored; submissions fail until one is seeded"
        );
    }

    let workflow = Arc::new(build_workflow(&config, &db_pool, settings, delivery));
    info!(
        event_name = "system.bootstrap.workflow_ready",
        correlation_id = "bootstrap",
        policy = %config.workflow.describe_policy(),
        directory_users = config.directory.users.len(),
        "authorization workflow assembled"
    );

    let slack_runner = SocketModeRunner::new(
        Arc::new(NoopSocketTransport),
        workflow_dispatcher(workflow.clone()),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, db_pool, workflow, slack_runner })
}

fn build_workflow(
    config: &AppConfig,
    db_pool: &DbPool,
    settings: SqlSettingsStore,
    delivery: Arc<dyn NotificationDelivery>,
) -> AuthorizationWorkflow {
    let directory = Arc::new(config.directory.build());
    let notifier =
        NotificationSynchronizer::new(delivery, directory.clone(), config.slack.bot_identity());

    AuthorizationWorkflow::new(
        WorkflowContext {
            store: Arc::new(SqlAuthorizationStore::new(db_pool.clone())),
            settings: Arc::new(settings),
            directory,
            modification_policy: config.workflow.modification_policy(),
            approver_policy: config.workflow.approver_policy(),
            notifier,
            audit: Arc::new(TracingAuditSink),
        },
        config.workflow.engine_config(),
    )
}
