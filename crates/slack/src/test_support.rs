use std::sync::Arc;

use mpa_core::approvals::{AllowAllModifications, StaticApproverPolicy};
use mpa_core::audit::InMemoryAuditSink;
use mpa_core::directory::StaticDirectory;
use mpa_core::domain::UserId;
use mpa_core::notify::{BotIdentity, NotificationSynchronizer, RecordingDelivery};
use mpa_core::settings::{InMemorySettingsStore, SettingValue};
use mpa_core::store::InMemoryAuthorizationStore;
use mpa_core::workflow::{AuthorizationWorkflow, WorkflowConfig, WorkflowContext};

pub(crate) struct Fixture {
    pub workflow: Arc<AuthorizationWorkflow>,
    pub delivery: RecordingDelivery,
}

pub(crate) fn settings_tree() -> SettingValue {
    SettingValue::section([
        (
            "ServiceSettings",
            SettingValue::section([
                ("SiteURL", SettingValue::String("https://old.example.com".to_string())),
                ("EnableDeveloper", SettingValue::Bool(false)),
                ("TrustedProxyIPHeader", SettingValue::List(vec![])),
            ]),
        ),
        ("TeamSettings", SettingValue::section([("MaxUsersPerTeam", SettingValue::Int64(50))])),
    ])
}

/// Workflow over in-memory collaborators where `U-alice` and `U-carol` must both approve.
pub(crate) fn fixture() -> Fixture {
    let directory = Arc::new(
        StaticDirectory::default()
            .with_user("U-alice", "alice", &["system_admin"])
            .with_user("U-bob", "bob", &[])
            .with_user("U-carol", "carol", &[]),
    );
    let delivery = RecordingDelivery::default();
    let notifier = NotificationSynchronizer::new(
        Arc::new(delivery.clone()),
        directory.clone(),
        BotIdentity::default(),
    );
    let workflow = AuthorizationWorkflow::new(
        WorkflowContext {
            store: Arc::new(InMemoryAuthorizationStore::default()),
            settings: Arc::new(InMemorySettingsStore::new(settings_tree())),
            directory,
            modification_policy: Arc::new(AllowAllModifications),
            approver_policy: Arc::new(StaticApproverPolicy::new(
                vec![UserId::new("U-alice"), UserId::new("U-carol")],
                2,
            )),
            notifier,
            audit: Arc::new(InMemoryAuditSink::default()),
        },
        WorkflowConfig::default(),
    );
    Fixture { workflow: Arc::new(workflow), delivery }
}
