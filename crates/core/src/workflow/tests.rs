use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{ActionOutcome, AuthorizationWorkflow, WorkflowConfig, WorkflowContext, WorkflowError};
use crate::approvals::{
    AllowAllModifications, ApproverPolicy, ModificationPolicy, RequesterAllowList,
    RoleApproverPolicy, StaticApproverPolicy,
};
use crate::audit::InMemoryAuditSink;
use crate::directory::StaticDirectory;
use crate::domain::authorization::{
    AuthorizationId, AuthorizationRecord, AuthorizationStatus, FinalizeClaim, ResolutionReason,
    UserId,
};
use crate::notify::{ActionKind, BotIdentity, NotificationSynchronizer, RecordingDelivery};
use crate::settings::{
    apply, resolve, ConfigurationManager, InMemorySettingsStore, LeafKind, LeafValue, SettingKind,
    SettingValue, SettingsStoreError,
};
use crate::store::{AuthorizationStore, InMemoryAuthorizationStore, StoreError};

fn settings_tree() -> SettingValue {
    SettingValue::section([
        (
            "ServiceSettings",
            SettingValue::section([
                ("SiteURL", SettingValue::String(String::new())),
                ("EnableDeveloper", SettingValue::Bool(false)),
                ("MaximumLoginAttempts", SettingValue::Int32(10)),
                ("TrustedProxyIPHeader", SettingValue::List(vec![])),
            ]),
        ),
        ("TeamSettings", SettingValue::section([("MaxUsersPerTeam", SettingValue::Int64(50))])),
    ])
}

fn directory() -> StaticDirectory {
    ["alice", "bob", "carol", "dave", "erin", "frank", "gina", "eve"].into_iter().fold(
        StaticDirectory::default(),
        |directory, name| {
            let roles: &[&str] = if name == "alice" { &["system_admin"] } else { &[] };
            directory.with_user(name, name, roles)
        },
    )
}

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|segment| segment.to_string()).collect()
}

fn user(name: &str) -> UserId {
    UserId::new(name)
}

/// Settings store whose saves can be switched off or slowed down on either side of the commit.
struct ToggleSettings {
    inner: InMemorySettingsStore,
    fail_saves: AtomicBool,
    stall_before_save_ms: AtomicU64,
    stall_after_save_ms: AtomicU64,
}

async fn stall(millis: &AtomicU64) {
    let millis = millis.load(Ordering::SeqCst);
    if millis > 0 {
        tokio::time::sleep(StdDuration::from_millis(millis)).await;
    }
}

#[async_trait]
impl ConfigurationManager for ToggleSettings {
    async fn current_config(&self) -> Result<SettingValue, SettingsStoreError> {
        self.inner.current_config().await
    }

    async fn save_config(&self, config: SettingValue) -> Result<(), SettingsStoreError> {
        stall(&self.stall_before_save_ms).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SettingsStoreError::Storage("disk full".to_string()));
        }
        self.inner.save_config(config).await?;
        stall(&self.stall_after_save_ms).await;
        Ok(())
    }
}

/// Store that loses the next `forced` compare-and-set calls and can refuse inserts.
#[derive(Default)]
struct RacingStore {
    inner: InMemoryAuthorizationStore,
    forced: AtomicU32,
    fail_inserts: AtomicBool,
}

#[async_trait]
impl AuthorizationStore for RacingStore {
    async fn get(
        &self,
        id: &AuthorizationId,
    ) -> Result<Option<(AuthorizationRecord, u64)>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, record: AuthorizationRecord) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database is locked".to_string()));
        }
        self.inner.insert(record).await
    }

    async fn compare_and_set(
        &self,
        id: &AuthorizationId,
        expected_version: u64,
        record: AuthorizationRecord,
    ) -> Result<bool, StoreError> {
        let lost = self
            .forced
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner.compare_and_set(id, expected_version, record).await
    }

    async fn list_pending(&self) -> Result<Vec<AuthorizationId>, StoreError> {
        self.inner.list_pending().await
    }
}

struct Harness {
    workflow: Arc<AuthorizationWorkflow>,
    store: Arc<RacingStore>,
    settings: Arc<ToggleSettings>,
    delivery: RecordingDelivery,
    audit: InMemoryAuditSink,
}

struct HarnessOptions {
    approver_policy: Arc<dyn ApproverPolicy>,
    modification_policy: Arc<dyn ModificationPolicy>,
    config: WorkflowConfig,
    delivery: RecordingDelivery,
}

impl HarnessOptions {
    fn quorum(approvers: &[&str], required: u32) -> Self {
        Self {
            approver_policy: Arc::new(StaticApproverPolicy::new(
                approvers.iter().map(|name| user(name)).collect(),
                required,
            )),
            modification_policy: Arc::new(AllowAllModifications),
            config: WorkflowConfig::default(),
            delivery: RecordingDelivery::default(),
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let store = Arc::new(RacingStore::default());
    let settings = Arc::new(ToggleSettings {
        inner: InMemorySettingsStore::new(settings_tree()),
        fail_saves: AtomicBool::new(false),
        stall_before_save_ms: AtomicU64::new(0),
        stall_after_save_ms: AtomicU64::new(0),
    });
    let directory = Arc::new(directory());
    let audit = InMemoryAuditSink::default();
    let notifier = NotificationSynchronizer::new(
        Arc::new(options.delivery.clone()),
        directory.clone(),
        BotIdentity::default(),
    );
    let workflow = AuthorizationWorkflow::new(
        WorkflowContext {
            store: store.clone(),
            settings: settings.clone(),
            directory,
            modification_policy: options.modification_policy,
            approver_policy: options.approver_policy,
            notifier,
            audit: Arc::new(audit.clone()),
        },
        options.config,
    );
    Harness { workflow: Arc::new(workflow), store, settings, delivery: options.delivery, audit }
}

impl Harness {
    async fn stored(&self, id: &AuthorizationId) -> AuthorizationRecord {
        self.workflow.record(id).await.expect("record exists")
    }

    async fn current(&self, segments: &[&str]) -> String {
        let tree = self.settings.current_config().await.expect("settings");
        resolve(&tree, &path(segments)).expect("leaf").current
    }
}

#[tokio::test]
async fn single_approver_quorum_applies_site_url() {
    let h = harness(HarnessOptions {
        approver_policy: Arc::new(RoleApproverPolicy::default()),
        ..HarnessOptions::quorum(&[], 1)
    });

    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    let receipt = h.workflow.approve(&id, &user("alice")).await.expect("approve");

    assert_eq!(receipt.outcome, ActionOutcome::Applied);
    assert_eq!(receipt.status, AuthorizationStatus::Applied);
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "https://x");
    assert_eq!(h.settings.inner.revision_count().await, 1);
    assert_eq!(h.audit.events_of_type("mpa.apply.committed").len(), 1);
}

#[tokio::test]
async fn invalid_bool_value_creates_nothing() {
    let h = harness(HarnessOptions::quorum(&["alice"], 1));

    let result = h
        .workflow
        .submit(&path(&["ServiceSettings", "EnableDeveloper"]), "maybe", &user("bob"))
        .await;

    assert_eq!(
        result,
        Err(WorkflowError::InvalidValue { kind: LeafKind::Bool, value: "maybe".to_string() })
    );
    assert!(h.store.inner.is_empty().await);
    assert!(h.delivery.messages().is_empty());
}

#[tokio::test]
async fn submission_rejects_bad_paths_and_unsupported_leaves() {
    let h = harness(HarnessOptions::quorum(&["alice"], 1));
    let bob = user("bob");

    let missing = h.workflow.submit(&path(&["ServiceSettings", "Nope"]), "1", &bob).await;
    assert!(matches!(missing, Err(WorkflowError::InvalidPath(_))));

    let section = h.workflow.submit(&path(&["TeamSettings"]), "1", &bob).await;
    assert!(matches!(section, Err(WorkflowError::NotALeaf(_))));

    let list =
        h.workflow.submit(&path(&["ServiceSettings", "TrustedProxyIPHeader"]), "x", &bob).await;
    assert!(matches!(list, Err(WorkflowError::UnsupportedType { kind: SettingKind::List, .. })));

    let empty = h.workflow.submit(&[], "x", &bob).await;
    assert!(matches!(empty, Err(WorkflowError::InvalidPath(_))));

    let too_big = h
        .workflow
        .submit(&path(&["ServiceSettings", "MaximumLoginAttempts"]), "2147483648", &bob)
        .await;
    assert!(matches!(too_big, Err(WorkflowError::InvalidValue { kind: LeafKind::Int32, .. })));

    assert!(h.store.inner.is_empty().await);
}

#[tokio::test]
async fn submission_stores_canonical_path_and_value() {
    let h = harness(HarnessOptions::quorum(&["alice"], 1));

    let id = h
        .workflow
        .submit(&path(&["teamsettings", "maxusersperteam"]), "+75", &user("bob"))
        .await
        .expect("submit");
    let record = h.stored(&id).await;

    assert_eq!(record.field_path.to_string(), "TeamSettings->MaxUsersPerTeam");
    assert_eq!(record.proposed_value, "75");
    assert_eq!(record.status, AuthorizationStatus::Pending);
    assert!(record.expires_at.is_some());
    assert!(record.requester_handle.is_some());
}

#[tokio::test]
async fn modification_policy_can_refuse_requester() {
    let h = harness(HarnessOptions {
        modification_policy: Arc::new(RequesterAllowList::new(["carol"])),
        ..HarnessOptions::quorum(&["alice"], 1)
    });

    let result =
        h.workflow.submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob")).await;

    assert!(matches!(result, Err(WorkflowError::PermissionDenied(_))));
    assert!(h.store.inner.is_empty().await);
    assert_eq!(h.audit.events_of_type("mpa.submit.rejected").len(), 1);
}

#[tokio::test]
async fn quorum_of_two_needs_two_distinct_approvers() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol", "dave"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "MaximumLoginAttempts"]), "3", &user("bob"))
        .await
        .expect("submit");

    let first = h.workflow.approve(&id, &user("alice")).await.expect("first");
    assert_eq!(first.outcome, ActionOutcome::ApprovalRecorded);
    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Pending);
    assert_eq!(record.approvals.iter().cloned().collect::<Vec<_>>(), vec![user("alice")]);
    assert_eq!(h.current(&["ServiceSettings", "MaximumLoginAttempts"]).await, "10");

    let again = h.workflow.approve(&id, &user("alice")).await.expect("idempotent");
    assert_eq!(again.outcome, ActionOutcome::AlreadyApproved);
    assert_eq!(again.approvals, 1);
    assert_eq!(h.stored(&id).await.version, record.version);

    let second = h.workflow.approve(&id, &user("carol")).await.expect("second");
    assert_eq!(second.outcome, ActionOutcome::Applied);
    assert_eq!(second.approvals, 2);
    assert_eq!(h.current(&["ServiceSettings", "MaximumLoginAttempts"]).await, "3");
}

#[tokio::test]
async fn deny_closes_request_and_blocks_later_approvals() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol", "dave"], 3));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "EnableDeveloper"]), "true", &user("bob"))
        .await
        .expect("submit");
    h.workflow.approve(&id, &user("alice")).await.expect("partial approval");

    let denied = h.workflow.deny(&id, &user("dave")).await.expect("deny");
    assert_eq!(denied.status, AuthorizationStatus::Denied);

    let late = h.workflow.approve(&id, &user("carol")).await;
    assert_eq!(late, Err(WorkflowError::AlreadyFinalized(AuthorizationStatus::Denied)));
    assert_eq!(h.current(&["ServiceSettings", "EnableDeveloper"]).await, "false");

    let record = h.stored(&id).await;
    assert_eq!(record.resolution.and_then(|resolution| resolution.actor), Some(user("dave")));
}

#[tokio::test]
async fn terminal_records_reject_every_action() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 1));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    h.workflow.approve(&id, &user("alice")).await.expect("applied");

    let applied = Err(WorkflowError::AlreadyFinalized(AuthorizationStatus::Applied));
    assert_eq!(h.workflow.approve(&id, &user("alice")).await, applied);
    assert_eq!(h.workflow.approve(&id, &user("carol")).await, applied);
    assert_eq!(h.workflow.deny(&id, &user("carol")).await, applied);
    assert_eq!(h.workflow.cancel(&id, &user("bob")).await, applied);
    assert_eq!(h.settings.inner.revision_count().await, 1);
}

#[tokio::test]
async fn only_participants_may_act() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    assert_eq!(
        h.workflow.approve(&id, &user("eve")).await,
        Err(WorkflowError::NotAuthorized(user("eve")))
    );
    assert_eq!(
        h.workflow.approve(&id, &user("bob")).await,
        Err(WorkflowError::NotAuthorized(user("bob")))
    );
    assert_eq!(
        h.workflow.cancel(&id, &user("alice")).await,
        Err(WorkflowError::NotAuthorized(user("alice")))
    );
    assert_eq!(
        h.workflow.approve(&AuthorizationId("missing".to_string()), &user("alice")).await,
        Err(WorkflowError::NotFound(AuthorizationId("missing".to_string())))
    );

    let cancelled = h.workflow.cancel(&id, &user("bob")).await.expect("requester cancels");
    assert_eq!(cancelled.outcome, ActionOutcome::Cancelled);
}

#[tokio::test]
async fn approver_may_deny_after_approving() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    h.workflow.approve(&id, &user("alice")).await.expect("approve");
    let denied = h.workflow.deny(&id, &user("alice")).await.expect("deny");

    assert_eq!(denied.status, AuthorizationStatus::Denied);
    assert_eq!(denied.approvals, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_are_never_lost() {
    let approvers = ["alice", "carol", "dave", "erin", "frank", "gina"];
    let h = harness(HarnessOptions::quorum(&approvers, 6));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    let mut tasks = Vec::new();
    for name in &approvers[..5] {
        let workflow = h.workflow.clone();
        let id = id.clone();
        let approver = user(name);
        tasks.push(tokio::spawn(async move { workflow.approve(&id, &approver).await }));
    }
    for task in tasks {
        let receipt = task.await.expect("task joins").expect("approval succeeds");
        assert_eq!(receipt.outcome, ActionOutcome::ApprovalRecorded);
    }

    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Pending);
    assert_eq!(record.approvals.len(), 5);
    assert_eq!(record.version, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_quorum_applies_exactly_once() {
    let approvers = ["alice", "carol", "dave", "erin", "frank"];
    let h = harness(HarnessOptions::quorum(&approvers, 5));
    let id = h
        .workflow
        .submit(&path(&["TeamSettings", "MaxUsersPerTeam"]), "500", &user("bob"))
        .await
        .expect("submit");

    let mut tasks = Vec::new();
    for name in approvers {
        let workflow = h.workflow.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { workflow.approve(&id, &user(name)).await }));
    }
    let mut applied = 0;
    for task in tasks {
        let receipt = task.await.expect("task joins").expect("approval succeeds");
        if receipt.outcome == ActionOutcome::Applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Applied);
    assert_eq!(record.approvals.len(), 5);
    assert_eq!(h.settings.inner.revision_count().await, 1);
    assert_eq!(h.current(&["TeamSettings", "MaxUsersPerTeam"]).await, "500");
}

#[tokio::test]
async fn lost_writes_are_retried_then_surface_conflict() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    h.store.forced.store(3, Ordering::SeqCst);
    let receipt = h.workflow.approve(&id, &user("alice")).await.expect("retried");
    assert_eq!(receipt.outcome, ActionOutcome::ApprovalRecorded);

    h.store.forced.store(1_000, Ordering::SeqCst);
    let result = h.workflow.deny(&id, &user("carol")).await;
    assert_eq!(result, Err(WorkflowError::Conflict { id: id.clone(), attempts: 8 }));

    h.store.forced.store(0, Ordering::SeqCst);
    assert_eq!(h.stored(&id).await.status, AuthorizationStatus::Pending);
}

#[tokio::test]
async fn failed_commit_keeps_request_pending_and_retry_applies() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    h.workflow.approve(&id, &user("alice")).await.expect("first approval");

    let requester_messages = h.delivery.messages_for(&user("bob")).len();

    h.settings.fail_saves.store(true, Ordering::SeqCst);
    let failed = h.workflow.approve(&id, &user("carol")).await;
    assert!(matches!(failed, Err(WorkflowError::ApplyFailed { .. })));

    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Pending);
    assert_eq!(record.approvals.len(), 1);
    assert!(record.finalizing.is_none());
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "");
    assert_eq!(h.audit.events_of_type("mpa.apply.failed").len(), 1);

    let bob = h.delivery.messages_for(&user("bob"));
    assert_eq!(bob.len(), requester_messages + 1);
    let notice = &bob.last().expect("apply failure notice").view.text;
    assert!(notice.contains("could not be applied: settings storage failure: disk full"));
    assert!(notice.contains("will be retried when an approver authorizes it again"));
    assert!(bob[0].view.has_action(ActionKind::Cancel));

    h.settings.fail_saves.store(false, Ordering::SeqCst);
    let retried = h.workflow.approve(&id, &user("carol")).await.expect("retry");
    assert_eq!(retried.outcome, ActionOutcome::Applied);
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "https://x");
}

#[tokio::test]
async fn active_finalize_claim_blocks_other_actions() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 1));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    let (mut record, version) = h.store.get(&id).await.expect("get").expect("exists");
    record.finalizing = Some(FinalizeClaim { approver: user("alice"), claimed_at: Utc::now() });
    assert!(h.store.compare_and_set(&id, version, record).await.expect("claim"));

    assert!(matches!(h.workflow.deny(&id, &user("carol")).await, Err(WorkflowError::Conflict { .. })));
    assert!(matches!(h.workflow.cancel(&id, &user("bob")).await, Err(WorkflowError::Conflict { .. })));
}

#[tokio::test]
async fn stale_claim_is_settled_from_configuration_without_saving_again() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 1));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    let (mut record, version) = h.store.get(&id).await.expect("get").expect("exists");
    record.finalizing =
        Some(FinalizeClaim { approver: user("alice"), claimed_at: Utc::now() - Duration::hours(1) });
    assert!(h.store.compare_and_set(&id, version, record).await.expect("claim"));

    // Claim holder vanished before saving: the claim keeps blocking.
    let blocked = h.workflow.approve(&id, &user("carol")).await;
    assert_eq!(blocked, Err(WorkflowError::Conflict { id: id.clone(), attempts: 0 }));
    assert_eq!(h.workflow.sweep_expired(Utc::now() + Duration::days(2)).await.expect("sweep"), 0);
    assert_eq!(h.stored(&id).await.status, AuthorizationStatus::Pending);

    // Claim holder's save landed but the record was never completed.
    let mut tree = h.settings.current_config().await.expect("settings");
    let value = LeafValue::String("https://x".to_string());
    apply(&mut tree, &path(&["ServiceSettings", "SiteURL"]), &value).expect("apply");
    h.settings.inner.save_config(tree).await.expect("save");

    let result = h.workflow.approve(&id, &user("carol")).await;
    assert_eq!(result, Err(WorkflowError::AlreadyFinalized(AuthorizationStatus::Applied)));

    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Applied);
    assert!(record.has_approved(&user("alice")));
    assert!(!record.has_approved(&user("carol")));
    assert!(record.finalizing.is_none());
    assert_eq!(h.settings.inner.revision_count().await, 1);
    assert_eq!(h.audit.events_of_type("mpa.apply.settled").len(), 1);
    let notice = h.delivery.latest_for(&user("bob")).expect("completion notice");
    assert!(notice.view.text.contains("has ended: applied"));
}

#[tokio::test]
async fn slow_apply_is_never_expired_underneath() {
    let h = harness(HarnessOptions {
        config: WorkflowConfig {
            pending_ttl: Some(Duration::milliseconds(100)),
            finalize_lease: Duration::milliseconds(50),
            ..WorkflowConfig::default()
        },
        ..HarnessOptions::quorum(&["alice", "carol"], 1)
    });
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    h.settings.stall_before_save_ms.store(300, Ordering::SeqCst);

    let workflow = h.workflow.clone();
    let approving = {
        let id = id.clone();
        tokio::spawn(async move { workflow.approve(&id, &user("alice")).await })
    };
    tokio::time::sleep(StdDuration::from_millis(150)).await;

    assert_eq!(h.workflow.sweep_expired(Utc::now()).await.expect("sweep"), 0);
    let denied = h.workflow.deny(&id, &user("carol")).await;
    assert!(matches!(denied, Err(WorkflowError::Conflict { .. })));

    let receipt = approving.await.expect("task joins").expect("alice applies");
    assert_eq!(receipt.outcome, ActionOutcome::Applied);

    let record = h.stored(&id).await;
    assert_eq!(record.status, AuthorizationStatus::Applied);
    assert_eq!(
        record.resolution.map(|resolution| resolution.reason),
        Some(ResolutionReason::QuorumReached)
    );
    assert!(h.audit.events_of_type("mpa.expire.applied").is_empty());
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "https://x");
}

#[tokio::test]
async fn second_approver_never_commits_over_a_slow_apply() {
    let h = harness(HarnessOptions {
        config: WorkflowConfig {
            pending_ttl: None,
            finalize_lease: Duration::milliseconds(50),
            ..WorkflowConfig::default()
        },
        ..HarnessOptions::quorum(&["alice", "carol"], 1)
    });
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    h.settings.stall_before_save_ms.store(300, Ordering::SeqCst);

    let workflow = h.workflow.clone();
    let approving = {
        let id = id.clone();
        tokio::spawn(async move { workflow.approve(&id, &user("alice")).await })
    };
    tokio::time::sleep(StdDuration::from_millis(120)).await;

    let carol = h.workflow.approve(&id, &user("carol")).await;
    assert_eq!(carol, Err(WorkflowError::Conflict { id: id.clone(), attempts: 0 }));

    let alice = approving.await.expect("task joins").expect("alice applies");
    assert_eq!(alice.outcome, ActionOutcome::Applied);
    assert_eq!(h.settings.inner.revision_count().await, 1);
    assert_eq!(h.stored(&id).await.status, AuthorizationStatus::Applied);
}

#[tokio::test]
async fn finalizer_reports_applied_when_its_stale_claim_was_settled() {
    let h = harness(HarnessOptions {
        config: WorkflowConfig {
            pending_ttl: None,
            finalize_lease: Duration::milliseconds(50),
            ..WorkflowConfig::default()
        },
        ..HarnessOptions::quorum(&["alice", "carol"], 1)
    });
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");
    h.settings.stall_after_save_ms.store(300, Ordering::SeqCst);

    let workflow = h.workflow.clone();
    let approving = {
        let id = id.clone();
        tokio::spawn(async move { workflow.approve(&id, &user("alice")).await })
    };
    tokio::time::sleep(StdDuration::from_millis(120)).await;

    let carol = h.workflow.approve(&id, &user("carol")).await;
    assert_eq!(carol, Err(WorkflowError::AlreadyFinalized(AuthorizationStatus::Applied)));

    let alice = approving.await.expect("task joins").expect("alice sees the apply");
    assert_eq!(alice.outcome, ActionOutcome::Applied);
    assert_eq!(alice.status, AuthorizationStatus::Applied);
    assert_eq!(h.settings.inner.revision_count().await, 1);
    assert!(h.audit.events_of_type("mpa.apply.committed").is_empty());
    assert_eq!(h.audit.events_of_type("mpa.apply.settled").len(), 1);
}

#[tokio::test]
async fn expired_request_is_cancelled_on_next_action() {
    let h = harness(HarnessOptions {
        config: WorkflowConfig { pending_ttl: Some(Duration::zero()), ..WorkflowConfig::default() },
        ..HarnessOptions::quorum(&["alice"], 1)
    });
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    let result = h.workflow.approve(&id, &user("alice")).await;
    assert_eq!(result, Err(WorkflowError::AlreadyFinalized(AuthorizationStatus::Cancelled)));

    let record = h.stored(&id).await;
    assert_eq!(
        record.resolution.map(|resolution| resolution.reason),
        Some(ResolutionReason::Expired)
    );
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "");
}

#[tokio::test]
async fn sweeper_expires_only_stale_requests() {
    let h = harness(HarnessOptions::quorum(&["alice"], 1));
    let stale = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    assert_eq!(h.workflow.sweep_expired(Utc::now()).await.expect("sweep"), 0);
    let expired =
        h.workflow.sweep_expired(Utc::now() + Duration::hours(25)).await.expect("sweep later");
    assert_eq!(expired, 1);
    assert_eq!(h.stored(&stale).await.status, AuthorizationStatus::Cancelled);

    let notice = h.delivery.latest_for(&user("bob")).expect("requester notified");
    assert!(notice.view.text.contains("has ended: expired"));
}

#[tokio::test]
async fn notifications_follow_every_transition() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 2));
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    let alice = h.delivery.latest_for(&user("alice")).expect("alice message");
    assert!(alice.view.has_action(ActionKind::Approve));
    assert!(alice.view.has_action(ActionKind::Deny));
    let bob = h.delivery.latest_for(&user("bob")).expect("bob message");
    assert!(bob.view.has_action(ActionKind::Cancel));
    assert!(bob.view.text.contains("You need 2 more authorizations."));

    h.workflow.approve(&id, &user("alice")).await.expect("approve");
    let alice = h.delivery.latest_for(&user("alice")).expect("alice message");
    assert!(alice.view.actions.is_empty());
    let bob = h.delivery.latest_for(&user("bob")).expect("bob message");
    assert!(bob.view.text.contains("You need 1 more authorizations."));

    h.workflow.approve(&id, &user("carol")).await.expect("apply");
    for message in h.delivery.messages() {
        assert!(message.view.actions.is_empty(), "stale actions left on {:?}", message.handle);
    }
    let notice = h.delivery.latest_for(&user("bob")).expect("completion notice");
    assert!(notice.view.text.contains("has ended: applied"));
}

#[tokio::test]
async fn unreachable_approvers_are_dropped_or_abort_submission() {
    let delivery = RecordingDelivery::default();
    delivery.mark_unreachable(&user("carol"));
    let h = harness(HarnessOptions {
        delivery: delivery.clone(),
        ..HarnessOptions::quorum(&["alice", "carol", "dave"], 2)
    });

    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("two approvers remain reachable");
    let record = h.stored(&id).await;
    assert_eq!(record.approver_assignment.len(), 2);
    assert!(!record.is_assigned_approver(&user("carol")));

    delivery.mark_unreachable(&user("dave"));
    let result =
        h.workflow.submit(&path(&["ServiceSettings", "SiteURL"]), "https://y", &user("bob")).await;
    assert!(matches!(result, Err(WorkflowError::Delivery(_))));
    assert_eq!(h.store.list_pending().await.expect("list").len(), 1);

    let withdrawn = h.delivery.latest_for(&user("alice")).expect("alice message");
    assert!(withdrawn.view.actions.is_empty());
    assert_eq!(withdrawn.view.text, "This authorization request was withdrawn.");
}

#[tokio::test]
async fn failed_insert_withdraws_every_delivered_message() {
    let h = harness(HarnessOptions::quorum(&["alice", "carol"], 1));
    h.store.fail_inserts.store(true, Ordering::SeqCst);

    let result =
        h.workflow.submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob")).await;
    assert!(matches!(result, Err(WorkflowError::Store(_))));

    for name in ["alice", "carol", "bob"] {
        let message = h.delivery.latest_for(&user(name)).expect("message delivered");
        assert!(message.view.actions.is_empty(), "{name} kept live buttons");
        assert_eq!(message.view.text, "This authorization request was withdrawn.");
    }
}

#[tokio::test]
async fn broken_delivery_never_rolls_back_transition() {
    let delivery = RecordingDelivery::default();
    let h = harness(HarnessOptions {
        delivery: delivery.clone(),
        ..HarnessOptions::quorum(&["alice", "carol"], 1)
    });
    let id = h
        .workflow
        .submit(&path(&["ServiceSettings", "SiteURL"]), "https://x", &user("bob"))
        .await
        .expect("submit");

    delivery.freeze_updates_for(&user("carol"));
    let receipt = h.workflow.approve(&id, &user("alice")).await.expect("applied");

    assert_eq!(receipt.status, AuthorizationStatus::Applied);
    assert_eq!(receipt.notifications.failures.len(), 1);
    assert_eq!(receipt.notifications.failures[0].0, user("carol"));
    assert_eq!(h.current(&["ServiceSettings", "SiteURL"]).await, "https://x");

    let partial = h.audit.events_of_type("mpa.notify.partial");
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].metadata.get("missed").map(String::as_str), Some("carol"));
}
