//! Authorization workflow engine.
//!
//! The engine is the only writer of authorization records. Every mutation is a read-modify-write
//! cycle against [`AuthorizationStore`] guarded by the record version; a lost race re-reads and
//! retries up to [`WorkflowConfig::max_attempts`] times before surfacing
//! [`WorkflowError::Conflict`].
//!
//! Finalization is split in three steps so the configuration change is applied at most once:
//!
//! ```text
//!   Pending ──claim──> Pending+claim ──SaveConfig ok──> Applied
//!                            │
//!                            └──SaveConfig failed──> Pending (claim released, ApplyFailed)
//! ```
//!
//! While a claim is held, every other action on the record fails fast with `Conflict`, and
//! the record never expires. A claim older than [`WorkflowConfig::finalize_lease`] is only
//! settled from the configuration itself: if the leaf already holds the proposed value the
//! record is completed without saving again, otherwise the claim keeps blocking.

mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::approvals::{ApproverPolicy, ModificationPolicy};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::directory::Directory;
use crate::domain::authorization::{
    AuthorizationId, AuthorizationRecord, AuthorizationStatus, UserId,
};
use crate::notify::{NotificationSynchronizer, SyncReport};
use crate::settings::{
    apply, coerce, enumerate_leaf_paths, resolve, ConfigurationManager, LeafDescriptor, LeafPath,
    SettingValue,
};
use crate::store::AuthorizationStore;

pub use error::WorkflowError;

const ENGINE_ACTOR: &str = "mpa-workflow";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub max_attempts: u32,
    pub pending_ttl: Option<Duration>,
    pub finalize_lease: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            pending_ttl: Some(Duration::hours(24)),
            finalize_lease: Duration::seconds(60),
        }
    }
}

/// Collaborators the engine is wired with once at process start.
#[derive(Clone)]
pub struct WorkflowContext {
    pub store: Arc<dyn AuthorizationStore>,
    pub settings: Arc<dyn ConfigurationManager>,
    pub directory: Arc<dyn Directory>,
    pub modification_policy: Arc<dyn ModificationPolicy>,
    pub approver_policy: Arc<dyn ApproverPolicy>,
    pub notifier: NotificationSynchronizer,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    ApprovalRecorded,
    AlreadyApproved,
    Applied,
    Denied,
    Cancelled,
}

impl ActionOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::ApprovalRecorded => "Your authorization has been recorded.",
            Self::AlreadyApproved => "You already authorized this.",
            Self::Applied => "Authorization complete. The change has been applied.",
            Self::Denied => "The request has been denied.",
            Self::Cancelled => "The request has been cancelled.",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionReceipt {
    pub authorization_id: AuthorizationId,
    pub outcome: ActionOutcome,
    pub status: AuthorizationStatus,
    pub approvals: usize,
    pub approvals_required: u32,
    pub notifications: SyncReport,
}

impl ActionReceipt {
    fn new(record: &AuthorizationRecord, outcome: ActionOutcome, notifications: SyncReport) -> Self {
        Self {
            authorization_id: record.id.clone(),
            outcome,
            status: record.status,
            approvals: record.approvals.len(),
            approvals_required: record.approvals_required,
            notifications,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Deny,
    Cancel,
}

pub struct AuthorizationWorkflow {
    context: WorkflowContext,
    config: WorkflowConfig,
}

impl AuthorizationWorkflow {
    pub fn new(context: WorkflowContext, config: WorkflowConfig) -> Self {
        Self { context, config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Validates and records a proposed change, then notifies approvers and the requester.
    pub async fn submit(
        &self,
        field_path: &[String],
        proposed_value: &str,
        requester: &UserId,
    ) -> Result<AuthorizationId, WorkflowError> {
        let snapshot = self.context.settings.current_config().await?;
        let leaf = resolve(&snapshot, field_path)?;
        let kind = leaf.leaf_kind()?;
        let value = coerce(kind, proposed_value)?;

        let decision = self.context.modification_policy.can_modify(requester, &leaf.path).await;
        if !decision.allowed {
            self.audit(None, "mpa.submit.rejected", requester, AuditOutcome::Rejected, |event| {
                event.with_metadata("reason", decision.reason.clone())
            });
            return Err(WorkflowError::PermissionDenied(decision.reason));
        }

        let approver_set = self
            .context
            .approver_policy
            .approvers(requester, &leaf.path, self.context.directory.as_ref())
            .await?;

        let now = Utc::now();
        let mut record = AuthorizationRecord::new(
            AuthorizationId::generate(),
            leaf.path.clone(),
            value.render(),
            requester.clone(),
            Default::default(),
            None,
            approver_set.approvals_required(),
            now,
            self.config.pending_ttl,
        );

        let notifier = &self.context.notifier;
        let (handles, failures) =
            notifier.open_approver_threads(&record, approver_set.approvers()).await;
        if handles.len() < approver_set.approvals_required() as usize {
            notifier.withdraw(&handles, "This authorization request was withdrawn.").await;
            return Err(WorkflowError::Delivery(format!(
                "only {} of {} approver(s) could be notified; {} required",
                handles.len(),
                approver_set.approvers().len(),
                approver_set.approvals_required()
            )));
        }
        if !failures.is_empty() {
            warn!(
                event_name = "mpa.submit.approvers_unreachable",
                correlation_id = %record.id,
                unreachable = failures.len(),
                "continuing without unreachable approvers"
            );
        }

        record.approver_assignment = handles;
        record.requester_handle = notifier.open_requester_thread(&record).await;

        if let Err(error) = self.context.store.insert(record.clone()).await {
            let withdrawn = "This authorization request was withdrawn.";
            notifier.withdraw(&record.approver_assignment, withdrawn).await;
            if let Some(handle) = &record.requester_handle {
                let requester = BTreeMap::from([(record.requester_id.clone(), handle.clone())]);
                notifier.withdraw(&requester, withdrawn).await;
            }
            return Err(error.into());
        }

        info!(
            event_name = "mpa.submit.accepted",
            correlation_id = %record.id,
            requester = %requester,
            field_path = %record.field_path,
            approvers = record.approver_assignment.len(),
            approvals_required = record.approvals_required,
            "authorization request created"
        );
        self.audit(
            Some(&record.id),
            "mpa.submit.accepted",
            requester,
            AuditOutcome::Success,
            |event| {
                event
                    .with_metadata("field_path", record.field_path.to_string())
                    .with_metadata("approvals_required", record.approvals_required.to_string())
            },
        );

        Ok(record.id)
    }

    pub async fn approve(
        &self,
        id: &AuthorizationId,
        approver: &UserId,
    ) -> Result<ActionReceipt, WorkflowError> {
        for _ in 0..self.config.max_attempts {
            let (record, version) = self.load(id).await?;
            let now = Utc::now();
            if self.expire_if_stale(&record, version, now).await? {
                continue;
            }

            record.ensure_approver(approver)?;
            record.ensure_pending()?;
            if record.has_approved(approver) {
                return Ok(ActionReceipt::new(
                    &record,
                    ActionOutcome::AlreadyApproved,
                    SyncReport::default(),
                ));
            }
            if self.settle_stale_claim(&record, version, now).await? {
                continue;
            }
            self.ensure_unclaimed(&record)?;

            if record.next_approval_completes() {
                match self.finalize(&record, version, approver).await? {
                    Some(receipt) => return Ok(receipt),
                    None => continue,
                }
            }

            let mut next = record.clone();
            next.record_approval(approver, now)?;
            if !self.context.store.compare_and_set(id, version, next.clone()).await? {
                continue;
            }
            next.version = version + 1;

            info!(
                event_name = "mpa.approve.recorded",
                correlation_id = %id,
                approver = %approver,
                approvals = next.approvals.len(),
                approvals_required = next.approvals_required,
                "approval recorded"
            );
            self.audit(Some(id), "mpa.approve.recorded", approver, AuditOutcome::Success, |event| {
                event.with_metadata("remaining", next.remaining_approvals().to_string())
            });
            let notifications = self.sync_participants(&next).await;
            return Ok(ActionReceipt::new(&next, ActionOutcome::ApprovalRecorded, notifications));
        }

        Err(self.exhausted(id))
    }

    pub async fn deny(
        &self,
        id: &AuthorizationId,
        approver: &UserId,
    ) -> Result<ActionReceipt, WorkflowError> {
        self.decide(id, approver, Decision::Deny).await
    }

    pub async fn cancel(
        &self,
        id: &AuthorizationId,
        requester: &UserId,
    ) -> Result<ActionReceipt, WorkflowError> {
        self.decide(id, requester, Decision::Cancel).await
    }

    /// Cancels every Pending record whose deadline has passed and settles stale finalize claims
    /// whose value already reached the configuration. Returns how many were expired.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, WorkflowError> {
        let mut expired = 0;
        for id in self.context.store.list_pending().await? {
            let Some((record, version)) = self.context.store.get(&id).await? else {
                continue;
            };
            if self.settle_stale_claim(&record, version, now).await? {
                continue;
            }
            if self.expire_if_stale(&record, version, now).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    pub async fn record(&self, id: &AuthorizationId) -> Result<AuthorizationRecord, WorkflowError> {
        self.load(id).await.map(|(record, _)| record)
    }

    /// Current value and kind of a leaf, for the command surface's "show" path.
    pub async fn describe(&self, field_path: &[String]) -> Result<LeafDescriptor, WorkflowError> {
        let snapshot = self.context.settings.current_config().await?;
        Ok(resolve(&snapshot, field_path)?)
    }

    pub async fn leaf_paths(&self) -> Result<Vec<LeafPath>, WorkflowError> {
        let snapshot = self.context.settings.current_config().await?;
        Ok(enumerate_leaf_paths(&snapshot))
    }

    pub async fn settings_snapshot(&self) -> Result<SettingValue, WorkflowError> {
        Ok(self.context.settings.current_config().await?)
    }

    async fn decide(
        &self,
        id: &AuthorizationId,
        actor: &UserId,
        decision: Decision,
    ) -> Result<ActionReceipt, WorkflowError> {
        for _ in 0..self.config.max_attempts {
            let (record, version) = self.load(id).await?;
            let now = Utc::now();
            if self.expire_if_stale(&record, version, now).await? {
                continue;
            }

            match decision {
                Decision::Deny => record.ensure_approver(actor)?,
                Decision::Cancel => record.ensure_requester(actor)?,
            }
            record.ensure_pending()?;
            if self.settle_stale_claim(&record, version, now).await? {
                continue;
            }
            self.ensure_unclaimed(&record)?;

            let mut next = record.clone();
            let (outcome, event_type) = match decision {
                Decision::Deny => {
                    next.deny(actor, now)?;
                    (ActionOutcome::Denied, "mpa.deny.applied")
                }
                Decision::Cancel => {
                    next.cancel(actor, now)?;
                    (ActionOutcome::Cancelled, "mpa.cancel.applied")
                }
            };
            if !self.context.store.compare_and_set(id, version, next.clone()).await? {
                continue;
            }
            next.version = version + 1;

            info!(
                event_name = event_type,
                correlation_id = %id,
                actor = %actor,
                status = next.status.as_str(),
                "authorization request closed"
            );
            self.audit(Some(id), event_type, actor, AuditOutcome::Success, |event| {
                event.with_metadata("approvals", next.approvals.len().to_string())
            });
            let notifications = self.sync_participants(&next).await;
            return Ok(ActionReceipt::new(&next, outcome, notifications));
        }

        Err(self.exhausted(id))
    }

    /// Claims the record, commits the configuration, then marks it Applied. `Ok(None)` means the
    /// claim lost a race and the caller should re-read.
    async fn finalize(
        &self,
        record: &AuthorizationRecord,
        version: u64,
        approver: &UserId,
    ) -> Result<Option<ActionReceipt>, WorkflowError> {
        let id = &record.id;
        let mut claimed = record.clone();
        claimed.claim_finalization(approver, Utc::now())?;
        if !self.context.store.compare_and_set(id, version, claimed.clone()).await? {
            return Ok(None);
        }
        let claimed_version = version + 1;

        if let Err(reason) = self.commit_value(record).await {
            let mut released = claimed;
            released.release_finalization(Utc::now());
            let released_ok =
                self.context.store.compare_and_set(id, claimed_version, released.clone()).await?;
            error!(
                event_name = "mpa.apply.failed",
                correlation_id = %id,
                approver = %approver,
                reason = %reason,
                "configuration change not applied"
            );
            self.audit(Some(id), "mpa.apply.failed", approver, AuditOutcome::Failed, |event| {
                event.with_metadata("reason", reason.clone())
            });
            if released_ok {
                released.version = claimed_version + 1;
                self.sync_participants(&released).await;
                if !self.context.notifier.announce_apply_failure(&released, &reason).await {
                    self.audit(
                        Some(id),
                        "mpa.apply.notice_undelivered",
                        &released.requester_id,
                        AuditOutcome::Failed,
                        |event| event.with_metadata("reason", reason.clone()),
                    );
                }
            } else {
                warn!(
                    event_name = "mpa.apply.release_lost",
                    correlation_id = %id,
                    "finalize claim changed before it could be released"
                );
            }
            return Err(WorkflowError::ApplyFailed { id: id.clone(), reason });
        }

        let mut applied = claimed;
        applied.complete(approver, Utc::now())?;
        if !self.context.store.compare_and_set(id, claimed_version, applied.clone()).await? {
            let (current, _) = self.load(id).await?;
            if current.status == AuthorizationStatus::Applied {
                info!(
                    event_name = "mpa.apply.settled_elsewhere",
                    correlation_id = %id,
                    approver = %approver,
                    "configuration committed; record was completed from the stale claim"
                );
                return Ok(Some(ActionReceipt::new(
                    &current,
                    ActionOutcome::Applied,
                    SyncReport::default(),
                )));
            }
            error!(
                event_name = "mpa.apply.record_lost",
                correlation_id = %id,
                status = current.status.as_str(),
                "configuration committed but the record changed underneath the claim"
            );
            return Err(WorkflowError::Conflict { id: id.clone(), attempts: 1 });
        }
        applied.version = claimed_version + 1;

        info!(
            event_name = "mpa.apply.committed",
            correlation_id = %id,
            approver = %approver,
            field_path = %applied.field_path,
            "configuration change applied"
        );
        self.audit(Some(id), "mpa.apply.committed", approver, AuditOutcome::Success, |event| {
            event
                .with_metadata("field_path", applied.field_path.to_string())
                .with_metadata("value", applied.proposed_value.clone())
        });
        let notifications = self.sync_participants(&applied).await;
        Ok(Some(ActionReceipt::new(&applied, ActionOutcome::Applied, notifications)))
    }

    /// Applies the proposed value to a private copy of the current configuration and commits
    /// the whole snapshot.
    async fn commit_value(&self, record: &AuthorizationRecord) -> Result<(), String> {
        let mut snapshot =
            self.context.settings.current_config().await.map_err(|error| error.to_string())?;
        let path = record.field_path.segments();
        let kind = resolve(&snapshot, path)
            .and_then(|leaf| leaf.leaf_kind())
            .map_err(|error| error.to_string())?;
        let value = coerce(kind, &record.proposed_value).map_err(|error| error.to_string())?;
        apply(&mut snapshot, path, &value).map_err(|error| error.to_string())?;
        self.context.settings.save_config(snapshot).await.map_err(|error| error.to_string())
    }

    /// Completes a record whose finalize claim outlived its lease, provided the configuration
    /// already holds the proposed value. Nothing is saved here. Returns `true` when the caller
    /// must re-read.
    async fn settle_stale_claim(
        &self,
        record: &AuthorizationRecord,
        version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        let Some(claim) = &record.finalizing else {
            return Ok(false);
        };
        if record.active_claim(now, self.config.finalize_lease).is_some() {
            return Ok(false);
        }
        let snapshot = self.context.settings.current_config().await?;
        let leaf = resolve(&snapshot, record.field_path.segments())?;
        if leaf.current != record.proposed_value {
            return Ok(false);
        }

        let mut applied = record.clone();
        applied.complete(&claim.approver, now)?;
        if !self.context.store.compare_and_set(&record.id, version, applied.clone()).await? {
            return Ok(true);
        }
        applied.version = version + 1;

        warn!(
            event_name = "mpa.apply.settled",
            correlation_id = %record.id,
            claimant = %claim.approver,
            claimed_at = %claim.claimed_at,
            "stale finalize claim completed from the committed configuration"
        );
        let actor = UserId::new(ENGINE_ACTOR);
        self.audit(Some(&record.id), "mpa.apply.settled", &actor, AuditOutcome::Success, |event| {
            event
                .with_metadata("claimant", claim.approver.0.clone())
                .with_metadata("field_path", applied.field_path.to_string())
        });
        self.sync_participants(&applied).await;
        Ok(true)
    }

    /// Expires a stale Pending record. Returns `true` when the caller must re-read, either
    /// because the record was expired here or because the write lost a race.
    async fn expire_if_stale(
        &self,
        record: &AuthorizationRecord,
        version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        // A claimed record may already have its value committed.
        if !record.is_expired(now) || record.finalizing.is_some() {
            return Ok(false);
        }

        let mut expired = record.clone();
        expired.expire(now)?;
        if !self.context.store.compare_and_set(&record.id, version, expired.clone()).await? {
            return Ok(true);
        }
        expired.version = version + 1;

        info!(
            event_name = "mpa.expire.applied",
            correlation_id = %record.id,
            "pending authorization expired"
        );
        let actor = UserId::new(ENGINE_ACTOR);
        self.audit(Some(&record.id), "mpa.expire.applied", &actor, AuditOutcome::Success, |event| {
            event.with_metadata("expired_at", now.to_rfc3339())
        });
        self.sync_participants(&expired).await;
        Ok(true)
    }

    fn ensure_unclaimed(&self, record: &AuthorizationRecord) -> Result<(), WorkflowError> {
        match record.finalizing {
            Some(_) => Err(WorkflowError::Conflict { id: record.id.clone(), attempts: 0 }),
            None => Ok(()),
        }
    }

    async fn load(&self, id: &AuthorizationId) -> Result<(AuthorizationRecord, u64), WorkflowError> {
        self.context
            .store
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    fn exhausted(&self, id: &AuthorizationId) -> WorkflowError {
        warn!(
            event_name = "mpa.action.conflict",
            correlation_id = %id,
            attempts = self.config.max_attempts,
            "retry budget exhausted"
        );
        WorkflowError::Conflict { id: id.clone(), attempts: self.config.max_attempts }
    }

    /// Refreshes every participant and records an audit event when some of them were missed.
    async fn sync_participants(&self, record: &AuthorizationRecord) -> SyncReport {
        let report = self.context.notifier.sync(record).await;
        if !report.is_clean() {
            let missed: Vec<&str> =
                report.failures.iter().map(|(user, _)| user.0.as_str()).collect();
            let event = AuditEvent::new(
                Some(record.id.clone()),
                record.id.0.clone(),
                "mpa.notify.partial",
                AuditCategory::Notification,
                ENGINE_ACTOR,
                AuditOutcome::Failed,
            )
            .with_metadata("status", record.status.as_str())
            .with_metadata("missed", missed.join(","));
            self.context.audit.emit(event);
        }
        report
    }

    fn audit(
        &self,
        id: Option<&AuthorizationId>,
        event_type: &str,
        actor: &UserId,
        outcome: AuditOutcome,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let correlation_id = id.map(|id| id.0.clone()).unwrap_or_else(|| "unassigned".to_string());
        let event = AuditEvent::new(
            id.cloned(),
            correlation_id,
            event_type,
            AuditCategory::Authorization,
            actor.0.clone(),
            outcome,
        );
        self.context.audit.emit(decorate(event));
    }
}

#[cfg(test)]
mod tests;
