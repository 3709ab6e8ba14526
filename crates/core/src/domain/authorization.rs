use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::settings::FieldPath;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizationId(pub String);

impl AuthorizationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a delivered message, used to update it in place later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationHandle {
    pub channel: String,
    pub message_ref: String,
}

impl NotificationHandle {
    pub fn new(channel: impl Into<String>, message_ref: impl Into<String>) -> Self {
        Self { channel: channel.into(), message_ref: message_ref.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Applied,
    Denied,
    Cancelled,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "applied" => Some(Self::Applied),
            "denied" => Some(Self::Denied),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationEvent {
    ApprovalRecorded,
    QuorumReached,
    Denied,
    CancelRequested,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    QuorumReached,
    Denied,
    CancelledByRequester,
    Expired,
}

/// How and by whom a record reached its terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub reason: ResolutionReason,
    pub actor: Option<UserId>,
    pub resolved_at: DateTime<Utc>,
}

/// Marks a Pending record whose quorum-reaching approval is being committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeClaim {
    pub approver: UserId,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("user {0} is not allowed to act on this request")]
    NotAuthorized(UserId),
    #[error("request is already {}", .0.as_str())]
    AlreadyFinalized(AuthorizationStatus),
    #[error("event {event:?} is not valid in status {}", .from.as_str())]
    InvalidEvent { from: AuthorizationStatus, event: AuthorizationEvent },
}

pub fn transition(
    current: &AuthorizationStatus,
    event: &AuthorizationEvent,
) -> Result<AuthorizationStatus, TransitionError> {
    use AuthorizationEvent as E;
    use AuthorizationStatus as S;

    match (current, event) {
        (S::Pending, E::ApprovalRecorded) => Ok(S::Pending),
        (S::Pending, E::QuorumReached) => Ok(S::Applied),
        (S::Pending, E::Denied) => Ok(S::Denied),
        (S::Pending, E::CancelRequested) | (S::Pending, E::Expired) => Ok(S::Cancelled),
        (S::Applied | S::Denied | S::Cancelled, _) => {
            Err(TransitionError::AlreadyFinalized(*current))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub id: AuthorizationId,
    pub field_path: FieldPath,
    pub proposed_value: String,
    pub requester_id: UserId,
    pub approver_assignment: BTreeMap<UserId, NotificationHandle>,
    pub requester_handle: Option<NotificationHandle>,
    pub approvals: BTreeSet<UserId>,
    pub approvals_required: u32,
    pub status: AuthorizationStatus,
    pub resolution: Option<Resolution>,
    pub finalizing: Option<FinalizeClaim>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthorizationRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AuthorizationId,
        field_path: FieldPath,
        proposed_value: impl Into<String>,
        requester_id: UserId,
        approver_assignment: BTreeMap<UserId, NotificationHandle>,
        requester_handle: Option<NotificationHandle>,
        approvals_required: u32,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            id,
            field_path,
            proposed_value: proposed_value.into(),
            requester_id,
            approver_assignment,
            requester_handle,
            approvals: BTreeSet::new(),
            approvals_required,
            status: AuthorizationStatus::Pending,
            resolution: None,
            finalizing: None,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    pub fn is_assigned_approver(&self, user: &UserId) -> bool {
        self.approver_assignment.contains_key(user)
    }

    pub fn has_approved(&self, user: &UserId) -> bool {
        self.approvals.contains(user)
    }

    pub fn remaining_approvals(&self) -> u32 {
        let approved = u32::try_from(self.approvals.len()).unwrap_or(u32::MAX);
        self.approvals_required.saturating_sub(approved)
    }

    /// Assigned approvers that have not confirmed yet.
    pub fn pending_approvers(&self) -> impl Iterator<Item = &UserId> {
        self.approver_assignment.keys().filter(|approver| !self.approvals.contains(*approver))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == AuthorizationStatus::Pending
            && self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// A finalize claim that is still within its lease.
    pub fn active_claim(&self, now: DateTime<Utc>, lease: Duration) -> Option<&FinalizeClaim> {
        self.finalizing.as_ref().filter(|claim| now < claim.claimed_at + lease)
    }

    /// Whether one more distinct approval completes the quorum.
    pub fn next_approval_completes(&self) -> bool {
        self.approvals.len() + 1 >= self.approvals_required as usize
    }

    pub fn ensure_approver(&self, user: &UserId) -> Result<(), TransitionError> {
        if self.is_assigned_approver(user) {
            Ok(())
        } else {
            Err(TransitionError::NotAuthorized(user.clone()))
        }
    }

    pub fn ensure_requester(&self, user: &UserId) -> Result<(), TransitionError> {
        if &self.requester_id == user {
            Ok(())
        } else {
            Err(TransitionError::NotAuthorized(user.clone()))
        }
    }

    pub fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            Err(TransitionError::AlreadyFinalized(self.status))
        } else {
            Ok(())
        }
    }

    pub fn record_approval(
        &mut self,
        approver: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_approver(approver)?;
        if self.next_approval_completes() {
            return Err(TransitionError::InvalidEvent {
                from: self.status,
                event: AuthorizationEvent::ApprovalRecorded,
            });
        }
        self.apply_event(&AuthorizationEvent::ApprovalRecorded, now)?;
        self.approvals.insert(approver.clone());
        Ok(())
    }

    pub fn claim_finalization(
        &mut self,
        approver: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_approver(approver)?;
        self.ensure_pending()?;
        self.finalizing = Some(FinalizeClaim { approver: approver.clone(), claimed_at: now });
        self.updated_at = now;
        Ok(())
    }

    pub fn release_finalization(&mut self, now: DateTime<Utc>) {
        self.finalizing = None;
        self.updated_at = now;
    }

    /// Adds the quorum-reaching approval and moves the record to `Applied`.
    pub fn complete(&mut self, approver: &UserId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_approver(approver)?;
        if !self.next_approval_completes() {
            return Err(TransitionError::InvalidEvent {
                from: self.status,
                event: AuthorizationEvent::QuorumReached,
            });
        }
        self.apply_event(&AuthorizationEvent::QuorumReached, now)?;
        self.approvals.insert(approver.clone());
        self.finalizing = None;
        self.resolve(ResolutionReason::QuorumReached, Some(approver.clone()), now);
        Ok(())
    }

    pub fn deny(&mut self, approver: &UserId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_approver(approver)?;
        self.apply_event(&AuthorizationEvent::Denied, now)?;
        self.resolve(ResolutionReason::Denied, Some(approver.clone()), now);
        Ok(())
    }

    pub fn cancel(&mut self, requester: &UserId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_requester(requester)?;
        self.apply_event(&AuthorizationEvent::CancelRequested, now)?;
        self.resolve(ResolutionReason::CancelledByRequester, Some(requester.clone()), now);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.apply_event(&AuthorizationEvent::Expired, now)?;
        self.finalizing = None;
        self.resolve(ResolutionReason::Expired, None, now);
        Ok(())
    }

    fn apply_event(
        &mut self,
        event: &AuthorizationEvent,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.status = transition(&self.status, event)?;
        self.updated_at = now;
        Ok(())
    }

    fn resolve(&mut self, reason: ResolutionReason, actor: Option<UserId>, now: DateTime<Utc>) {
        self.resolution = Some(Resolution { reason, actor, resolved_at: now });
    }
}
