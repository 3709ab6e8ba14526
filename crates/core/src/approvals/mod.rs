//! Pluggable policies deciding who may request a change and who must approve it.
//!
//! Defaults: every requester may modify every leaf ([`AllowAllModifications`]) and a single
//! holder of a fixed role approves ([`RoleApproverPolicy`]).

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::{Directory, DirectoryError};
use crate::domain::authorization::UserId;
use crate::settings::FieldPath;

pub const DEFAULT_APPROVER_ROLE: &str = "system_admin";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationDecision {
    pub allowed: bool,
    pub reason: String,
}

impl ModificationDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

/// Approvers and the number of distinct confirmations needed from them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSet {
    approvers: Vec<UserId>,
    approvals_required: u32,
}

impl ApproverSet {
    pub fn new(approvers: Vec<UserId>, approvals_required: u32) -> Result<Self, PolicyError> {
        let mut seen = HashSet::new();
        let approvers: Vec<UserId> =
            approvers.into_iter().filter(|approver| seen.insert(approver.clone())).collect();

        if approvals_required == 0 {
            return Err(PolicyError::Misconfigured(
                "approvals_required must be at least 1".to_string(),
            ));
        }
        if approvers.len() < approvals_required as usize {
            return Err(PolicyError::Misconfigured(format!(
                "{} approvals required but only {} approver(s) available",
                approvals_required,
                approvers.len()
            )));
        }

        Ok(Self { approvers, approvals_required })
    }

    pub fn approvers(&self) -> &[UserId] {
        &self.approvers
    }

    pub fn approvals_required(&self) -> u32 {
        self.approvals_required
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("approval policy misconfigured: {0}")]
    Misconfigured(String),
}

#[async_trait]
pub trait ModificationPolicy: Send + Sync {
    async fn can_modify(&self, requester: &UserId, path: &FieldPath) -> ModificationDecision;
}

#[async_trait]
pub trait ApproverPolicy: Send + Sync {
    async fn approvers(
        &self,
        requester: &UserId,
        path: &FieldPath,
        directory: &dyn Directory,
    ) -> Result<ApproverSet, PolicyError>;
}

#[derive(Clone, Debug, Default)]
pub struct AllowAllModifications;

#[async_trait]
impl ModificationPolicy for AllowAllModifications {
    async fn can_modify(&self, _requester: &UserId, _path: &FieldPath) -> ModificationDecision {
        ModificationDecision::allow("all requesters may modify configuration")
    }
}

/// Only listed requesters may start a change. An empty list allows everyone.
#[derive(Clone, Debug, Default)]
pub struct RequesterAllowList {
    requesters: HashSet<String>,
}

impl RequesterAllowList {
    pub fn new<I, S>(requesters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { requesters: requesters.into_iter().map(|id| normalize_key(id.as_ref())).collect() }
    }
}

#[async_trait]
impl ModificationPolicy for RequesterAllowList {
    async fn can_modify(&self, requester: &UserId, path: &FieldPath) -> ModificationDecision {
        if self.requesters.is_empty() || self.requesters.contains(&normalize_key(&requester.0)) {
            ModificationDecision::allow("requester is allowed to modify configuration")
        } else {
            ModificationDecision::deny(format!("user {requester} may not modify {path}"))
        }
    }
}

#[derive(Clone, Debug)]
pub struct RoleApproverPolicy {
    role: String,
}

impl RoleApproverPolicy {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

impl Default for RoleApproverPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVER_ROLE)
    }
}

#[async_trait]
impl ApproverPolicy for RoleApproverPolicy {
    async fn approvers(
        &self,
        _requester: &UserId,
        _path: &FieldPath,
        directory: &dyn Directory,
    ) -> Result<ApproverSet, PolicyError> {
        let approver = directory.get_user_by_role(&self.role).await?;
        ApproverSet::new(vec![approver], 1)
    }
}

/// Fixed approver list with an explicit quorum. The requester never approves their own change.
#[derive(Clone, Debug)]
pub struct StaticApproverPolicy {
    approvers: Vec<UserId>,
    approvals_required: u32,
}

impl StaticApproverPolicy {
    pub fn new(approvers: Vec<UserId>, approvals_required: u32) -> Self {
        Self { approvers, approvals_required }
    }
}

#[async_trait]
impl ApproverPolicy for StaticApproverPolicy {
    async fn approvers(
        &self,
        requester: &UserId,
        _path: &FieldPath,
        _directory: &dyn Directory,
    ) -> Result<ApproverSet, PolicyError> {
        let eligible: Vec<UserId> =
            self.approvers.iter().filter(|approver| *approver != requester).cloned().collect();
        ApproverSet::new(eligible, self.approvals_required)
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
