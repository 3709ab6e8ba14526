//! Domain core for multi-party authorization of configuration changes.
//!
//! A requester proposes a new value for one leaf of the configuration tree; the change is applied
//! only after a quorum of approvers authorizes it. Everything in this crate is transport-agnostic:
//! storage, delivery and identity lookups sit behind traits with in-memory implementations.

pub mod approvals;
pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod settings;
pub mod store;
pub mod workflow;

pub use approvals::{
    ApproverPolicy, ApproverSet, ModificationDecision, ModificationPolicy, PolicyError,
};
pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
pub use directory::{Directory, DirectoryError, DirectoryUser, StaticDirectory};
pub use domain::{
    AuthorizationId, AuthorizationRecord, AuthorizationStatus, NotificationHandle, UserId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{
    ActionKind, BotIdentity, DeliveryError, NotificationDelivery, NotificationSynchronizer,
    ParticipantView,
};
pub use settings::{ConfigurationManager, FieldPath, SettingValue};
pub use store::{AuthorizationStore, StoreError};
pub use workflow::{
    ActionOutcome, ActionReceipt, AuthorizationWorkflow, WorkflowConfig, WorkflowContext,
    WorkflowError,
};
