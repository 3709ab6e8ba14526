use thiserror::Error;

use crate::approvals::PolicyError;
use crate::domain::authorization::{
    AuthorizationId, AuthorizationStatus, TransitionError, UserId,
};
use crate::settings::{FieldPath, LeafKind, PathError, SettingKind, SettingsStoreError};
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid field path: {0}")]
    InvalidPath(PathError),
    #[error("{0} is not a leaf config value")]
    NotALeaf(FieldPath),
    #[error("type {kind} of {path} is not supported")]
    UnsupportedType { path: FieldPath, kind: SettingKind },
    #[error("`{value}` is not a valid {kind} value")]
    InvalidValue { kind: LeafKind, value: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("authorization `{0}` not found")]
    NotFound(AuthorizationId),
    #[error("user {0} is not allowed to act on this request")]
    NotAuthorized(UserId),
    #[error("request is already {}", .0.as_str())]
    AlreadyFinalized(AuthorizationStatus),
    #[error("authorization `{id}` is being modified concurrently (after {attempts} attempt(s))")]
    Conflict { id: AuthorizationId, attempts: u32 },
    #[error("authorization `{id}` could not be applied: {reason}")]
    ApplyFailed { id: AuthorizationId, reason: String },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsStoreError),
    #[error("unexpected transition: {0}")]
    Transition(String),
}

impl WorkflowError {
    /// Short machine-readable class used in acknowledgments and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::NotALeaf(_) => "not_a_leaf",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::InvalidValue { .. } => "invalid_value",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::NotAuthorized(_) => "not_authorized",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::Conflict { .. } => "conflict",
            Self::ApplyFailed { .. } => "apply_failed",
            Self::Policy(_) => "policy",
            Self::Delivery(_) => "delivery_failed",
            Self::Store(_) => "store",
            Self::Settings(_) => "settings",
            Self::Transition(_) => "transition",
        }
    }

    /// Text shown to the user who triggered the failing action.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(_) => "Cannot find the ID of the authorization".to_string(),
            Self::NotAuthorized(_) => "You cannot authorize this action.".to_string(),
            Self::AlreadyFinalized(status) => {
                format!("This request is already {}.", status.as_str())
            }
            Self::Conflict { .. } => {
                "This request is being updated by someone else. Please try again.".to_string()
            }
            Self::ApplyFailed { reason, .. } => {
                format!("The change could not be applied ({reason}). You can authorize again to retry.")
            }
            Self::Store(_) | Self::Settings(_) | Self::Transition(_) => {
                "An unexpected internal error occurred.".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath(_)
                | Self::NotALeaf(_)
                | Self::UnsupportedType { .. }
                | Self::InvalidValue { .. }
                | Self::PermissionDenied(_)
                | Self::NotFound(_)
                | Self::NotAuthorized(_)
                | Self::AlreadyFinalized(_)
        )
    }
}

impl From<PathError> for WorkflowError {
    fn from(value: PathError) -> Self {
        match value {
            PathError::NotALeaf(path) => Self::NotALeaf(path),
            PathError::UnsupportedType { path, kind } => Self::UnsupportedType { path, kind },
            PathError::InvalidValue { kind, value } => Self::InvalidValue { kind, value },
            PathError::KindMismatch { expected, found, .. } => {
                Self::InvalidValue { kind: expected, value: found.to_string() }
            }
            other @ (PathError::EmptyPath | PathError::PathNotFound { .. }) => {
                Self::InvalidPath(other)
            }
        }
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::NotAuthorized(user) => Self::NotAuthorized(user),
            TransitionError::AlreadyFinalized(status) => Self::AlreadyFinalized(status),
            other @ TransitionError::InvalidEvent { .. } => Self::Transition(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkflowError;
    use crate::domain::authorization::{AuthorizationId, AuthorizationStatus, TransitionError, UserId};
    use crate::settings::{FieldPath, LeafKind, PathError};

    #[test]
    fn path_errors_map_onto_submission_taxonomy() {
        let missing = WorkflowError::from(PathError::PathNotFound {
            parent: FieldPath::default(),
            segment: "Nope".to_string(),
        });
        assert_eq!(missing.class(), "invalid_path");
        assert_eq!(missing.to_string(), "invalid field path: configuration has no field Nope");

        let invalid = WorkflowError::from(PathError::InvalidValue {
            kind: LeafKind::Bool,
            value: "maybe".to_string(),
        });
        assert_eq!(invalid.class(), "invalid_value");
        assert!(invalid.is_validation());
    }

    #[test]
    fn action_errors_carry_legacy_user_texts() {
        assert_eq!(
            WorkflowError::NotFound(AuthorizationId("x".to_string())).user_message(),
            "Cannot find the ID of the authorization"
        );
        assert_eq!(
            WorkflowError::from(TransitionError::NotAuthorized(UserId::new("eve"))).user_message(),
            "You cannot authorize this action."
        );
        assert_eq!(
            WorkflowError::from(TransitionError::AlreadyFinalized(AuthorizationStatus::Denied))
                .user_message(),
            "This request is already denied."
        );
    }
}
