pub mod authorization;

pub use authorization::{
    AuthorizationEvent, AuthorizationId, AuthorizationRecord, AuthorizationStatus, FinalizeClaim,
    NotificationHandle, Resolution, ResolutionReason, TransitionError, UserId,
};
