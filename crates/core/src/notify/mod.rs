//! Participant notifications.
//!
//! [`views`] renders what each participant should currently see; [`sync`] pushes those views
//! through a [`NotificationDelivery`] implementation and updates every message it delivered
//! earlier.

pub mod sync;
pub mod views;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authorization::{AuthorizationId, NotificationHandle, UserId};

pub use sync::{NotificationSynchronizer, SyncReport};
pub use views::{apply_failed_notice, completion_notice, render_view, DisplayNames, Viewer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Deny,
    Cancel,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "authorize",
            Self::Deny => "deny",
            Self::Cancel => "cancel",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "Authorize",
            Self::Deny => "Deny",
            Self::Cancel => "Cancel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "authorize" | "approve" => Some(Self::Approve),
            "deny" => Some(Self::Deny),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// An action offered on a message; the record id travels as the action context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewAction {
    pub kind: ActionKind,
    pub authorization_id: AuthorizationId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub text: String,
    pub actions: Vec<ViewAction>,
}

impl ParticipantView {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), actions: Vec::new() }
    }

    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|action| action.kind == kind)
    }
}

/// Account the direct messages are sent from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub username: String,
    pub display_name: String,
    pub description: String,
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            username: "mpa".to_string(),
            display_name: "MPA".to_string(),
            description: "Multi-party Authorization bot".to_string(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("message delivery rejected: {0}")]
    Rejected(String),
    #[error("message transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn send_direct_message(
        &self,
        bot: &BotIdentity,
        to: &UserId,
        view: &ParticipantView,
    ) -> Result<NotificationHandle, DeliveryError>;

    async fn update_message(
        &self,
        handle: &NotificationHandle,
        view: &ParticipantView,
    ) -> Result<(), DeliveryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub handle: NotificationHandle,
    pub recipient: UserId,
    pub view: ParticipantView,
    pub revision: u32,
}

#[derive(Default)]
struct RecordingState {
    messages: BTreeMap<String, DeliveredMessage>,
    sent: u32,
    unreachable: HashSet<UserId>,
    frozen_channels: HashSet<String>,
}

/// Delivery that keeps every message in memory. Users marked unreachable fail on send; messages
/// in frozen channels fail on update.
#[derive(Clone, Default)]
pub struct RecordingDelivery {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDelivery {
    pub fn mark_unreachable(&self, user: &UserId) {
        self.with_state(|state| {
            state.unreachable.insert(user.clone());
        });
    }

    pub fn freeze_updates_for(&self, user: &UserId) {
        self.with_state(|state| {
            state.frozen_channels.insert(dm_channel(user));
        });
    }

    pub fn messages(&self) -> Vec<DeliveredMessage> {
        self.with_state(|state| state.messages.values().cloned().collect())
    }

    /// Current view of every message addressed to `user`, in send order.
    pub fn messages_for(&self, user: &UserId) -> Vec<DeliveredMessage> {
        let mut messages: Vec<DeliveredMessage> =
            self.messages().into_iter().filter(|message| &message.recipient == user).collect();
        messages.sort_by(|left, right| left.handle.message_ref.cmp(&right.handle.message_ref));
        messages
    }

    pub fn latest_for(&self, user: &UserId) -> Option<DeliveredMessage> {
        self.messages_for(user).into_iter().next_back()
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut RecordingState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl NotificationDelivery for RecordingDelivery {
    async fn send_direct_message(
        &self,
        _bot: &BotIdentity,
        to: &UserId,
        view: &ParticipantView,
    ) -> Result<NotificationHandle, DeliveryError> {
        self.with_state(|state| {
            if state.unreachable.contains(to) {
                return Err(DeliveryError::Rejected(format!("cannot open a DM with {to}")));
            }
            state.sent += 1;
            let handle = NotificationHandle::new(dm_channel(to), format!("{:06}", state.sent));
            state.messages.insert(
                message_key(&handle),
                DeliveredMessage {
                    handle: handle.clone(),
                    recipient: to.clone(),
                    view: view.clone(),
                    revision: 0,
                },
            );
            Ok(handle)
        })
    }

    async fn update_message(
        &self,
        handle: &NotificationHandle,
        view: &ParticipantView,
    ) -> Result<(), DeliveryError> {
        self.with_state(|state| {
            if state.frozen_channels.contains(&handle.channel) {
                return Err(DeliveryError::Transport(format!(
                    "channel {} is not accepting updates",
                    handle.channel
                )));
            }
            let Some(message) = state.messages.get_mut(&message_key(handle)) else {
                return Err(DeliveryError::Rejected(format!(
                    "message {} not found",
                    handle.message_ref
                )));
            };
            message.view = view.clone();
            message.revision += 1;
            Ok(())
        })
    }
}

fn dm_channel(user: &UserId) -> String {
    format!("D-{user}")
}

fn message_key(handle: &NotificationHandle) -> String {
    format!("{}:{}", handle.channel, handle.message_ref)
}
