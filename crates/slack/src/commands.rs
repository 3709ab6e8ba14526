use std::sync::Arc;

use async_trait::async_trait;
use mpa_core::domain::{AuthorizationId, UserId};
use mpa_core::errors::{ApplicationError, InterfaceError};
use mpa_core::settings::{enumerate_leaf_paths, FieldPath, SettingValue};
use mpa_core::workflow::{AuthorizationWorkflow, WorkflowError};
use thiserror::Error;
use tracing::info;

use crate::blocks::{self, MessageTemplate};

pub const MPA_COMMAND: &str = "/mpa";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_ts: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub tokens: Vec<String>,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_ts: String,
    pub request_id: String,
}

/// What a `/mpa` invocation means once its tokens are walked against the configuration tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MpaCommand {
    Help,
    Show { path: FieldPath, current: String },
    Assign { path: FieldPath, value: String },
    NotALeaf(FieldPath),
    UnknownField { parent: FieldPath, name: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRouteError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl CommandRouteError {
    /// Classifies the failure for the person who ran the command.
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        match self {
            Self::Workflow(error) => ApplicationError::from(error).into_interface(correlation_id),
        }
    }
}

pub fn normalize_mpa_command(
    payload: SlashCommandPayload,
) -> Result<CommandEnvelope, CommandParseError> {
    if payload.command != MPA_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command));
    }

    Ok(CommandEnvelope {
        tokens: payload.text.split_whitespace().map(str::to_owned).collect(),
        channel_id: payload.channel_id,
        user_id: payload.user_id,
        trigger_ts: payload.trigger_ts,
        request_id: payload.request_id,
    })
}

/// Tokens are consumed as field names while the current node is a section; whatever remains,
/// joined by single spaces, is the proposed value.
pub fn plan_command(root: &SettingValue, tokens: &[String]) -> MpaCommand {
    match tokens {
        [] => return MpaCommand::Help,
        [only] if only.eq_ignore_ascii_case("help") && root.field(only).is_none() => {
            return MpaCommand::Help
        }
        _ => {}
    }

    let mut node = root;
    let mut path = FieldPath::default();
    let mut consumed = 0;
    while node.is_section() {
        let Some(name) = tokens.get(consumed) else {
            return MpaCommand::NotALeaf(path);
        };
        match node.field(name) {
            Some((canonical, child)) => {
                path = path.child(canonical);
                node = child;
                consumed += 1;
            }
            None => return MpaCommand::UnknownField { parent: path, name: name.clone() },
        }
    }

    let rest = &tokens[consumed..];
    if rest.is_empty() {
        MpaCommand::Show { path, current: node.render() }
    } else {
        MpaCommand::Assign { path, value: rest.join(" ") }
    }
}

#[async_trait]
pub trait MpaCommandService: Send + Sync {
    async fn settings_snapshot(&self) -> Result<SettingValue, WorkflowError>;

    async fn submit(
        &self,
        path: &FieldPath,
        value: &str,
        requester: &UserId,
    ) -> Result<AuthorizationId, WorkflowError>;
}

#[async_trait]
impl MpaCommandService for AuthorizationWorkflow {
    async fn settings_snapshot(&self) -> Result<SettingValue, WorkflowError> {
        AuthorizationWorkflow::settings_snapshot(self).await
    }

    async fn submit(
        &self,
        path: &FieldPath,
        value: &str,
        requester: &UserId,
    ) -> Result<AuthorizationId, WorkflowError> {
        AuthorizationWorkflow::submit(self, path.segments(), value, requester).await
    }
}

#[async_trait]
impl<T> MpaCommandService for Arc<T>
where
    T: MpaCommandService + ?Sized,
{
    async fn settings_snapshot(&self) -> Result<SettingValue, WorkflowError> {
        self.as_ref().settings_snapshot().await
    }

    async fn submit(
        &self,
        path: &FieldPath,
        value: &str,
        requester: &UserId,
    ) -> Result<AuthorizationId, WorkflowError> {
        self.as_ref().submit(path, value, requester).await
    }
}

pub struct CommandRouter<S> {
    service: S,
}

impl<S> CommandRouter<S>
where
    S: MpaCommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Resolves the command against the current configuration and replies to the caller.
    /// Validation failures become plain replies; anything else is returned as an error.
    pub async fn route(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        let snapshot = self.service.settings_snapshot().await?;

        let reply = match plan_command(&snapshot, &envelope.tokens) {
            MpaCommand::Help => return Ok(blocks::help_message(&enumerate_leaf_paths(&snapshot))),
            MpaCommand::Show { path, current } => format!("The value of {path} is {current}"),
            MpaCommand::NotALeaf(path) => format!("{path} is not a leaf config value"),
            MpaCommand::UnknownField { parent, name } if parent.is_empty() => {
                format!("Configuration has no field {name}")
            }
            MpaCommand::UnknownField { parent, name } => {
                format!("Field {parent} has no field {name}")
            }
            MpaCommand::Assign { path, value } => {
                let requester = UserId::new(envelope.user_id.clone());
                match self.service.submit(&path, &value, &requester).await {
                    Ok(id) => {
                        info!(
                            event_name = "mpa.command.submitted",
                            correlation_id = %envelope.request_id,
                            authorization_id = %id,
                            user_id = %requester,
                            "authorization request started from slash command"
                        );
                        format!(
                            "Process to assign `{value}` to {path} has started. Check your DMs."
                        )
                    }
                    Err(error) if error.is_validation() => error.user_message(),
                    Err(error) => return Err(error.into()),
                }
            }
        };

        Ok(blocks::acknowledgment_message(&reply))
    }
}
