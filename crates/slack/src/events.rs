use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mpa_core::domain::{AuthorizationId, UserId};
use mpa_core::notify::ActionKind;
use mpa_core::workflow::{ActionReceipt, AuthorizationWorkflow, WorkflowError};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    blocks::{self, action_kind_from_id, MessageTemplate},
    commands::{
        normalize_mpa_command, CommandParseError, CommandRouter,
        MpaCommandService, SlashCommandPayload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    BlockAction,
    Unsupported,
}

/// A button press on one of the bot's direct messages. `value` carries the authorization id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub user_id: String,
    pub action_id: String,
    pub value: Option<String>,
    pub request_id: Option<String>,
}

impl BlockActionEvent {
    pub fn authorization_id(&self) -> Option<AuthorizationId> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| AuthorizationId(value.to_owned()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher wired to a workflow: `/mpa` commands and the authorize/deny/cancel buttons.
pub fn workflow_dispatcher(workflow: Arc<AuthorizationWorkflow>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(workflow.clone()));
    dispatcher.register(BlockActionHandler::new(workflow));
    dispatcher
}

pub struct SlashCommandHandler<S> {
    router: CommandRouter<S>,
}

impl<S> SlashCommandHandler<S>
where
    S: MpaCommandService,
{
    pub fn new(service: S) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl<S> EventHandler for SlashCommandHandler<S>
where
    S: MpaCommandService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let normalized = normalize_mpa_command(payload.clone())?;
        match self.router.route(normalized).await {
            Ok(message) => Ok(HandlerResult::Responded(message)),
            Err(error) => {
                let failure = error.into_interface(ctx.correlation_id.clone());
                warn!(
                    event_name = "mpa.command.failed",
                    correlation_id = %ctx.correlation_id,
                    error = %failure,
                    "slash command could not be completed"
                );
                Ok(HandlerResult::Responded(blocks::error_message(
                    failure.user_message(),
                    failure.correlation_id(),
                )))
            }
        }
    }
}

/// The three callback actions offered on participant messages.
#[async_trait]
pub trait BlockActionService: Send + Sync {
    async fn act(
        &self,
        kind: ActionKind,
        id: &AuthorizationId,
        actor: &UserId,
    ) -> Result<ActionReceipt, WorkflowError>;
}

#[async_trait]
impl BlockActionService for AuthorizationWorkflow {
    async fn act(
        &self,
        kind: ActionKind,
        id: &AuthorizationId,
        actor: &UserId,
    ) -> Result<ActionReceipt, WorkflowError> {
        match kind {
            ActionKind::Approve => self.approve(id, actor).await,
            ActionKind::Deny => self.deny(id, actor).await,
            ActionKind::Cancel => self.cancel(id, actor).await,
        }
    }
}

#[async_trait]
impl<T> BlockActionService for Arc<T>
where
    T: BlockActionService + ?Sized,
{
    async fn act(
        &self,
        kind: ActionKind,
        id: &AuthorizationId,
        actor: &UserId,
    ) -> Result<ActionReceipt, WorkflowError> {
        self.as_ref().act(kind, id, actor).await
    }
}

pub struct BlockActionHandler<S> {
    service: S,
}

impl<S> BlockActionHandler<S>
where
    S: BlockActionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for BlockActionHandler<S>
where
    S: BlockActionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(kind) = action_kind_from_id(&event.action_id) else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(id) = event.authorization_id() else {
            let error = WorkflowError::NotFound(AuthorizationId(String::new()));
            return Ok(HandlerResult::Responded(blocks::acknowledgment_message(
                &error.user_message(),
            )));
        };

        let actor = UserId::new(event.user_id.clone());
        let text = match self.service.act(kind, &id, &actor).await {
            Ok(receipt) => {
                info!(
                    event_name = "mpa.action.acknowledged",
                    correlation_id = %ctx.correlation_id,
                    authorization_id = %id,
                    action = kind.as_str(),
                    status = receipt.status.as_str(),
                    "block action completed"
                );
                receipt.outcome.message().to_owned()
            }
            Err(error) => {
                warn!(
                    event_name = "mpa.action.rejected",
                    correlation_id = %ctx.correlation_id,
                    authorization_id = %id,
                    action = kind.as_str(),
                    error_class = error.class(),
                    error = %error,
                    "block action rejected"
                );
                error.user_message()
            }
        };

        Ok(HandlerResult::Responded(blocks::acknowledgment_message(&text)))
    }
}
