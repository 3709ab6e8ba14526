//! Slack integration for multi-party authorization.
//!
//! - **Slash command** (`commands`) - `/mpa <field> <field> ... <value>` starts a request,
//!   `/mpa <field> ...` shows the current value, `/mpa help` lists every leaf field
//! - **Events** (`events`) - routes slash commands and the authorize/deny/cancel buttons into the
//!   workflow and turns its results into acknowledgments
//! - **Delivery** (`delivery`) - direct messages and message updates through the Web API
//! - **Block Kit** (`blocks`) - message builders and participant-view rendering
//! - **Socket Mode** (`socket`) - envelope loop with reconnection logic
//!
//! # Architecture
//!
//! ```text
//! Slack Events → EventDispatcher → Handlers → AuthorizationWorkflow
//!                    ↓                               ↓
//!              acknowledgment            SlackNotificationDelivery → chat.postMessage / chat.update
//! ```

pub mod blocks;
pub mod commands;
pub mod delivery;
pub mod events;
pub mod socket;

#[cfg(test)]
pub(crate) mod test_support;
