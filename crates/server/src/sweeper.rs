use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mpa_core::workflow::AuthorizationWorkflow;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs one expiry pass over Pending requests.
pub async fn sweep_once(workflow: &AuthorizationWorkflow) -> usize {
    match workflow.sweep_expired(Utc::now()).await {
        Ok(0) => {
            debug!(event_name = "mpa.sweeper.idle", "no expired requests");
            0
        }
        Ok(expired) => {
            info!(event_name = "mpa.sweeper.expired", expired, "expired pending requests");
            expired
        }
        Err(error) => {
            warn!(
                event_name = "mpa.sweeper.failed",
                error = %error,
                "expiry sweep failed; retrying next interval"
            );
            0
        }
    }
}

pub fn spawn(workflow: Arc<AuthorizationWorkflow>, interval_secs: u64) -> JoinHandle<()> {
    let period = Duration::from_secs(interval_secs.max(1));
    info!(
        event_name = "mpa.sweeper.start",
        correlation_id = "bootstrap",
        interval_secs = period.as_secs(),
        "expiry sweeper started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&workflow).await;
        }
    })
}
