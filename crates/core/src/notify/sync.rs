use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::directory::Directory;
use crate::domain::authorization::{AuthorizationRecord, NotificationHandle, UserId};

use super::views::{apply_failed_notice, completion_notice, render_view, DisplayNames, Viewer};
use super::{BotIdentity, DeliveryError, NotificationDelivery, ParticipantView};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub updated: usize,
    pub failures: Vec<(UserId, DeliveryError)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps every participant's message in line with the stored record. All delivery is
/// best-effort: failures are logged and reported, never returned as errors.
#[derive(Clone)]
pub struct NotificationSynchronizer {
    delivery: Arc<dyn NotificationDelivery>,
    directory: Arc<dyn Directory>,
    bot: BotIdentity,
}

impl NotificationSynchronizer {
    pub fn new(
        delivery: Arc<dyn NotificationDelivery>,
        directory: Arc<dyn Directory>,
        bot: BotIdentity,
    ) -> Self {
        Self { delivery, directory, bot }
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    pub async fn display_names(&self, record: &AuthorizationRecord) -> DisplayNames {
        let mut names = DisplayNames::default();
        let participants =
            std::iter::once(&record.requester_id).chain(record.approver_assignment.keys());
        for user in participants {
            match self.directory.get_user(user).await {
                Ok(found) => names.insert(user.clone(), found.username),
                Err(error) => debug!(
                    event_name = "mpa.notify.display_name_missing",
                    user_id = %user,
                    error = %error,
                    "falling back to user id"
                ),
            }
        }
        names
    }

    /// Sends the initial approver messages for a record that has no assignment yet. Approvers
    /// that cannot be reached are left out of the returned map.
    pub async fn open_approver_threads(
        &self,
        draft: &AuthorizationRecord,
        approvers: &[UserId],
    ) -> (BTreeMap<UserId, NotificationHandle>, Vec<(UserId, DeliveryError)>) {
        let names = self.display_names(draft).await;
        let mut handles = BTreeMap::new();
        let mut failures = Vec::new();

        for approver in approvers {
            let view = render_view(draft, &Viewer::Approver(approver.clone()), &names);
            match self.send(approver, &view).await {
                Ok(handle) => {
                    handles.insert(approver.clone(), handle);
                }
                Err(error) => failures.push((approver.clone(), error)),
            }
        }

        (handles, failures)
    }

    pub async fn open_requester_thread(
        &self,
        record: &AuthorizationRecord,
    ) -> Option<NotificationHandle> {
        let names = self.display_names(record).await;
        let view = render_view(record, &Viewer::Requester, &names);
        self.send(&record.requester_id, &view).await.ok()
    }

    /// Re-renders and updates every message previously delivered for `record`.
    pub async fn sync(&self, record: &AuthorizationRecord) -> SyncReport {
        let names = self.display_names(record).await;
        let mut report = SyncReport::default();

        for (approver, handle) in &record.approver_assignment {
            let view = render_view(record, &Viewer::Approver(approver.clone()), &names);
            self.update(record, approver, handle, &view, &mut report).await;
        }
        if let Some(handle) = &record.requester_handle {
            let view = render_view(record, &Viewer::Requester, &names);
            self.update(record, &record.requester_id, handle, &view, &mut report).await;
        }

        if record.status.is_terminal() {
            let notice = completion_notice(record);
            if let Err(error) = self.send(&record.requester_id, &notice).await {
                report.failures.push((record.requester_id.clone(), error));
            }
        }

        report
    }

    /// Tells the requester that quorum was reached but the change did not reach the
    /// configuration, so the request stays open.
    pub async fn announce_apply_failure(&self, record: &AuthorizationRecord, reason: &str) -> bool {
        let notice = apply_failed_notice(record, reason);
        self.send(&record.requester_id, &notice).await.is_ok()
    }

    /// Replaces already delivered messages with a plain notice, used when a submission is
    /// abandoned before its record exists.
    pub async fn withdraw(&self, handles: &BTreeMap<UserId, NotificationHandle>, text: &str) {
        let view = ParticipantView::text_only(text);
        for (user, handle) in handles {
            if let Err(error) = self.delivery.update_message(handle, &view).await {
                warn!(
                    event_name = "mpa.notify.delivery_failed",
                    user_id = %user,
                    error = %error,
                    "could not withdraw approval message"
                );
            }
        }
    }

    async fn send(
        &self,
        to: &UserId,
        view: &ParticipantView,
    ) -> Result<NotificationHandle, DeliveryError> {
        self.delivery.send_direct_message(&self.bot, to, view).await.map_err(|error| {
            warn!(
                event_name = "mpa.notify.delivery_failed",
                user_id = %to,
                error = %error,
                "direct message not delivered"
            );
            error
        })
    }

    async fn update(
        &self,
        record: &AuthorizationRecord,
        user: &UserId,
        handle: &NotificationHandle,
        view: &ParticipantView,
        report: &mut SyncReport,
    ) {
        match self.delivery.update_message(handle, view).await {
            Ok(()) => report.updated += 1,
            Err(error) => {
                warn!(
                    event_name = "mpa.notify.delivery_failed",
                    correlation_id = %record.id,
                    user_id = %user,
                    error = %error,
                    "message update failed"
                );
                report.failures.push((user.clone(), error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;

    use super::NotificationSynchronizer;
    use crate::directory::StaticDirectory;
    use crate::domain::authorization::{AuthorizationId, AuthorizationRecord, UserId};
    use crate::notify::{ActionKind, BotIdentity, RecordingDelivery};
    use crate::settings::FieldPath;

    fn synchronizer(delivery: &RecordingDelivery) -> NotificationSynchronizer {
        let directory = StaticDirectory::default()
            .with_user("alice", "alice", &[])
            .with_user("carol", "carol", &[])
            .with_user("bob", "bob", &[]);
        NotificationSynchronizer::new(
            Arc::new(delivery.clone()),
            Arc::new(directory),
            BotIdentity::default(),
        )
    }

    fn draft() -> AuthorizationRecord {
        AuthorizationRecord::new(
            AuthorizationId("auth-1".to_string()),
            FieldPath::new(["ServiceSettings", "EnableDeveloper"]),
            "true",
            UserId::new("bob"),
            BTreeMap::new(),
            None,
            1,
            Utc::now(),
            None,
        )
    }

    #[tokio::test]
    async fn unreachable_approver_is_left_out_without_blocking_others() {
        let delivery = RecordingDelivery::default();
        delivery.mark_unreachable(&UserId::new("carol"));
        let sync = synchronizer(&delivery);

        let (handles, failures) = sync
            .open_approver_threads(&draft(), &[UserId::new("alice"), UserId::new("carol")])
            .await;

        assert_eq!(handles.len(), 1);
        assert!(handles.contains_key(&UserId::new("alice")));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, UserId::new("carol"));
    }

    #[tokio::test]
    async fn sync_updates_every_message_and_strips_actions_when_terminal() {
        let delivery = RecordingDelivery::default();
        let sync = synchronizer(&delivery);
        let mut record = draft();

        let (handles, _) = sync
            .open_approver_threads(&record, &[UserId::new("alice"), UserId::new("carol")])
            .await;
        record.approver_assignment = handles;
        record.requester_handle = sync.open_requester_thread(&record).await;
        assert!(record.requester_handle.is_some());

        record.deny(&UserId::new("carol"), Utc::now()).expect("deny");
        delivery.freeze_updates_for(&UserId::new("alice"));
        let report = sync.sync(&record).await;

        assert_eq!(report.updated, 2);
        assert_eq!(report.failures.len(), 1);

        let carol = delivery.latest_for(&UserId::new("carol")).expect("carol message");
        assert!(carol.view.actions.is_empty());
        assert!(carol.view.text.contains("was denied by @carol"));

        let bob = delivery.messages_for(&UserId::new("bob"));
        assert_eq!(bob.len(), 2);
        assert!(!bob[0].view.has_action(ActionKind::Cancel));
        assert!(bob[1].view.text.contains("has ended: denied"));
    }
}
