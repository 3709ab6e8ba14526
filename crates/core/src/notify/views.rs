use std::collections::BTreeMap;

use crate::domain::authorization::{
    AuthorizationRecord, AuthorizationStatus, ResolutionReason, UserId,
};

use super::{ActionKind, ParticipantView, ViewAction};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Viewer {
    Approver(UserId),
    Requester,
}

/// Usernames for the participants of one record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayNames {
    names: BTreeMap<UserId, String>,
}

impl DisplayNames {
    pub fn insert(&mut self, user: UserId, username: impl Into<String>) {
        self.names.insert(user, username.into());
    }

    pub fn with(mut self, user: &str, username: &str) -> Self {
        self.insert(UserId::new(user), username);
        self
    }

    pub fn mention(&self, user: &UserId) -> String {
        match self.names.get(user) {
            Some(username) => format!("@{username}"),
            None => format!("User with ID {user}"),
        }
    }

    fn list<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) -> String {
        let mentions: Vec<String> = users.into_iter().map(|user| self.mention(user)).collect();
        mentions.join(", ")
    }
}

pub fn render_view(
    record: &AuthorizationRecord,
    viewer: &Viewer,
    names: &DisplayNames,
) -> ParticipantView {
    if record.status.is_terminal() {
        return ParticipantView::text_only(terminal_text(record, viewer, names));
    }

    match viewer {
        Viewer::Approver(approver) => {
            let mut text = format!(
                "User {} requested to modify `{}` to the value `{}`.",
                names.mention(&record.requester_id),
                record.field_path,
                record.proposed_value
            );
            if !record.approvals.is_empty() {
                text.push_str(&format!(
                    "\nAlready authorized by: {}",
                    names.list(&record.approvals)
                ));
            }

            if record.has_approved(approver) {
                return ParticipantView::text_only(text);
            }
            ParticipantView {
                text,
                actions: vec![action(record, ActionKind::Approve), action(record, ActionKind::Deny)],
            }
        }
        Viewer::Requester => {
            let mut text = format!(
                "You have requested to modify {} to the value {}.\n",
                record.field_path, record.proposed_value
            );
            if !record.approvals.is_empty() {
                text.push_str(&format!(
                    "This change has already been authorized by: {}.\n",
                    names.list(&record.approvals)
                ));
            }
            text.push_str(&format!(
                "Waiting for authorizations from {}. You need {} more authorizations.",
                names.list(record.pending_approvers()),
                record.remaining_approvals()
            ));
            ParticipantView { text, actions: vec![action(record, ActionKind::Cancel)] }
        }
    }
}

/// Fresh message sent to the requester once the record is terminal.
pub fn completion_notice(record: &AuthorizationRecord) -> ParticipantView {
    let outcome = match record.status {
        AuthorizationStatus::Applied => "applied",
        AuthorizationStatus::Denied => "denied",
        AuthorizationStatus::Cancelled if expired(record) => "expired",
        AuthorizationStatus::Cancelled => "cancelled",
        AuthorizationStatus::Pending => "pending",
    };
    ParticipantView::text_only(format!(
        "Your request {} has ended: {outcome}. Check the original message.",
        record.id
    ))
}

/// Sent to the requester when quorum was reached but the configuration could not be saved.
pub fn apply_failed_notice(record: &AuthorizationRecord, reason: &str) -> ParticipantView {
    ParticipantView::text_only(format!(
        "Your request {} to modify {} to {} could not be applied: {reason}. \
         It is still pending and will be retried when an approver authorizes it again.",
        record.id, record.field_path, record.proposed_value
    ))
}

fn terminal_text(record: &AuthorizationRecord, viewer: &Viewer, names: &DisplayNames) -> String {
    let requester = names.mention(&record.requester_id);
    let path = &record.field_path;
    let value = &record.proposed_value;
    let actor = record
        .resolution
        .as_ref()
        .and_then(|resolution| resolution.actor.as_ref())
        .map(|actor| names.mention(actor))
        .unwrap_or_else(|| "the system".to_string());
    let is_requester = matches!(viewer, Viewer::Requester);

    match record.status {
        AuthorizationStatus::Applied if is_requester => format!(
            "Your request to modify {path} to {value} has been authorized by {} and it is already applied.",
            names.list(&record.approvals)
        ),
        AuthorizationStatus::Applied => format!(
            "{requester} has been authorized to modify {path} to `{value}` by {}.",
            names.list(&record.approvals)
        ),
        AuthorizationStatus::Denied if is_requester => {
            format!("Your request to modify {path} to {value} was denied by {actor}.")
        }
        AuthorizationStatus::Denied => format!(
            "The request from {requester} to modify `{path}` to `{value}` was denied by {actor}."
        ),
        AuthorizationStatus::Cancelled if expired(record) && is_requester => {
            format!("Your request to modify {path} to {value} expired before it was authorized.")
        }
        AuthorizationStatus::Cancelled if expired(record) => format!(
            "The request from {requester} to modify `{path}` to `{value}` expired without being authorized."
        ),
        AuthorizationStatus::Cancelled if is_requester => {
            format!("You cancelled your request to modify {path} to {value}.")
        }
        AuthorizationStatus::Cancelled => {
            format!("{requester} cancelled the request to modify `{path}` to `{value}`.")
        }
        AuthorizationStatus::Pending => String::new(),
    }
}

fn expired(record: &AuthorizationRecord) -> bool {
    record
        .resolution
        .as_ref()
        .is_some_and(|resolution| resolution.reason == ResolutionReason::Expired)
}

fn action(record: &AuthorizationRecord, kind: ActionKind) -> ViewAction {
    ViewAction { kind, authorization_id: record.id.clone() }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::{apply_failed_notice, completion_notice, render_view, DisplayNames, Viewer};
    use crate::domain::authorization::{
        AuthorizationId, AuthorizationRecord, NotificationHandle, UserId,
    };
    use crate::notify::ActionKind;
    use crate::settings::FieldPath;

    fn names() -> DisplayNames {
        DisplayNames::default().with("U-bob", "bob").with("U-alice", "alice").with("U-carol", "carol")
    }

    fn record(required: u32) -> AuthorizationRecord {
        let assignment: BTreeMap<UserId, NotificationHandle> = ["U-alice", "U-carol"]
            .into_iter()
            .map(|id| (UserId::new(id), NotificationHandle::new(format!("D-{id}"), "1")))
            .collect();
        AuthorizationRecord::new(
            AuthorizationId("auth-7".to_string()),
            FieldPath::new(["ServiceSettings", "SiteURL"]),
            "https://x",
            UserId::new("U-bob"),
            assignment,
            None,
            required,
            Utc::now(),
            None,
        )
    }

    #[test]
    fn approver_view_offers_authorize_and_deny_until_they_act() {
        let mut record = record(2);
        let alice = UserId::new("U-alice");

        let view = render_view(&record, &Viewer::Approver(alice.clone()), &names());
        assert_eq!(
            view.text,
            "User @bob requested to modify `ServiceSettings->SiteURL` to the value `https://x`."
        );
        assert!(view.has_action(ActionKind::Approve));
        assert!(view.has_action(ActionKind::Deny));
        assert_eq!(view.actions[0].authorization_id.0, "auth-7");

        record.record_approval(&alice, Utc::now()).expect("approve");
        let acted = render_view(&record, &Viewer::Approver(alice), &names());
        assert!(acted.actions.is_empty());
        assert!(acted.text.ends_with("\nAlready authorized by: @alice"));

        let other = render_view(&record, &Viewer::Approver(UserId::new("U-carol")), &names());
        assert_eq!(other.actions.len(), 2);
    }

    #[test]
    fn requester_view_tracks_progress_and_offers_cancel() {
        let mut record = record(2);
        record.record_approval(&UserId::new("U-alice"), Utc::now()).expect("approve");

        let view = render_view(&record, &Viewer::Requester, &names());
        assert_eq!(
            view.text,
            "You have requested to modify ServiceSettings->SiteURL to the value https://x.\n\
             This change has already been authorized by: @alice.\n\
             Waiting for authorizations from @carol. You need 1 more authorizations."
        );
        assert!(view.has_action(ActionKind::Cancel));
        assert_eq!(view.actions.len(), 1);
    }

    #[test]
    fn apply_failure_notice_keeps_request_open_for_retry() {
        let view = apply_failed_notice(&record(1), "disk full");
        assert!(view.actions.is_empty());
        assert_eq!(
            view.text,
            "Your request auth-7 to modify ServiceSettings->SiteURL to https://x could not be \
             applied: disk full. It is still pending and will be retried when an approver \
             authorizes it again."
        );
    }

    #[test]
    fn terminal_views_have_no_actions_for_anyone() {
        let mut record = record(1);
        record.complete(&UserId::new("U-carol"), Utc::now()).expect("complete");

        let approver = render_view(&record, &Viewer::Approver(UserId::new("U-alice")), &names());
        assert!(approver.actions.is_empty());
        assert_eq!(
            approver.text,
            "@bob has been authorized to modify ServiceSettings->SiteURL to `https://x` by @carol."
        );

        let requester = render_view(&record, &Viewer::Requester, &names());
        assert!(requester.actions.is_empty());
        assert!(requester.text.ends_with("authorized by @carol and it is already applied."));

        assert_eq!(
            completion_notice(&record).text,
            "Your request auth-7 has ended: applied. Check the original message."
        );
    }

    #[test]
    fn denial_and_cancellation_name_the_actor() {
        let mut denied = record(2);
        denied.deny(&UserId::new("U-carol"), Utc::now()).expect("deny");
        let view = render_view(&denied, &Viewer::Requester, &names());
        assert_eq!(view.text, "Your request to modify ServiceSettings->SiteURL to https://x was denied by @carol.");

        let mut cancelled = record(2);
        cancelled.cancel(&UserId::new("U-bob"), Utc::now()).expect("cancel");
        let view = render_view(&cancelled, &Viewer::Approver(UserId::new("U-alice")), &names());
        assert_eq!(view.text, "@bob cancelled the request to modify `ServiceSettings->SiteURL` to `https://x`.");
    }

    #[test]
    fn unknown_users_fall_back_to_id() {
        let record = record(1);
        let view = render_view(&record, &Viewer::Approver(UserId::new("U-alice")), &DisplayNames::default());
        assert!(view.text.starts_with("User User with ID U-bob requested"));
    }
}
