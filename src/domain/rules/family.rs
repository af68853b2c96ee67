//! Family group membership changes.

use super::{NotificationCandidate, RuleInput, RuleRegistry};
use crate::domain::event::SourceModule;
use crate::domain::notification::{Priority, Severity};

pub const INVITATION_SENT: &str = "family.invitation_sent";
pub const INVITATION_ACCEPTED: &str = "family.invitation_accepted";
pub const INVITATION_DECLINED: &str = "family.invitation_declined";
pub const MEMBER_JOINED: &str = "family.member_joined";
pub const ROLE_CHANGED: &str = "family.role_changed";

pub const KINDS: [&str; 5] = [
    INVITATION_SENT,
    INVITATION_ACCEPTED,
    INVITATION_DECLINED,
    MEMBER_JOINED,
    ROLE_CHANGED,
];

pub(crate) fn register(registry: &mut RuleRegistry) {
    for kind in KINDS {
        registry.register(SourceModule::Family, kind, "family.membership", membership_rule);
    }
}

/// One notification per recipient for any membership change.
///
/// The affected member (`targetUserId`) gets a high priority notice written
/// to them; other members get a medium priority notice. An actor is not told
/// about their own action unless they are also the target.
pub fn membership_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let event = input.event;
    let kind = event.event_kind.as_str();
    let recipient = input.recipient.as_str();

    let target_id = event.text("targetUserId");
    let is_target = target_id == Some(recipient);
    if event.text("actorUserId") == Some(recipient) && !is_target {
        return None;
    }

    let family = event.text("familyName").unwrap_or("your family");
    let actor = event.text("actorName").unwrap_or("A family member");
    let target = event.text("targetName").unwrap_or("A member");
    let role = event.text("role").unwrap_or("member");

    let (title, message, severity, label) = match (kind, is_target) {
        (INVITATION_SENT, true) => (
            "Family invitation",
            format!("{} invited you to join {}.", actor, family),
            Severity::Info,
            "family invitations",
        ),
        (INVITATION_SENT, false) => (
            "Family invitation sent",
            format!("{} invited {} to join {}.", actor, target, family),
            Severity::Info,
            "family invitations",
        ),
        (INVITATION_ACCEPTED, true) => (
            "Invitation accepted",
            format!("You are now a member of {}.", family),
            Severity::Success,
            "accepted invitations",
        ),
        (INVITATION_ACCEPTED, false) => (
            "Invitation accepted",
            format!("{} accepted the invitation to {}.", target, family),
            Severity::Success,
            "accepted invitations",
        ),
        (INVITATION_DECLINED, true) => (
            "Invitation declined",
            format!("You declined the invitation to {}.", family),
            Severity::Info,
            "declined invitations",
        ),
        (INVITATION_DECLINED, false) => (
            "Invitation declined",
            format!("{} declined the invitation to {}.", target, family),
            Severity::Warning,
            "declined invitations",
        ),
        (MEMBER_JOINED, true) => (
            "Welcome to the family",
            format!("Welcome to {}!", family),
            Severity::Success,
            "new family members",
        ),
        (MEMBER_JOINED, false) => (
            "New family member",
            format!("{} joined {}.", target, family),
            Severity::Success,
            "new family members",
        ),
        (ROLE_CHANGED, true) => (
            "Your role changed",
            format!("{} made you {} of {}.", actor, article(role), family),
            Severity::Info,
            "role changes",
        ),
        (ROLE_CHANGED, false) => (
            "Member role changed",
            format!("{} is now {} of {}.", target, article(role), family),
            Severity::Info,
            "role changes",
        ),
        _ => return None,
    };

    let priority = if is_target {
        Priority::High
    } else {
        Priority::Medium
    };

    let mut candidate = NotificationCandidate::for_recipient(input, kind, &event.subject_id)
        .titled(title, message)
        .ranked(priority, severity)
        .aggregated_as(label);
    if let Some(target_id) = target_id {
        candidate = candidate.with_metadata("targetUserId", target_id);
    }
    if kind == INVITATION_SENT && is_target {
        candidate = candidate.actionable("/family/invitations");
    } else {
        candidate = candidate.actionable(format!("/family/{}", event.subject_id));
    }
    Some(candidate)
}

fn article(role: &str) -> String {
    let vowel = role
        .chars()
        .next()
        .is_some_and(|c| "aeiouAEIOU".contains(c));
    format!("{} {}", if vowel { "an" } else { "a" }, role)
}
