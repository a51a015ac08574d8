use crate::types::{QuestionStats, UserId};

/// What the vote policy did to an incoming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Same requester as the displayed state: incoming stats taken as-is.
    Continued,
    /// Different requester: local vote kept, attribution claimed locally.
    Preserved,
}

/// Merge the viewer-local vote state of `existing` into `incoming`.
///
/// A broadcast caused by somebody else's vote changes the aggregate score
/// but says nothing about this viewer's own vote, so when the requesters
/// differ the displayed `user_vote` survives and `vote_requester` is
/// re-stamped with `current_user`. Everything else in `incoming` (the
/// score in particular) is left untouched.
pub fn reconcile_vote(
    existing: &QuestionStats,
    incoming: &mut QuestionStats,
    current_user: &UserId,
) -> VoteOutcome {
    if incoming.vote_requester == existing.vote_requester {
        return VoteOutcome::Continued;
    }

    incoming.user_vote = existing.user_vote;
    incoming.vote_requester = Some(current_user.clone());
    VoteOutcome::Preserved
}
