use crate::models::{ApprovalStatus, Participant};

/// The room roster, keyed by identity.
///
/// Updated by the controller event loop. Read by presentation layers.
/// Never holds two entries for the same identity.
#[derive(Debug, Clone, Default)]
pub struct ParticipantManager {
    participants: Vec<Participant>,
}

impl ParticipantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster with an authoritative snapshot.
    ///
    /// Later entries win if the snapshot itself repeats an identity.
    pub fn replace_all(&mut self, snapshot: Vec<Participant>) {
        self.participants.clear();
        for p in snapshot {
            self.upsert(p);
        }
    }

    /// Insert a participant or merge into the existing entry in place.
    ///
    /// Returns `true` when the identity was not present before.
    pub fn upsert(&mut self, info: Participant) -> bool {
        match self.participant_mut(&info.identity) {
            Some(existing) => {
                // A join notification carries no hand state; keep ours.
                let hand = (existing.is_hand_raised, existing.hand_raised_at);
                *existing = info;
                if !existing.is_hand_raised && hand.0 {
                    existing.is_hand_raised = hand.0;
                    existing.hand_raised_at = hand.1;
                }
                false
            }
            None => {
                self.participants.push(info);
                true
            }
        }
    }

    pub fn remove_participant(&mut self, identity: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.identity == identity)?;
        Some(self.participants.remove(idx))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, identity: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    pub fn participant_mut(&mut self, identity: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.identity == identity)
    }

    pub fn set_approval(&mut self, identity: &str, approval: ApprovalStatus) -> Option<&Participant> {
        let p = self.participant_mut(identity)?;
        p.approval = approval;
        Some(p)
    }

    pub fn set_muted(&mut self, identity: &str, muted: bool) -> Option<&Participant> {
        let p = self.participant_mut(identity)?;
        p.is_muted = muted;
        Some(p)
    }

    pub fn set_video_off(&mut self, identity: &str, off: bool) -> Option<&Participant> {
        let p = self.participant_mut(identity)?;
        p.is_video_off = off;
        Some(p)
    }

    /// Raise or lower a hand. `at_ms` orders the queue; a repeated raise
    /// keeps the original position.
    pub fn set_hand_raised(&mut self, identity: &str, raised: bool, at_ms: i64) -> Option<&Participant> {
        let p = self.participant_mut(identity)?;
        if raised {
            if !p.is_hand_raised {
                p.hand_raised_at = Some(at_ms);
            }
            p.is_hand_raised = true;
        } else {
            p.is_hand_raised = false;
            p.hand_raised_at = None;
        }
        Some(p)
    }

    /// Identities with a raised hand, earliest first.
    pub fn raised_hands(&self) -> Vec<String> {
        let mut raised: Vec<&Participant> =
            self.participants.iter().filter(|p| p.is_hand_raised).collect();
        raised.sort_by_key(|p| p.hand_raised_at.unwrap_or(i64::MAX));
        raised.into_iter().map(|p| p.identity.clone()).collect()
    }

    /// Participants waiting for a moderator.
    pub fn pending(&self) -> Vec<&Participant> {
        self.participants
            .iter()
            .filter(|p| p.approval == ApprovalStatus::Pending)
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
