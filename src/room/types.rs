//! Room state: phases, participants, backlog, and cast votes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RoomError, RoomResult};

/// Unique identifier for an estimation room.
pub type RoomId = String;

/// Unique identifier for a connected client.
pub type ClientId = String;

/// Phase of an estimation room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// Room created, below capacity.
    Waiting,
    /// A voting round is in progress on the current feature.
    Voting,
    /// Conflicting votes under debate between the two extremes.
    Discussion,
    /// All backlog items estimated.
    Finished,
}

impl RoomPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [RoomPhase] {
        match self {
            Self::Waiting => &[Self::Voting],
            Self::Voting => &[Self::Voting, Self::Discussion, Self::Finished],
            Self::Discussion => &[Self::Voting],
            Self::Finished => &[],
        }
    }
}

impl std::fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Voting => write!(f, "voting"),
            Self::Discussion => write!(f, "discussion"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Policy used to turn a round of votes into a single estimate.
///
/// Unanimity always short-circuits regardless of policy; the policy
/// only decides what happens when votes disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    /// No aggregation rule: anything short of unanimity goes to
    /// discussion (or revote).
    #[default]
    UnanimityOnly,
    /// Arithmetic mean snapped to the estimation scale.
    Mean,
    /// Numeric median (midpoint average for even counts).
    Median,
    /// Most frequent value wins.
    Plurality,
    /// A value with strictly more than half the votes wins.
    AbsoluteMajority,
}

impl std::fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnanimityOnly => write!(f, "unanimity-only"),
            Self::Mean => write!(f, "mean"),
            Self::Median => write!(f, "median"),
            Self::Plurality => write!(f, "plurality"),
            Self::AbsoluteMajority => write!(f, "absolute-majority"),
        }
    }
}

impl std::str::FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unanimity-only" | "unanimity" => Ok(Self::UnanimityOnly),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "plurality" => Ok(Self::Plurality),
            "absolute-majority" | "absmajority" => Ok(Self::AbsoluteMajority),
            _ => Err(format!(
                "unknown resolution policy: {} (valid: unanimity-only, mean, median, plurality, absolute-majority)",
                s
            )),
        }
    }
}

/// One backlog item awaiting an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// What is being estimated.
    pub description: String,
    /// Resolved estimate, unset until the round for this item closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<String>,
}

impl Feature {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            estimate: None,
        }
    }
}

/// A participant registered in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub display_name: String,
    pub has_voted: bool,
}

/// One cast vote. Votes keep cast order so tie-breaks are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastVote {
    pub participant: ClientId,
    pub value: String,
}

/// Creation-time room settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub room_id: RoomId,
    pub capacity: usize,
    #[serde(default)]
    pub policy: ResolutionPolicy,
    pub backlog: Vec<String>,
}

/// An estimation room. Mutated only by the session engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    /// Creator holds force-end-discussion privileges.
    pub creator_id: ClientId,
    pub participants: HashMap<ClientId, Participant>,
    pub capacity: usize,
    pub policy: ResolutionPolicy,
    pub backlog: Vec<Feature>,
    /// Cursor into the backlog; monotonically increasing. Equal to
    /// the backlog length exactly when the room is finished.
    pub current_feature_index: usize,
    /// Votes for the round in progress, in cast order.
    pub votes: Vec<CastVote>,
    pub phase: RoomPhase,
    /// Exactly 0 or 2 members, both registered participants.
    pub discussion_extremes: Vec<ClientId>,
    pub discussion_deadline: Option<DateTime<Utc>>,
    /// Set after a unanimous pause; the room accepts no votes until
    /// it is reloaded from its snapshot.
    #[serde(default)]
    pub paused: bool,
    /// Bumped on every phase change or vote reset so scheduled timer
    /// callbacks can detect they are stale.
    #[serde(default)]
    pub round_epoch: u64,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Create a room with the creator as its first participant.
    pub fn new(config: RoomConfig, creator_id: ClientId, creator_name: String) -> Self {
        let mut participants = HashMap::new();
        participants.insert(
            creator_id.clone(),
            Participant {
                display_name: creator_name,
                has_voted: false,
            },
        );
        Self {
            room_id: config.room_id,
            creator_id,
            participants,
            capacity: config.capacity.max(1),
            policy: config.policy,
            backlog: config.backlog.into_iter().map(Feature::new).collect(),
            current_feature_index: 0,
            votes: Vec::new(),
            phase: RoomPhase::Waiting,
            discussion_extremes: Vec::new(),
            discussion_deadline: None,
            paused: false,
            round_epoch: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// The feature currently being estimated, if any remain.
    pub fn current_feature(&self) -> Option<&Feature> {
        self.backlog.get(self.current_feature_index)
    }

    /// Add a participant, rejecting joins past capacity. The room is
    /// left untouched on rejection.
    pub fn add_participant(&mut self, id: ClientId, display_name: String) -> RoomResult<()> {
        if self.is_full() {
            return Err(RoomError::CapacityExceeded(self.room_id.clone()));
        }
        self.participants.insert(
            id,
            Participant {
                display_name,
                has_voted: false,
            },
        );
        Ok(())
    }

    /// Remove a participant along with any vote they cast this round.
    /// Returns true if they were registered.
    pub fn remove_participant(&mut self, id: &str) -> bool {
        if self.participants.remove(id).is_none() {
            return false;
        }
        self.votes.retain(|v| v.participant != id);
        true
    }

    /// Display names in a stable order for `update_players` payloads.
    pub fn player_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .participants
            .values()
            .map(|p| p.display_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Record a vote for the round in progress. A re-cast before
    /// resolution overwrites the prior value in place.
    pub fn cast_vote(&mut self, participant: &str, value: String) -> RoomResult<()> {
        if self.phase != RoomPhase::Voting {
            return Err(RoomError::Precondition(format!(
                "votes are only accepted while voting (room is {})",
                self.phase
            )));
        }
        if self.paused {
            return Err(RoomError::Precondition(
                "room is paused; reload it to continue".to_string(),
            ));
        }
        let entry = self
            .participants
            .get_mut(participant)
            .ok_or_else(|| RoomError::ParticipantNotFound(participant.to_string()))?;
        entry.has_voted = true;

        match self.votes.iter_mut().find(|v| v.participant == participant) {
            Some(existing) => existing.value = value,
            None => self.votes.push(CastVote {
                participant: participant.to_string(),
                value,
            }),
        }
        Ok(())
    }

    /// Whether every registered participant has voted this round.
    pub fn all_voted(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.has_voted)
    }

    /// Reset votes and flags for a fresh round on the same feature.
    pub fn clear_votes(&mut self) {
        self.votes.clear();
        for p in self.participants.values_mut() {
            p.has_voted = false;
        }
        self.round_epoch += 1;
    }

    /// Transition to a new phase, validating against the phase graph.
    pub fn transition(&mut self, to: RoomPhase) -> RoomResult<()> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(RoomError::Precondition(format!(
                "invalid transition {} -> {}",
                self.phase, to
            )));
        }
        self.phase = to;
        self.round_epoch += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(capacity: usize) -> Room {
        Room::new(
            RoomConfig {
                room_id: "sprint-12".to_string(),
                capacity,
                policy: ResolutionPolicy::Mean,
                backlog: vec!["login page".to_string(), "search".to_string()],
            },
            "c1".to_string(),
            "alice".to_string(),
        )
    }

    #[test]
    fn test_new_room_defaults() {
        let r = room(3);
        assert_eq!(r.phase, RoomPhase::Waiting);
        assert_eq!(r.participants.len(), 1);
        assert_eq!(r.current_feature_index, 0);
        assert_eq!(r.current_feature().unwrap().description, "login page");
        assert!(r.discussion_extremes.is_empty());
        assert!(!r.paused);
    }

    #[test]
    fn test_capacity_rejection_leaves_room_untouched() {
        let mut r = room(2);
        r.add_participant("c2".to_string(), "bob".to_string()).unwrap();
        let before = r.participants.len();
        let err = r
            .add_participant("c3".to_string(), "carol".to_string())
            .unwrap_err();
        assert!(matches!(err, RoomError::CapacityExceeded(_)));
        assert_eq!(r.participants.len(), before);
    }

    #[test]
    fn test_vote_overwrite_is_idempotent() {
        let mut r = room(2);
        r.add_participant("c2".to_string(), "bob".to_string()).unwrap();
        r.transition(RoomPhase::Voting).unwrap();

        r.cast_vote("c1", "5".to_string()).unwrap();
        r.cast_vote("c1", "8".to_string()).unwrap();
        assert_eq!(r.votes.len(), 1);
        assert_eq!(r.votes[0].value, "8");
        assert!(!r.all_voted());

        r.cast_vote("c2", "3".to_string()).unwrap();
        assert!(r.all_voted());
        // Cast order preserved: first caster stays first.
        assert_eq!(r.votes[0].participant, "c1");
    }

    #[test]
    fn test_vote_rejected_outside_voting() {
        let mut r = room(2);
        let err = r.cast_vote("c1", "5".to_string()).unwrap_err();
        assert!(matches!(err, RoomError::Precondition(_)));
    }

    #[test]
    fn test_vote_from_unknown_participant_rejected() {
        let mut r = room(1);
        r.transition(RoomPhase::Voting).unwrap();
        let err = r.cast_vote("ghost", "5".to_string()).unwrap_err();
        assert!(matches!(err, RoomError::ParticipantNotFound(_)));
        assert!(r.votes.is_empty());
    }

    #[test]
    fn test_remove_participant_drops_vote() {
        let mut r = room(2);
        r.add_participant("c2".to_string(), "bob".to_string()).unwrap();
        r.transition(RoomPhase::Voting).unwrap();
        r.cast_vote("c2", "13".to_string()).unwrap();

        assert!(r.remove_participant("c2"));
        assert!(r.votes.is_empty());
        assert!(!r.remove_participant("c2"));
    }

    #[test]
    fn test_clear_votes_bumps_epoch() {
        let mut r = room(1);
        r.transition(RoomPhase::Voting).unwrap();
        let epoch = r.round_epoch;
        r.cast_vote("c1", "5".to_string()).unwrap();
        r.clear_votes();
        assert!(r.votes.is_empty());
        assert!(!r.participants["c1"].has_voted);
        assert!(r.round_epoch > epoch);
    }

    #[test]
    fn test_phase_graph() {
        assert!(RoomPhase::Waiting
            .valid_transitions()
            .contains(&RoomPhase::Voting));
        assert!(!RoomPhase::Waiting
            .valid_transitions()
            .contains(&RoomPhase::Discussion));
        assert!(RoomPhase::Finished.valid_transitions().is_empty());
        assert!(RoomPhase::Finished.is_terminal());

        let mut r = room(1);
        let err = r.transition(RoomPhase::Discussion).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!(
            "mean".parse::<ResolutionPolicy>().unwrap(),
            ResolutionPolicy::Mean
        );
        assert_eq!(
            "absolute-majority".parse::<ResolutionPolicy>().unwrap(),
            ResolutionPolicy::AbsoluteMajority
        );
        assert_eq!(
            "unanimity-only".parse::<ResolutionPolicy>().unwrap(),
            ResolutionPolicy::UnanimityOnly
        );
        assert!("borda".parse::<ResolutionPolicy>().is_err());
        assert_eq!(ResolutionPolicy::Median.to_string(), "median");
    }

    #[test]
    fn test_room_snapshot_roundtrip() {
        let mut r = room(2);
        r.add_participant("c2".to_string(), "bob".to_string()).unwrap();
        r.transition(RoomPhase::Voting).unwrap();
        r.cast_vote("c1", "coffee".to_string()).unwrap();
        r.paused = true;

        let json = serde_json::to_string(&r).unwrap();
        let back: Room = serde_json::from_str(&json).unwrap();
        assert_eq!(back.room_id, r.room_id);
        assert_eq!(back.votes, r.votes);
        assert!(back.paused);
        assert_eq!(back.phase, RoomPhase::Voting);
    }
}
