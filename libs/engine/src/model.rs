//! Session record and the value types it is built from
//!
//! A [`Session`] is always handled as a full snapshot: every transition
//! produces a complete next record which is then written as a whole.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Seconds since the Unix epoch
pub type Epoch = i64;

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Participant credential, passed explicitly into every operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A move in UCI long algebraic form, e.g. `e2e4` or `e7e8q`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Move(String);

impl Move {
    pub fn new(uci: impl Into<String>) -> Self {
        Self(uci.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Move {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub const fn opposite(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Second => write!(f, "second"),
        }
    }
}

/// Terminal result of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    FirstMoverWins,
    SecondMoverWins,
    Draw,
}

impl Outcome {
    /// Decisive outcome in favour of `side`
    pub const fn win_for(side: Side) -> Self {
        match side {
            Side::First => Self::FirstMoverWins,
            Side::Second => Self::SecondMoverWins,
        }
    }

    pub const fn winner(&self) -> Option<Side> {
        match self {
            Self::FirstMoverWins => Some(Side::First),
            Self::SecondMoverWins => Some(Side::Second),
            Self::Draw => None,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Resignation,
    TimeForfeit,
    Agreement,
    Stalemate,
    DrawByRule,
}

/// Error returned when a time control string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeControlParseError {
    #[error("invalid time control {0:?}, expected MINUTES+INCREMENT")]
    Format(String),

    #[error(
        "time control {0:?} out of range, expected 1 to {max_minutes} minutes and at most {max_increment} seconds increment",
        max_minutes = TimeControl::MAX_MINUTES,
        max_increment = TimeControl::MAX_INCREMENT_SECONDS
    )]
    OutOfRange(String),
}

/// Initial time per side and increment credited per completed move, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial_seconds: u64,
    pub increment_seconds: u64,
}

impl TimeControl {
    /// 1 minute, no increment
    pub const BULLET: Self = Self::new(60, 0);

    /// 5 minutes + 3 seconds
    pub const BLITZ: Self = Self::new(300, 3);

    /// 10 minutes + 5 seconds
    pub const RAPID: Self = Self::new(600, 5);

    /// Longest initial time accepted from a `"M+S"` string
    pub const MAX_MINUTES: u64 = 180;

    /// Largest increment accepted from a `"M+S"` string
    pub const MAX_INCREMENT_SECONDS: u64 = 180;

    pub const fn new(initial_seconds: u64, increment_seconds: u64) -> Self {
        Self {
            initial_seconds,
            increment_seconds,
        }
    }

    pub const fn from_minutes(minutes: u64, increment_seconds: u64) -> Self {
        Self::new(minutes.saturating_mul(60), increment_seconds)
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        Self::RAPID
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.initial_seconds % 60 == 0 {
            write!(f, "{}+{}", self.initial_seconds / 60, self.increment_seconds)
        } else {
            write!(f, "{}s+{}", self.initial_seconds, self.increment_seconds)
        }
    }
}

impl FromStr for TimeControl {
    type Err = TimeControlParseError;

    /// Parses `"10+5"` as ten minutes with a five second increment
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeControlParseError::Format(s.to_string());
        let (minutes, increment) = s.trim().split_once('+').ok_or_else(err)?;
        let minutes: u64 = minutes.trim().parse().map_err(|_| err())?;
        let increment: u64 = increment.trim().parse().map_err(|_| err())?;

        if !(1..=Self::MAX_MINUTES).contains(&minutes) || increment > Self::MAX_INCREMENT_SECONDS {
            return Err(TimeControlParseError::OutOfRange(s.to_string()));
        }
        let initial = minutes
            .checked_mul(60)
            .ok_or_else(|| TimeControlParseError::OutOfRange(s.to_string()))?;
        Ok(Self::new(initial, increment))
    }
}

/// Stored remaining time per side, whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clocks {
    pub first: u64,
    pub second: u64,
}

impl Clocks {
    pub const fn uniform(seconds: u64) -> Self {
        Self {
            first: seconds,
            second: seconds,
        }
    }

    pub const fn get(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first,
            Side::Second => self.second,
        }
    }

    pub fn set(&mut self, side: Side, seconds: u64) {
        match side {
            Side::First => self.first = seconds,
            Side::Second => self.second = seconds,
        }
    }
}

/// Kind of a two-phase negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationKind {
    Draw,
    Takeback,
    Rematch,
}

impl fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draw => write!(f, "draw offer"),
            Self::Takeback => write!(f, "takeback request"),
            Self::Rematch => write!(f, "rematch offer"),
        }
    }
}

/// The single outstanding offer of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNegotiation {
    pub kind: NegotiationKind,
    pub by: ParticipantId,
}

/// Lifecycle state, derived from the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// One participant, waiting for the second
    Created,
    /// Two participants, outcome unset
    Active,
    /// Outcome set
    Ended,
}

/// The authoritative session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Write version; bumped by the store on every accepted write
    pub version: u64,
    /// Join order, at most two entries
    pub participants: Vec<ParticipantId>,
    pub first_mover: Option<ParticipantId>,
    pub second_mover: Option<ParticipantId>,
    pub turn: Side,
    /// Append/truncate-only move log
    pub moves: Vec<Move>,
    /// Space separated SAN of the whole game, the authoritative replay source
    pub notation: String,
    pub clocks: Clocks,
    pub time_control: TimeControl,
    /// Last move or session start; unset until the session is active
    pub last_move_at: Option<Epoch>,
    pub outcome: Option<Outcome>,
    pub end_reason: Option<EndReason>,
    pub pending: Option<PendingNegotiation>,
    /// Session this one is a rematch of
    pub rematch_of: Option<SessionId>,
    /// Session created by an accepted rematch offer
    pub rematch: Option<SessionId>,
    pub created_at: Epoch,
    pub updated_at: Epoch,
}

impl Session {
    /// Fresh `Created` session holding only its creator.
    ///
    /// When `side` is given the creator is pinned to it and the joiner gets
    /// the other one; otherwise sides follow join order.
    pub fn new(
        id: SessionId,
        creator: ParticipantId,
        time_control: TimeControl,
        side: Option<Side>,
        now: Epoch,
    ) -> Self {
        let (first_mover, second_mover) = match side {
            Some(Side::First) => (Some(creator.clone()), None),
            Some(Side::Second) => (None, Some(creator.clone())),
            None => (None, None),
        };

        Self {
            id,
            version: 0,
            participants: vec![creator],
            first_mover,
            second_mover,
            turn: Side::First,
            moves: Vec::new(),
            notation: String::new(),
            clocks: Clocks::uniform(time_control.initial_seconds),
            time_control,
            last_move_at: None,
            outcome: None,
            end_reason: None,
            pending: None,
            rematch_of: None,
            rematch: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active successor of a finished session with the sides swapped
    pub fn rematch_from(previous: &Session, id: SessionId, now: Epoch) -> Self {
        Self {
            id,
            version: 0,
            participants: previous.participants.clone(),
            first_mover: previous.second_mover.clone(),
            second_mover: previous.first_mover.clone(),
            turn: Side::First,
            moves: Vec::new(),
            notation: String::new(),
            clocks: Clocks::uniform(previous.time_control.initial_seconds),
            time_control: previous.time_control,
            last_move_at: Some(now),
            outcome: None,
            end_reason: None,
            pending: None,
            rematch_of: Some(previous.id),
            rematch: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.outcome.is_some() {
            SessionState::Ended
        } else if self.participants.len() == 2 && self.last_move_at.is_some() {
            SessionState::Active
        } else {
            SessionState::Created
        }
    }

    pub fn participant_at(&self, side: Side) -> Option<&ParticipantId> {
        match side {
            Side::First => self.first_mover.as_ref(),
            Side::Second => self.second_mover.as_ref(),
        }
    }

    pub fn side_of(&self, participant: &ParticipantId) -> Option<Side> {
        if self.first_mover.as_ref() == Some(participant) {
            Some(Side::First)
        } else if self.second_mover.as_ref() == Some(participant) {
            Some(Side::Second)
        } else {
            None
        }
    }

    pub fn is_participant(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    /// Records the end of the session and drops any outstanding offer
    pub(crate) fn finish(&mut self, outcome: Outcome, reason: EndReason) {
        self.outcome = Some(outcome);
        self.end_reason = Some(reason);
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_control_parse() {
        let tc: TimeControl = "10+5".parse().unwrap();
        assert_eq!(tc, TimeControl::new(600, 5));
        assert_eq!(tc.to_string(), "10+5");

        assert!("10".parse::<TimeControl>().is_err());
        assert!("ten+5".parse::<TimeControl>().is_err());
    }

    #[test]
    fn test_time_control_bounds() {
        assert_eq!("180+180".parse::<TimeControl>(), Ok(TimeControl::new(10_800, 180)));
        for input in ["0+5", "181+0", "10+181", "307445734561825861+0", "10+18446744073709551615"] {
            assert_eq!(
                input.parse::<TimeControl>(),
                Err(TimeControlParseError::OutOfRange(input.to_string()))
            );
        }
        // does not fit in u64 at all
        assert!(matches!(
            "10+18446744073709551616".parse::<TimeControl>(),
            Err(TimeControlParseError::Format(_))
        ));
        assert_eq!(TimeControl::from_minutes(u64::MAX, 0).initial_seconds, u64::MAX);
    }

    #[test]
    fn test_new_session_sides() {
        let creator = ParticipantId::from("alice");
        let free = Session::new(SessionId::new(), creator.clone(), TimeControl::BLITZ, None, 0);
        assert_eq!(free.state(), SessionState::Created);
        assert!(free.first_mover.is_none());

        let pinned = Session::new(
            SessionId::new(),
            creator.clone(),
            TimeControl::BLITZ,
            Some(Side::Second),
            0,
        );
        assert_eq!(pinned.side_of(&creator), Some(Side::Second));
        assert_eq!(pinned.clocks, Clocks::uniform(300));
    }

    #[test]
    fn test_rematch_swaps_sides() {
        let mut previous = Session::new(
            SessionId::new(),
            "alice".into(),
            TimeControl::RAPID,
            None,
            0,
        );
        previous.participants.push("bob".into());
        previous.first_mover = Some("alice".into());
        previous.second_mover = Some("bob".into());
        previous.finish(Outcome::Draw, EndReason::Agreement);

        let next = Session::rematch_from(&previous, SessionId::new(), 100);
        assert_eq!(next.first_mover, Some("bob".into()));
        assert_eq!(next.second_mover, Some("alice".into()));
        assert_eq!(next.state(), SessionState::Active);
        assert_eq!(next.rematch_of, Some(previous.id));
        assert_eq!(next.last_move_at, Some(100));
        assert!(next.moves.is_empty());
    }

    #[test]
    fn test_session_serializes_snake_case() {
        let session = Session::new(SessionId::new(), "alice".into(), TimeControl::BULLET, None, 7);
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["turn"], "first");
        assert_eq!(value["participants"][0], "alice");
        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }
}
