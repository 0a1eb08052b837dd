//! Per-side clocks derived from stored remaining time and the last move stamp
//!
//! Only the side to move of an active session has a running clock. Every
//! other clock reads its stored value unchanged.

use chrono::Utc;

use crate::model::{Epoch, Session, SessionState, Side};

/// Current wall-clock time as an [`Epoch`]
pub fn now() -> Epoch {
    Utc::now().timestamp()
}

/// Seconds since the last move (or session start), never negative
pub fn elapsed(session: &Session, now: Epoch) -> u64 {
    match session.last_move_at {
        Some(last) => u64::try_from(now.saturating_sub(last)).unwrap_or(0),
        None => 0,
    }
}

/// Whether `side`'s clock is currently running
pub fn is_running(session: &Session, side: Side) -> bool {
    session.state() == SessionState::Active && session.turn == side
}

/// Remaining time of `side` at `now`
pub fn remaining(session: &Session, side: Side, now: Epoch) -> u64 {
    let stored = session.clocks.get(side);
    if is_running(session, side) {
        stored.saturating_sub(elapsed(session, now))
    } else {
        stored
    }
}

/// The side to move, if it has run out of time at `now`
pub fn flagged(session: &Session, now: Epoch) -> Option<Side> {
    let side = session.turn;
    (is_running(session, side) && remaining(session, side, now) == 0).then_some(side)
}

/// Result of charging a completed move to the mover's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// New stored time, increment included
    Credited(u64),
    /// Time hit zero before the move completed; no increment is credited
    Flagged,
}

/// Charges `elapsed` against `stored` and credits `increment`
pub fn settle(stored: u64, elapsed: u64, increment: u64) -> Settlement {
    if elapsed >= stored {
        Settlement::Flagged
    } else {
        Settlement::Credited((stored - elapsed).saturating_add(increment))
    }
}

/// Stops the running clock at `now` without crediting an increment.
///
/// Used whenever the turn ends without a move: resignation, agreement,
/// takeback, forfeiture.
pub(crate) fn stop(session: &mut Session, now: Epoch) {
    let side = session.turn;
    if is_running(session, side) {
        let left = remaining(session, side, now);
        session.clocks.set(side, left);
        session.last_move_at = Some(now);
    }
}
