//! Move application
//!
//! Checks turn ownership, asks the oracle for legality and derives every
//! canonical field a move touches: notation, move log, turn, clocks and,
//! when the move ends the game, the outcome.

use tracing::{debug, info};

use crate::clock::{self, Settlement};
use crate::error::MoveError;
use crate::model::{EndReason, Epoch, Move, Outcome, ParticipantId, Session, SessionState};
use crate::oracle::{MoveOracle, TerminalStatus};

/// Applies `mv` by `actor` at `now`, returning the next snapshot.
///
/// Preconditions are checked in order and the first failure wins: the
/// session must not have ended, `actor` must own the side to move, and the
/// oracle must accept the move.
pub fn apply<O: MoveOracle + ?Sized>(
    oracle: &O,
    session: &Session,
    mv: &Move,
    actor: &ParticipantId,
    now: Epoch,
) -> Result<Session, MoveError> {
    match session.state() {
        SessionState::Ended => return Err(MoveError::GameOver),
        SessionState::Created => return Err(MoveError::NotStarted),
        SessionState::Active => {}
    }

    let mover = session.turn;
    if session.participant_at(mover) != Some(actor) {
        return Err(MoveError::NotYourTurn);
    }

    let applied = oracle
        .apply_move(&session.notation, mv)
        .map_err(|e| MoveError::Illegal(e.to_string()))?;

    let elapsed = clock::elapsed(session, now);
    let mut next = session.clone();
    next.moves.push(mv.clone());
    next.notation = applied.notation;
    next.turn = mover.opposite();
    next.last_move_at = Some(now);
    next.pending = None;
    next.updated_at = now;

    match clock::settle(
        session.clocks.get(mover),
        elapsed,
        session.time_control.increment_seconds,
    ) {
        Settlement::Credited(left) => next.clocks.set(mover, left),
        Settlement::Flagged => next.clocks.set(mover, 0),
    }

    // A flag overrides whatever the oracle says about the same ply.
    if let Some(side) = [mover, mover.opposite()]
        .into_iter()
        .find(|side| next.clocks.get(*side) == 0)
    {
        info!(session = %session.id, %side, "time forfeited on move");
        next.finish(Outcome::win_for(side.opposite()), EndReason::TimeForfeit);
        return Ok(next);
    }

    match applied.terminal {
        TerminalStatus::None => {}
        TerminalStatus::Checkmate(winner) => {
            next.finish(Outcome::win_for(winner), EndReason::Checkmate)
        }
        TerminalStatus::Stalemate => next.finish(Outcome::Draw, EndReason::Stalemate),
        TerminalStatus::DrawByRule => next.finish(Outcome::Draw, EndReason::DrawByRule),
    }

    debug!(
        session = %session.id,
        %mv,
        capture = applied.is_capture,
        ply = next.moves.len(),
        "move applied"
    );
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Clocks, NegotiationKind, PendingNegotiation, SessionId, Side, TimeControl};
    use crate::oracle::{replay, ChessOracle};

    fn active(now: Epoch) -> Session {
        let mut session = Session::new(
            SessionId::new(),
            "alice".into(),
            TimeControl::from_minutes(10, 5),
            None,
            now,
        );
        session.participants.push("bob".into());
        session.first_mover = Some("alice".into());
        session.second_mover = Some("bob".into());
        session.last_move_at = Some(now);
        session
    }

    fn play(session: &Session, uci: &str, who: &str, now: Epoch) -> Result<Session, MoveError> {
        apply(&ChessOracle, session, &Move::from(uci), &who.into(), now)
    }

    #[test]
    fn test_increment_credited_to_mover_only() {
        let session = active(1_000);
        let next = play(&session, "e2e4", "alice", 1_003).unwrap();

        assert_eq!(next.clocks, Clocks { first: 602, second: 600 });
        assert_eq!(next.turn, Side::Second);
        assert_eq!(next.last_move_at, Some(1_003));
        assert_eq!(next.notation, "e4");
        assert_eq!(next.moves, vec![Move::from("e2e4")]);
    }

    #[test]
    fn test_oversized_increment_saturates() {
        // records written before time controls were bounded
        let mut session = active(0);
        session.time_control = TimeControl::new(600, u64::MAX);
        let next = play(&session, "e2e4", "alice", 3).unwrap();
        assert_eq!(next.clocks, Clocks { first: u64::MAX, second: 600 });
        assert!(next.outcome.is_none());
    }

    #[test]
    fn test_preconditions_in_order() {
        let mut ended = active(0);
        ended.outcome = Some(Outcome::Draw);
        // ended wins over wrong turn and illegality
        assert_eq!(play(&ended, "e2e5", "bob", 1), Err(MoveError::GameOver));

        let session = active(0);
        // wrong turn wins over illegality
        assert_eq!(play(&session, "e2e5", "bob", 1), Err(MoveError::NotYourTurn));
        assert_eq!(play(&session, "e2e4", "carol", 1), Err(MoveError::NotYourTurn));
        assert!(matches!(
            play(&session, "e2e5", "alice", 1),
            Err(MoveError::Illegal(_))
        ));
    }

    #[test]
    fn test_cannot_move_before_start() {
        let session = Session::new(
            SessionId::new(),
            "alice".into(),
            TimeControl::RAPID,
            Some(Side::First),
            0,
        );
        assert_eq!(play(&session, "e2e4", "alice", 1), Err(MoveError::NotStarted));
    }

    #[test]
    fn test_move_clears_pending_offer() {
        let mut session = active(0);
        session.pending = Some(PendingNegotiation {
            kind: NegotiationKind::Draw,
            by: "bob".into(),
        });
        let next = play(&session, "d2d4", "alice", 2).unwrap();
        assert!(next.pending.is_none());
    }

    #[test]
    fn test_late_move_forfeits_and_overrides_checkmate() {
        let oracle = ChessOracle;
        let mut session = active(0);
        let opening = ["f2f3", "e7e5", "g2g4"].map(Move::from);
        session.notation = replay(&oracle, &opening).unwrap();
        session.moves = opening.to_vec();
        session.turn = Side::Second;
        session.clocks = Clocks { first: 590, second: 30 };
        session.last_move_at = Some(100);

        // Qh4 would mate, but black's flag fell at t=130
        let next = play(&session, "d8h4", "bob", 130).unwrap();
        assert_eq!(next.outcome, Some(Outcome::FirstMoverWins));
        assert_eq!(next.end_reason, Some(EndReason::TimeForfeit));
        assert_eq!(next.clocks.second, 0);

        let in_time = play(&session, "d8h4", "bob", 129).unwrap();
        assert_eq!(in_time.outcome, Some(Outcome::SecondMoverWins));
        assert_eq!(in_time.end_reason, Some(EndReason::Checkmate));
    }

    #[test]
    fn test_move_after_end_fails_for_both_sides() {
        let oracle = ChessOracle;
        let mut session = active(0);
        let opening = ["f2f3", "e7e5", "g2g4"].map(Move::from);
        session.notation = replay(&oracle, &opening).unwrap();
        session.moves = opening.to_vec();
        session.turn = Side::Second;

        let mated = play(&session, "d8h4", "bob", 5).unwrap();
        assert_eq!(play(&mated, "e1e2", "alice", 6), Err(MoveError::GameOver));
        assert_eq!(play(&mated, "h4e1", "bob", 6), Err(MoveError::GameOver));
    }

    #[test]
    fn test_move_log_replays_to_notation() {
        let oracle = ChessOracle;
        let script = [
            ("e2e4", "alice"),
            ("e7e5", "bob"),
            ("g1f3", "alice"),
            ("b8c6", "bob"),
            ("f1b5", "alice"),
            ("a7a6", "bob"),
            ("b5c6", "alice"),
            ("d7c6", "bob"),
        ];
        let mut session = active(0);
        for (ply, (uci, who)) in script.iter().enumerate() {
            session = play(&session, uci, who, ply as Epoch + 1).unwrap();
            assert_eq!(replay(&oracle, &session.moves).unwrap(), session.notation);
        }
        assert_eq!(session.notation, "e4 e5 Nf3 Nc6 Bb5 a6 Bxc6 dxc6");
    }
}
