//! Session state machine
//!
//! `Created -> Active -> Ended`. Every operation is a pure function from the
//! latest canonical snapshot to the next full snapshot; persisting and
//! publishing it is the caller's business.

use tracing::info;

use crate::applier;
use crate::clock;
use crate::error::{EngineResult, MoveError, SessionError};
use crate::model::{
    Clocks, EndReason, Epoch, Move, NegotiationKind, Outcome, ParticipantId, Session, SessionId,
    SessionState, Side, TimeControl,
};
use crate::negotiation::{self, Resolution};
use crate::oracle::MoveOracle;

/// Result of evaluating an operation against a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to write
    Unchanged,
    /// Full next snapshot to write
    Updated(Session),
}

/// Sequences session transitions against a move-legality oracle
#[derive(Debug, Clone, Default)]
pub struct SessionMachine<O> {
    oracle: O,
}

impl<O: MoveOracle> SessionMachine<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// New `Created` session owned by `creator`
    pub fn create(
        &self,
        creator: &ParticipantId,
        time_control: TimeControl,
        side: Option<Side>,
        now: Epoch,
    ) -> Session {
        let session = Session::new(SessionId::new(), creator.clone(), time_control, side, now);
        info!(session = %session.id, %creator, %time_control, "session created");
        session
    }

    /// Seats `participant` as the second player.
    ///
    /// Joining a session one already belongs to is a no-op, which makes
    /// reconnects harmless. A third participant gets [`SessionError::Full`]
    /// and may only spectate.
    pub fn join(
        &self,
        session: &Session,
        participant: &ParticipantId,
        now: Epoch,
    ) -> EngineResult<Transition> {
        if session.is_participant(participant) {
            return Ok(Transition::Unchanged);
        }
        if session.participants.len() >= 2 || session.state() != SessionState::Created {
            return Err(SessionError::Full.into());
        }

        let mut next = session.clone();
        next.participants.push(participant.clone());

        // Pre-assigned sides keep the creator's seat; otherwise join order.
        match (&next.first_mover, &next.second_mover) {
            (Some(_), None) => next.second_mover = Some(participant.clone()),
            (None, Some(_)) => next.first_mover = Some(participant.clone()),
            _ => {
                next.first_mover = next.participants.first().cloned();
                next.second_mover = Some(participant.clone());
            }
        }

        next.turn = Side::First;
        next.clocks = Clocks::uniform(next.time_control.initial_seconds);
        next.last_move_at = Some(now);
        next.updated_at = now;

        info!(session = %session.id, %participant, "session active");
        Ok(Transition::Updated(next))
    }

    /// Applies a move; see [`applier::apply`]
    pub fn propose_move(
        &self,
        session: &Session,
        mv: &Move,
        actor: &ParticipantId,
        now: Epoch,
    ) -> Result<Session, MoveError> {
        applier::apply(&self.oracle, session, mv, actor, now)
    }

    pub fn offer(
        &self,
        session: &Session,
        kind: NegotiationKind,
        by: &ParticipantId,
        now: Epoch,
    ) -> EngineResult<Transition> {
        negotiation::offer(session, kind, by, now).map(Transition::Updated)
    }

    pub fn respond(
        &self,
        session: &Session,
        kind: NegotiationKind,
        accept: bool,
        by: &ParticipantId,
        now: Epoch,
    ) -> EngineResult<Resolution> {
        negotiation::respond(&self.oracle, session, kind, accept, by, now)
    }

    pub fn withdraw(
        &self,
        session: &Session,
        by: &ParticipantId,
        now: Epoch,
    ) -> EngineResult<Transition> {
        negotiation::withdraw(session, by, now).map(Transition::Updated)
    }

    /// Ends the session in favour of the side opposing `by`.
    ///
    /// Unconditional while active: any outstanding offer is dropped.
    pub fn resign(
        &self,
        session: &Session,
        by: &ParticipantId,
        now: Epoch,
    ) -> EngineResult<Transition> {
        let side = session.side_of(by).ok_or(SessionError::NotParticipant)?;
        match session.state() {
            SessionState::Ended => return Err(SessionError::Ended.into()),
            SessionState::Created => return Err(SessionError::NotActive.into()),
            SessionState::Active => {}
        }
        if clock::flagged(session, now).is_some() {
            return Err(SessionError::Ended.into());
        }

        let mut next = session.clone();
        clock::stop(&mut next, now);
        next.finish(Outcome::win_for(side.opposite()), EndReason::Resignation);
        next.updated_at = now;

        info!(session = %session.id, %by, "participant resigned");
        Ok(Transition::Updated(next))
    }

    /// Declares time forfeiture if the side to move has run out at `now`
    pub fn tick(&self, session: &Session, now: Epoch) -> Transition {
        let Some(side) = clock::flagged(session, now) else {
            return Transition::Unchanged;
        };

        let mut next = session.clone();
        clock::stop(&mut next, now);
        next.finish(Outcome::win_for(side.opposite()), EndReason::TimeForfeit);
        next.updated_at = now;

        info!(session = %session.id, %side, "time forfeited");
        Transition::Updated(next)
    }

    /// Checks that `by` may delete the session: only its creator, and only
    /// while it has never become active
    pub fn abandon(&self, session: &Session, by: &ParticipantId) -> EngineResult<()> {
        if session.state() != SessionState::Created {
            return Err(SessionError::AlreadyStarted.into());
        }
        if session.participants.first() != Some(by) {
            return Err(SessionError::NotParticipant.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, NegotiationError};
    use crate::oracle::ChessOracle;

    fn machine() -> SessionMachine<ChessOracle> {
        SessionMachine::new(ChessOracle)
    }

    fn updated(transition: Transition) -> Session {
        match transition {
            Transition::Updated(session) => session,
            Transition::Unchanged => panic!("expected an update"),
        }
    }

    fn started(machine: &SessionMachine<ChessOracle>, now: Epoch) -> Session {
        let created = machine.create(&"alice".into(), TimeControl::from_minutes(10, 5), None, 0);
        updated(machine.join(&created, &"bob".into(), now).unwrap())
    }

    #[test]
    fn test_join_activates_once() {
        let machine = machine();
        let created = machine.create(&"alice".into(), TimeControl::RAPID, None, 0);
        assert_eq!(created.state(), SessionState::Created);

        let active = updated(machine.join(&created, &"bob".into(), 50).unwrap());
        assert_eq!(active.state(), SessionState::Active);
        assert_eq!(active.first_mover, Some("alice".into()));
        assert_eq!(active.second_mover, Some("bob".into()));
        assert_eq!(active.last_move_at, Some(50));

        // reconnecting members change nothing
        assert_eq!(machine.join(&active, &"bob".into(), 60).unwrap(), Transition::Unchanged);
        assert_eq!(machine.join(&active, &"alice".into(), 60).unwrap(), Transition::Unchanged);

        assert_eq!(
            machine.join(&active, &"carol".into(), 60),
            Err(SessionError::Full.into())
        );
    }

    #[test]
    fn test_join_honours_preassigned_side() {
        let machine = machine();
        let created = machine.create(&"alice".into(), TimeControl::RAPID, Some(Side::Second), 0);
        let active = updated(machine.join(&created, &"bob".into(), 1).unwrap());
        assert_eq!(active.first_mover, Some("bob".into()));
        assert_eq!(active.second_mover, Some("alice".into()));
    }

    #[test]
    fn test_resign_ends_for_opponent_and_clears_offer() {
        let machine = machine();
        let active = started(&machine, 0);
        let offered = updated(
            machine
                .offer(&active, NegotiationKind::Draw, &"alice".into(), 1)
                .unwrap(),
        );

        let resigned = updated(machine.resign(&offered, &"alice".into(), 2).unwrap());
        assert_eq!(resigned.outcome, Some(Outcome::SecondMoverWins));
        assert_eq!(resigned.end_reason, Some(EndReason::Resignation));
        assert!(resigned.pending.is_none());

        assert_eq!(
            machine.resign(&resigned, &"bob".into(), 3),
            Err(SessionError::Ended.into())
        );
    }

    #[test]
    fn test_resign_requires_active_session() {
        let machine = machine();
        let created = machine.create(&"alice".into(), TimeControl::RAPID, None, 0);
        assert_eq!(
            machine.resign(&created, &"alice".into(), 1),
            Err(SessionError::NotParticipant.into())
        );

        let pinned = machine.create(&"alice".into(), TimeControl::RAPID, Some(Side::First), 0);
        assert_eq!(
            machine.resign(&pinned, &"alice".into(), 1),
            Err(SessionError::NotActive.into())
        );
    }

    #[test]
    fn test_tick_forfeits_flagged_side() {
        let machine = machine();
        let active = started(&machine, 0);
        assert_eq!(machine.tick(&active, 599), Transition::Unchanged);

        let forfeited = updated(machine.tick(&active, 600));
        assert_eq!(forfeited.outcome, Some(Outcome::SecondMoverWins));
        assert_eq!(forfeited.end_reason, Some(EndReason::TimeForfeit));
        assert_eq!(forfeited.clocks, Clocks { first: 0, second: 600 });

        assert_eq!(machine.tick(&forfeited, 10_000), Transition::Unchanged);
        assert_eq!(
            machine.propose_move(&forfeited, &"e2e4".into(), &"alice".into(), 601),
            Err(MoveError::GameOver)
        );
        assert_eq!(
            machine.propose_move(&forfeited, &"e7e5".into(), &"bob".into(), 601),
            Err(MoveError::GameOver)
        );
    }

    #[test]
    fn test_forfeit_preempts_pending_offer() {
        let machine = machine();
        let active = started(&machine, 0);
        let offered = updated(
            machine
                .offer(&active, NegotiationKind::Draw, &"bob".into(), 1)
                .unwrap(),
        );
        let forfeited = updated(machine.tick(&offered, 700));
        assert!(forfeited.pending.is_none());
        assert_eq!(
            machine.respond(&forfeited, NegotiationKind::Draw, true, &"alice".into(), 701),
            Err(NegotiationError::NonePending.into())
        );
    }

    #[test]
    fn test_move_clears_draw_offer_and_stale_response_fails() {
        let machine = machine();
        let active = started(&machine, 0);
        let offered = updated(
            machine
                .offer(&active, NegotiationKind::Draw, &"alice".into(), 1)
                .unwrap(),
        );
        // bob is not to move; alice moves and thereby drops her own offer
        let moved = machine
            .propose_move(&offered, &"e2e4".into(), &"alice".into(), 2)
            .unwrap();
        assert!(moved.pending.is_none());
        assert!(matches!(
            machine.respond(&moved, NegotiationKind::Draw, true, &"bob".into(), 3),
            Err(EngineError::Negotiation(NegotiationError::NonePending))
        ));
    }

    #[test]
    fn test_abandon_gate() {
        let machine = machine();
        let created = machine.create(&"alice".into(), TimeControl::RAPID, None, 0);
        assert!(machine.abandon(&created, &"alice".into()).is_ok());
        assert_eq!(
            machine.abandon(&created, &"bob".into()),
            Err(SessionError::NotParticipant.into())
        );

        let active = updated(machine.join(&created, &"bob".into(), 1).unwrap());
        assert_eq!(
            machine.abandon(&active, &"alice".into()),
            Err(SessionError::AlreadyStarted.into())
        );
    }
}
