//! Offer/response sub-protocol shared by draw, takeback and rematch
//!
//! `None -> Offered(by) -> {Accepted, Declined} -> None`. At most one offer
//! is outstanding per session, whatever its kind or author.

use tracing::debug;

use crate::clock;
use crate::error::{EngineResult, NegotiationError, SessionError, StoreError};
use crate::model::{
    EndReason, Epoch, NegotiationKind, Outcome, ParticipantId, PendingNegotiation, Session,
    SessionId, SessionState,
};
use crate::oracle::{replay, MoveOracle};

/// Outcome of a response: the next snapshot, plus the fresh session an
/// accepted rematch creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub session: Session,
    pub rematch: Option<Session>,
}

/// Guards shared by draw and takeback: the game must be running
fn ensure_running(session: &Session, now: Epoch) -> EngineResult<()> {
    match session.state() {
        SessionState::Ended => Err(SessionError::Ended.into()),
        SessionState::Created => Err(SessionError::NotActive.into()),
        SessionState::Active if clock::flagged(session, now).is_some() => {
            Err(SessionError::Ended.into())
        }
        SessionState::Active => Ok(()),
    }
}

fn ensure_seated(session: &Session, by: &ParticipantId) -> EngineResult<()> {
    session
        .side_of(by)
        .map(|_| ())
        .ok_or_else(|| SessionError::NotParticipant.into())
}

/// Raises an offer of `kind` on behalf of `by`
pub fn offer(
    session: &Session,
    kind: NegotiationKind,
    by: &ParticipantId,
    now: Epoch,
) -> EngineResult<Session> {
    ensure_seated(session, by)?;

    match kind {
        NegotiationKind::Rematch => {
            if session.outcome.is_none() || session.rematch.is_some() {
                return Err(NegotiationError::NotAllowed(kind).into());
            }
        }
        NegotiationKind::Draw | NegotiationKind::Takeback => ensure_running(session, now)?,
    }

    if let Some(pending) = &session.pending {
        return Err(NegotiationError::AlreadyPending(pending.kind).into());
    }

    if kind == NegotiationKind::Takeback && session.moves.is_empty() {
        return Err(NegotiationError::NothingToTakeBack.into());
    }

    debug!(session = %session.id, %by, %kind, "offer raised");
    let mut next = session.clone();
    next.pending = Some(PendingNegotiation {
        kind,
        by: by.clone(),
    });
    next.updated_at = now;
    Ok(next)
}

/// Accepts or declines the outstanding offer of `kind` on behalf of `by`.
///
/// The answer only binds the offer it names; a different pending kind means
/// the offer was replaced since the responder saw it.
pub fn respond<O: MoveOracle + ?Sized>(
    oracle: &O,
    session: &Session,
    kind: NegotiationKind,
    accept: bool,
    by: &ParticipantId,
    now: Epoch,
) -> EngineResult<Resolution> {
    ensure_seated(session, by)?;

    let pending = session
        .pending
        .as_ref()
        .ok_or(NegotiationError::NonePending)?;
    if pending.kind != kind {
        return Err(NegotiationError::KindMismatch {
            requested: kind,
            pending: pending.kind,
        }
        .into());
    }
    if &pending.by == by {
        return Err(NegotiationError::SelfResponse.into());
    }
    if pending.kind != NegotiationKind::Rematch {
        ensure_running(session, now)?;
    }

    let mut next = session.clone();
    next.pending = None;
    next.updated_at = now;

    if !accept {
        debug!(session = %session.id, %by, kind = %pending.kind, "offer declined");
        return Ok(Resolution {
            session: next,
            rematch: None,
        });
    }

    debug!(session = %session.id, %by, kind = %pending.kind, "offer accepted");
    let rematch = match pending.kind {
        NegotiationKind::Draw => {
            clock::stop(&mut next, now);
            next.finish(Outcome::Draw, EndReason::Agreement);
            None
        }
        NegotiationKind::Takeback => {
            if next.moves.pop().is_none() {
                return Err(NegotiationError::NothingToTakeBack.into());
            }
            // The side to move pays for its thinking time; the taker keeps
            // whatever its undone move cost or earned.
            clock::stop(&mut next, now);
            next.notation = replay(oracle, &next.moves)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            next.turn = next.turn.opposite();
            None
        }
        NegotiationKind::Rematch => {
            let fresh = Session::rematch_from(session, SessionId::new(), now);
            next.rematch = Some(fresh.id);
            Some(fresh)
        }
    };

    Ok(Resolution {
        session: next,
        rematch,
    })
}

/// Cancels `by`'s own outstanding offer
pub fn withdraw(session: &Session, by: &ParticipantId, now: Epoch) -> EngineResult<Session> {
    ensure_seated(session, by)?;

    let pending = session
        .pending
        .as_ref()
        .ok_or(NegotiationError::NonePending)?;
    if &pending.by != by {
        return Err(NegotiationError::NotOfferer.into());
    }

    let mut next = session.clone();
    next.pending = None;
    next.updated_at = now;
    Ok(next)
}
