//! Error taxonomy of the session engine
//!
//! Every error is local to the operation that produced it: an operation
//! computes its full next snapshot before a single conditional write, so a
//! failure never leaves a partially mutated record behind.

use thiserror::Error;

use crate::model::{NegotiationKind, SessionId};

/// Failures of `propose_move`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// Outcome is already set
    #[error("session has already ended")]
    GameOver,

    /// Session is still waiting for its second participant
    #[error("session has not started")]
    NotStarted,

    /// Acting participant does not own the side to move
    #[error("it is not your turn")]
    NotYourTurn,

    /// Rejected by the move-legality oracle
    #[error("illegal move: {0}")]
    Illegal(String),

    /// The write lost a race; the local view has been reconciled
    #[error("session changed since it was last observed")]
    Stale,
}

/// Failures of the offer/response sub-protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("a {0} is already pending")]
    AlreadyPending(NegotiationKind),

    #[error("cannot respond to your own offer")]
    SelfResponse,

    #[error("no pending negotiation")]
    NonePending,

    /// The pending offer is not the one being answered
    #[error("cannot answer a {requested}: the pending offer is a {pending}")]
    KindMismatch {
        requested: NegotiationKind,
        pending: NegotiationKind,
    },

    #[error("only the offering participant can withdraw")]
    NotOfferer,

    #[error("{0} is not allowed in the current session state")]
    NotAllowed(NegotiationKind),

    #[error("there is no move to take back")]
    NothingToTakeBack,
}

/// Failures concerning membership and lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Both seats are taken; the requester may only spectate
    #[error("session is full")]
    Full,

    #[error("not a participant of this session")]
    NotParticipant,

    #[error("session is not active")]
    NotActive,

    #[error("session has ended")]
    Ended,

    /// Only sessions that never became active may be abandoned
    #[error("session has already started")]
    AlreadyStarted,
}

/// Failures of the store or the broadcast channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport or backing store failure; safe to retry the read
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded
    #[error("corrupt session record: {0}")]
    Corrupt(String),

    /// A conditional write kept losing races
    #[error("write conflict")]
    Conflict,
}

/// Any error produced by an engine operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Move(#[from] MoveError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

pub type StoreResult<T> = Result<T, StoreError>;
