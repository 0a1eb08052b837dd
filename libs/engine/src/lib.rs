//! Engine library
//!
//! Synchronisation core for two-party timed game sessions:
//! - Session records, clocks and negotiations as pure snapshot transitions
//! - Move application against a pluggable legality oracle
//! - Version-conditioned store writes and snapshot broadcast interfaces
//! - A client driver that reconciles every write with the canonical record

pub mod applier;
pub mod broadcast;
pub mod client;
pub mod clock;
pub mod error;
pub mod machine;
pub mod model;
pub mod negotiation;
pub mod oracle;
pub mod reconcile;
pub mod store;

pub use broadcast::{Broadcast, MemoryBroadcast, Subscription};
pub use client::SessionClient;
pub use error::{
    EngineError, EngineResult, MoveError, NegotiationError, SessionError, StoreError, StoreResult,
};
pub use machine::{SessionMachine, Transition};
pub use model::{
    Clocks, EndReason, Epoch, Move, NegotiationKind, Outcome, ParticipantId, PendingNegotiation,
    Session, SessionId, SessionState, Side, TimeControl,
};
pub use oracle::{ChessOracle, MoveOracle, TerminalStatus};
pub use reconcile::{reconcile, LocalView, Presentation};
pub use store::{MemoryStore, SessionStore, WriteOutcome};
