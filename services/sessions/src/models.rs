//! Request and response bodies

use serde::{Deserialize, Serialize};

use engine::{
    Clocks, Epoch, LocalView, Move, NegotiationKind, ParticipantId, Presentation, Session,
    SessionState, Side, clock,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub participant: ParticipantId,
    /// `"M+S"`, e.g. `"10+5"`; the service default when absent
    #[serde(default)]
    pub time_control: Option<String>,
    /// Pins the creator to a side; join order decides otherwise
    #[serde(default)]
    pub side: Option<Side>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRequest {
    pub participant: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub participant: ParticipantId,
    /// UCI, e.g. `e2e4`
    pub mv: Move,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub participant: ParticipantId,
    pub kind: NegotiationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondRequest {
    pub participant: ParticipantId,
    /// The offer being answered, as the responder last saw it
    pub kind: NegotiationKind,
    pub accept: bool,
}

/// Canonical snapshot plus everything derived from it at response time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
    pub state: SessionState,
    /// Remaining time per side at `as_of`
    pub remaining: Clocks,
    pub as_of: Epoch,
    pub presentation: Presentation,
}

impl SessionResponse {
    pub fn from_view(view: &LocalView, now: Epoch) -> Self {
        let session = &view.session;
        Self {
            state: session.state(),
            remaining: Clocks {
                first: clock::remaining(session, Side::First, now),
                second: clock::remaining(session, Side::Second, now),
            },
            as_of: now,
            presentation: view.presentation.clone(),
            session: session.clone(),
        }
    }
}
