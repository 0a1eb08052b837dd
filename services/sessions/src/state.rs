//! Application state shared across handlers

use std::sync::Arc;

use engine::{
    Broadcast, ChessOracle, EngineResult, ParticipantId, SessionClient, SessionId, SessionStore,
};

use crate::config::ServiceConfig;

pub type Client<S, B> = SessionClient<S, B, ChessOracle>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState<S, B> {
    pub store: S,
    pub broadcast: B,
    pub oracle: ChessOracle,
    pub config: Arc<ServiceConfig>,
}

impl<S, B> AppState<S, B>
where
    S: SessionStore + Clone,
    B: Broadcast + Clone,
{
    pub fn new(store: S, broadcast: B, config: ServiceConfig) -> Self {
        Self {
            store,
            broadcast,
            oracle: ChessOracle,
            config: Arc::new(config),
        }
    }

    /// Opens `id` on behalf of `participant`
    pub async fn open(&self, participant: ParticipantId, id: SessionId) -> EngineResult<Client<S, B>> {
        SessionClient::open(
            self.store.clone(),
            self.broadcast.clone(),
            self.oracle,
            participant,
            id,
        )
        .await
    }
}
