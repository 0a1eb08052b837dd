//! Sessions service routes

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt, stream};
use serde_json::json;
use tracing::{info, warn};

use engine::{
    Broadcast, EngineError, LocalView, SessionClient, SessionError, SessionId, SessionStore,
    TimeControl, clock,
};

use crate::{
    error::ApiError,
    models::{
        CreateSessionRequest, MoveRequest, OfferRequest, ParticipantRequest, RespondRequest,
        SessionResponse,
    },
    state::AppState,
};

/// Create the router for the sessions service
pub fn create_router<S, B>(state: AppState<S, B>) -> Router
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions", post(create_session::<S, B>))
        .route(
            "/sessions/:id",
            get(get_session::<S, B>).delete(abandon_session::<S, B>),
        )
        .route("/sessions/:id/events", get(session_events::<S, B>))
        .route("/sessions/:id/join", post(join_session::<S, B>))
        .route("/sessions/:id/moves", post(propose_move::<S, B>))
        .route("/sessions/:id/offers", post(offer::<S, B>))
        .route("/sessions/:id/responses", post(respond::<S, B>))
        .route("/sessions/:id/withdraw", post(withdraw::<S, B>))
        .route("/sessions/:id/resign", post(resign::<S, B>))
        .route("/sessions/:id/tick", post(tick::<S, B>))
        .with_state(state)
}

fn not_found(id: SessionId) -> ApiError {
    EngineError::from(SessionError::NotFound(id)).into()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sessions-service"
    }))
}

/// Create a new session
pub async fn create_session<S, B>(
    State(state): State<AppState<S, B>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let time_control = match payload.time_control.as_deref() {
        Some(tc) => tc
            .parse::<TimeControl>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => state.config.time_control().unwrap_or_default(),
    };

    let now = clock::now();
    let client = SessionClient::create(
        state.store.clone(),
        state.broadcast.clone(),
        state.oracle,
        payload.participant,
        time_control,
        payload.side,
        now,
    )
    .await?;

    info!(session = %client.session().id, %time_control, "Session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_view(client.view(), now)),
    ))
}

/// Get the canonical snapshot of a session
pub async fn get_session<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let session = state
        .store
        .fetch_session(id)
        .await?
        .ok_or_else(|| not_found(id))?;

    let view = LocalView::from_canonical(&state.oracle, session);
    Ok(Json(SessionResponse::from_view(&view, clock::now())))
}

/// Stream canonical snapshots as server-sent events, starting with the
/// current one
pub async fn session_events<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    // Subscribe before fetching so nothing written in between is missed.
    let subscription = state.broadcast.subscribe(id).await?;
    let current = state
        .store
        .fetch_session(id)
        .await?
        .ok_or_else(|| not_found(id))?;

    let updates = stream::unfold(subscription, |mut subscription| async move {
        let snapshot = subscription.next().await?;
        Some((snapshot, subscription))
    });

    let events = stream::once(async move { current })
        .chain(updates)
        .filter_map(|snapshot| async move {
            match Event::default().event("snapshot").json_data(&snapshot) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!(session = %snapshot.id, "Failed to encode snapshot event: {}", e);
                    None
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Take the second seat of a session
pub async fn join_session<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.join(now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Propose a move
pub async fn propose_move<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.propose_move(&payload.mv, now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Raise a draw, takeback or rematch offer
pub async fn offer<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<OfferRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.offer(payload.kind, now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Accept or decline the outstanding offer of the given kind
pub async fn respond<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<RespondRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.respond(payload.kind, payload.accept, now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Withdraw one's own outstanding offer
pub async fn withdraw<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.withdraw(now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Resign the session
pub async fn resign<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.resign(now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Declare time forfeiture if the side to move has run out
pub async fn tick<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let mut client = state.open(payload.participant, id).await?;
    let now = clock::now();
    client.tick(now).await?;
    Ok(Json(SessionResponse::from_view(client.view(), now)))
}

/// Delete a session that never started
pub async fn abandon_session<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<SessionId>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: SessionStore + Clone + Send + Sync + 'static,
    B: Broadcast + Clone + Send + Sync + 'static,
{
    let client = state.open(payload.participant, id).await?;
    client.abandon().await?;
    info!(session = %id, "Session abandoned");
    Ok(StatusCode::NO_CONTENT)
}
