//! Client-side driver of one session
//!
//! A [`SessionClient`] evaluates each action against the latest canonical
//! snapshot it has seen, writes the resulting full snapshot conditioned on
//! the observed version, publishes it, and adopts the written record as its
//! new view. Lost races are reconciled before anything is retried.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broadcast::{Broadcast, Subscription};
use crate::clock;
use crate::error::{EngineResult, MoveError, SessionError, StoreError};
use crate::machine::{SessionMachine, Transition};
use crate::model::{
    Epoch, Move, NegotiationKind, ParticipantId, Session, SessionId, Side, TimeControl,
};
use crate::negotiation::Resolution;
use crate::oracle::MoveOracle;
use crate::reconcile::{reconcile, LocalView};
use crate::store::{SessionStore, WriteOutcome};

/// One participant's (or spectator's) handle on one session
pub struct SessionClient<S, B, O> {
    store: S,
    broadcast: B,
    machine: SessionMachine<O>,
    participant: ParticipantId,
    view: LocalView,
    /// Set while the store is unreachable; mutations wait for a good fetch
    degraded: bool,
    /// Set while the broadcast channel is unreachable; peers only learn of
    /// writes by fetching
    channel_degraded: bool,
}

impl<S, B, O> SessionClient<S, B, O>
where
    S: SessionStore,
    B: Broadcast,
    O: MoveOracle,
{
    /// Creates a new session owned by `participant` and opens it
    pub async fn create(
        store: S,
        broadcast: B,
        oracle: O,
        participant: ParticipantId,
        time_control: TimeControl,
        side: Option<Side>,
        now: Epoch,
    ) -> EngineResult<Self> {
        let machine = SessionMachine::new(oracle);
        let draft = machine.create(&participant, time_control, side, now);
        let canonical = store.create_session(&draft).await?;

        let mut client =
            Self::from_canonical(store, broadcast, machine, participant, canonical.clone());
        client.publish(&canonical).await;
        Ok(client)
    }

    /// Opens an existing session from the store
    pub async fn open(
        store: S,
        broadcast: B,
        oracle: O,
        participant: ParticipantId,
        id: SessionId,
    ) -> EngineResult<Self> {
        let canonical = store
            .fetch_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))?;
        let machine = SessionMachine::new(oracle);
        Ok(Self::from_canonical(store, broadcast, machine, participant, canonical))
    }

    fn from_canonical(
        store: S,
        broadcast: B,
        machine: SessionMachine<O>,
        participant: ParticipantId,
        canonical: Session,
    ) -> Self {
        let view = LocalView::from_canonical(machine.oracle(), canonical);
        Self {
            store,
            broadcast,
            machine,
            participant,
            view,
            degraded: false,
            channel_degraded: false,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn view(&self) -> &LocalView {
        &self.view
    }

    pub fn session(&self) -> &Session {
        &self.view.session
    }

    /// True while the store is unreachable; the view is read-only meanwhile
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// True while snapshots can be neither published nor received
    pub fn is_channel_degraded(&self) -> bool {
        self.channel_degraded
    }

    /// True when this client holds no seat in the session
    pub fn is_spectator(&self) -> bool {
        !self.view.session.is_participant(&self.participant)
    }

    /// Locally derived remaining time, for display and forfeiture checks
    pub fn remaining(&self, side: Side, now: Epoch) -> u64 {
        clock::remaining(&self.view.session, side, now)
    }

    /// Subscribes to canonical snapshots of this session
    pub async fn subscribe(&mut self) -> EngineResult<Subscription> {
        match self.broadcast.subscribe(self.view.session.id).await {
            Ok(subscription) => {
                self.channel_degraded = false;
                Ok(subscription)
            }
            Err(e) => {
                self.mark_channel_degraded(&e);
                Err(e.into())
            }
        }
    }

    /// Runs an inbound canonical snapshot through the reconciler
    pub fn apply_snapshot(&mut self, canonical: &Session) -> &LocalView {
        self.view = reconcile(self.machine.oracle(), &self.view, canonical);
        &self.view
    }

    /// Fetches the canonical record and reconciles with it
    pub async fn refresh(&mut self) -> EngineResult<&LocalView> {
        let id = self.view.session.id;
        match self.store.fetch_session(id).await {
            Ok(Some(canonical)) => {
                self.degraded = false;
                self.apply_snapshot(&canonical);
                Ok(&self.view)
            }
            Ok(None) => {
                self.degraded = false;
                Err(SessionError::NotFound(id).into())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Err(e.into())
            }
        }
    }

    pub async fn join(&mut self, now: Epoch) -> EngineResult<Session> {
        self.ensure_connected().await?;
        self.run("join", |machine, session, me| machine.join(session, me, now))
            .await
    }

    /// Proposes a move. A lost race surfaces as [`MoveError::Stale`] after
    /// the view has been reconciled, so a second attempt sees the new state.
    pub async fn propose_move(&mut self, mv: &Move, now: Epoch) -> EngineResult<Session> {
        self.ensure_connected().await?;
        let next = self
            .machine
            .propose_move(&self.view.session, mv, &self.participant, now)?;

        if self.commit(&next).await? {
            Ok(self.view.session.clone())
        } else {
            Err(MoveError::Stale.into())
        }
    }

    pub async fn offer(&mut self, kind: NegotiationKind, now: Epoch) -> EngineResult<Session> {
        self.ensure_connected().await?;
        self.preempt_expiry(now).await?;
        self.run("offer", |machine, session, me| {
            machine.offer(session, kind, me, now)
        })
        .await
    }

    /// Accepts or declines the outstanding offer of `kind`.
    ///
    /// An accepted rematch stores the successor session before linking it
    /// from this one, so the link never points at a missing record. A
    /// successor whose link was not written is deleted again.
    pub async fn respond(
        &mut self,
        kind: NegotiationKind,
        accept: bool,
        now: Epoch,
    ) -> EngineResult<Session> {
        self.ensure_connected().await?;
        self.preempt_expiry(now).await?;

        for attempt in 1..=2 {
            let Resolution { session: next, rematch } =
                self.machine
                    .respond(&self.view.session, kind, accept, &self.participant, now)?;

            let successor = match &rematch {
                Some(fresh) => Some(self.store_new(fresh).await?),
                None => None,
            };

            let linked = self.commit(&next).await;
            if let Ok(true) = linked {
                if let Some(successor) = &successor {
                    info!(previous = %next.id, session = %successor.id, "rematch started");
                    self.publish(successor).await;
                }
                return Ok(self.view.session.clone());
            }

            if let Some(successor) = successor {
                self.discard(&successor).await;
            }
            if let Err(e) = linked {
                return Err(e);
            }
            debug!(attempt, "re-evaluating response against reconciled snapshot");
        }

        Err(StoreError::Conflict.into())
    }

    pub async fn withdraw(&mut self, now: Epoch) -> EngineResult<Session> {
        self.ensure_connected().await?;
        self.preempt_expiry(now).await?;
        self.run("withdraw", |machine, session, me| {
            machine.withdraw(session, me, now)
        })
        .await
    }

    pub async fn resign(&mut self, now: Epoch) -> EngineResult<Session> {
        self.ensure_connected().await?;
        self.preempt_expiry(now).await?;
        self.run("resign", |machine, session, me| {
            machine.resign(session, me, now)
        })
        .await
    }

    /// Re-evaluates the clocks at `now` and declares forfeiture when due.
    ///
    /// Either seated participant may do this; the verdict follows from the
    /// canonical snapshot alone. Spectators only read [`Self::remaining`].
    pub async fn tick(&mut self, now: Epoch) -> EngineResult<Session> {
        if self.is_spectator() {
            return Err(SessionError::NotParticipant.into());
        }
        self.ensure_connected().await?;
        self.run("tick", |machine, session, _| Ok(machine.tick(session, now)))
            .await
    }

    /// Deletes a session that never became active
    pub async fn abandon(mut self) -> EngineResult<()> {
        self.ensure_connected().await?;

        for _ in 0..2 {
            self.machine.abandon(&self.view.session, &self.participant)?;
            let (id, version) = (self.view.session.id, self.view.session.version);
            match self.store.delete_session(id, version).await {
                Ok(WriteOutcome::Written(())) => {
                    info!(session = %id, "session abandoned");
                    return Ok(());
                }
                Ok(WriteOutcome::Conflict) => {
                    self.refresh().await?;
                }
                Err(e) => {
                    self.mark_degraded(&e);
                    return Err(e.into());
                }
            }
        }

        Err(StoreError::Conflict.into())
    }

    /// Follows the session until it ends.
    ///
    /// Inbound snapshots are reconciled as they arrive and the clocks are
    /// re-evaluated every `period`, declaring forfeiture as soon as the side
    /// to move has run out. Once the channel closes the loop falls back to
    /// fetching on every period. Spectators never declare forfeiture, they
    /// wait for a participant to do it. Drop the future to stop following
    /// early.
    pub async fn follow(
        &mut self,
        updates: &mut Subscription,
        period: Duration,
    ) -> EngineResult<Session> {
        let mut ticker = tokio::time::interval(period);
        let mut closed = false;

        while self.view.session.outcome.is_none() {
            tokio::select! {
                snapshot = updates.next(), if !closed => match snapshot {
                    Some(snapshot) => {
                        self.apply_snapshot(&snapshot);
                    }
                    None => {
                        warn!(session = %self.view.session.id, "broadcast closed, polling the store");
                        self.channel_degraded = true;
                        closed = true;
                    }
                },
                _ = ticker.tick() => {
                    if closed {
                        let refreshed = self.refresh().await.map(|_| ());
                        if let Err(e) = refreshed {
                            warn!(session = %self.view.session.id, error = %e, "refresh failed");
                            continue;
                        }
                    }
                    let now = clock::now();
                    if !self.is_spectator() && clock::flagged(&self.view.session, now).is_some() {
                        if let Err(e) = self.tick(now).await {
                            warn!(session = %self.view.session.id, error = %e, "forfeiture not recorded");
                        }
                    }
                }
            }
        }

        Ok(self.view.session.clone())
    }

    /// Evaluates `step` against the current view and commits the result,
    /// re-evaluating once against the reconciled view after a lost race
    async fn run<F>(&mut self, op: &'static str, step: F) -> EngineResult<Session>
    where
        F: Fn(&SessionMachine<O>, &Session, &ParticipantId) -> EngineResult<Transition>,
    {
        for attempt in 1..=2 {
            let next = match step(&self.machine, &self.view.session, &self.participant)? {
                Transition::Unchanged => return Ok(self.view.session.clone()),
                Transition::Updated(next) => next,
            };

            if self.commit(&next).await? {
                debug!(op, session = %next.id, version = self.view.session.version, "committed");
                return Ok(self.view.session.clone());
            }
            debug!(op, attempt, "re-evaluating against reconciled snapshot");
        }

        Err(StoreError::Conflict.into())
    }

    /// Persists a pending forfeiture before any negotiation or resignation
    async fn preempt_expiry(&mut self, now: Epoch) -> EngineResult<()> {
        if let Transition::Updated(forfeited) = self.machine.tick(&self.view.session, now) {
            self.commit(&forfeited).await?;
            return Err(SessionError::Ended.into());
        }
        Ok(())
    }

    /// Conditional write of `next`; `Ok(false)` means the race was lost and
    /// the view has been reconciled with the winner
    async fn commit(&mut self, next: &Session) -> EngineResult<bool> {
        let expected = self.view.session.version;
        match self.store.update_session(next, expected).await {
            Ok(WriteOutcome::Written(canonical)) => {
                self.degraded = false;
                self.apply_snapshot(&canonical);
                self.publish(&canonical).await;
                Ok(true)
            }
            Ok(WriteOutcome::Conflict) => {
                warn!(session = %next.id, expected, "write lost a race, reconciling");
                self.refresh().await?;
                Ok(false)
            }
            Err(e) => {
                self.mark_degraded(&e);
                Err(e.into())
            }
        }
    }

    async fn store_new(&mut self, session: &Session) -> EngineResult<Session> {
        self.store.create_session(session).await.map_err(|e| {
            self.mark_degraded(&e);
            e.into()
        })
    }

    async fn discard(&self, orphan: &Session) {
        if let Err(e) = self.store.delete_session(orphan.id, orphan.version).await {
            warn!(session = %orphan.id, error = %e, "failed to discard orphaned rematch");
        }
    }

    /// The store is the durable truth; a failed publish only delays peers
    /// until their next fetch
    async fn publish(&mut self, snapshot: &Session) {
        match self.broadcast.publish(snapshot).await {
            Ok(()) => self.channel_degraded = false,
            Err(e) => {
                warn!(session = %snapshot.id, error = %e, "failed to publish snapshot");
                self.mark_channel_degraded(&e);
            }
        }
    }

    async fn ensure_connected(&mut self) -> EngineResult<()> {
        if self.degraded {
            self.refresh().await?;
        }
        Ok(())
    }

    fn mark_degraded(&mut self, error: &StoreError) {
        if matches!(error, StoreError::Unavailable(_)) {
            warn!(session = %self.view.session.id, %error, "store unavailable, view is read-only");
            self.degraded = true;
        }
    }

    fn mark_channel_degraded(&mut self, error: &StoreError) {
        if matches!(error, StoreError::Unavailable(_)) {
            self.channel_degraded = true;
        }
    }
}

impl<S, B, O> SessionClient<S, B, O>
where
    S: SessionStore + Clone,
    B: Broadcast + Clone,
    O: MoveOracle + Clone,
{
    /// Opens the session created by an accepted rematch, if any
    pub async fn follow_rematch(&self) -> EngineResult<Option<Self>> {
        let Some(id) = self.view.session.rematch else {
            return Ok(None);
        };
        Self::open(
            self.store.clone(),
            self.broadcast.clone(),
            self.machine.oracle().clone(),
            self.participant.clone(),
            id,
        )
        .await
        .map(Some)
    }
}
