//! Reconciliation of local state with canonical snapshots
//!
//! Local state is always provisional. Whatever arrives from the store or the
//! broadcast channel replaces it wholesale, and anything derived from the
//! rules is recomputed from the canonical notation instead of being kept.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Move, Session};
use crate::oracle::{MoveOracle, TerminalStatus};

/// Rules-derived facts for display, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presentation {
    pub in_check: bool,
    pub terminal: TerminalStatus,
    /// Empty once the session has ended
    pub legal_moves: Vec<Move>,
}

impl Presentation {
    /// Recomputes presentation state from `session.notation`
    pub fn derive<O: MoveOracle + ?Sized>(oracle: &O, session: &Session) -> Self {
        let info = match oracle.inspect(&session.notation) {
            Ok(info) => info,
            Err(e) => {
                warn!(session = %session.id, error = %e, "canonical notation does not replay");
                return Self::default();
            }
        };

        let legal_moves = if session.outcome.is_some() {
            Vec::new()
        } else {
            oracle.legal_moves(&session.notation).unwrap_or_default()
        };

        Self {
            in_check: info.in_check,
            terminal: info.terminal,
            legal_moves,
        }
    }
}

/// A client's view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalView {
    pub session: Session,
    pub presentation: Presentation,
}

impl LocalView {
    /// View built from a canonical snapshot alone
    pub fn from_canonical<O: MoveOracle + ?Sized>(oracle: &O, canonical: Session) -> Self {
        let presentation = Presentation::derive(oracle, &canonical);
        Self {
            session: canonical,
            presentation,
        }
    }
}

/// Merges `canonical` into `local`; canonical always wins.
///
/// Snapshots of another session are ignored. Reconciling the same snapshot
/// twice yields the same view, so duplicate or reordered deliveries of one
/// canonical value are harmless.
pub fn reconcile<O: MoveOracle + ?Sized>(
    oracle: &O,
    local: &LocalView,
    canonical: &Session,
) -> LocalView {
    if canonical.id != local.session.id {
        warn!(
            local = %local.session.id,
            canonical = %canonical.id,
            "ignoring snapshot of another session"
        );
        return local.clone();
    }

    LocalView::from_canonical(oracle, canonical.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Outcome, SessionId, TimeControl};
    use crate::oracle::{replay, ChessOracle};

    fn canonical() -> Session {
        let mut session = Session::new(SessionId::new(), "alice".into(), TimeControl::RAPID, None, 0);
        session.participants.push("bob".into());
        session.first_mover = Some("alice".into());
        session.second_mover = Some("bob".into());
        session.last_move_at = Some(0);
        session
    }

    #[test]
    fn test_canonical_replaces_local_optimism() {
        let base = canonical();
        let mut optimistic = LocalView::from_canonical(&ChessOracle, base.clone());
        optimistic.session.moves.push(Move::from("e2e4"));
        optimistic.session.notation = "e4".into();
        optimistic.presentation.in_check = true;

        let view = reconcile(&ChessOracle, &optimistic, &base);
        assert_eq!(view.session, base);
        assert!(!view.presentation.in_check);
        assert_eq!(view.presentation.legal_moves.len(), 20);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut base = canonical();
        let local = LocalView::from_canonical(&ChessOracle, base.clone());

        let log: Vec<Move> = ["e2e4", "f7f6", "d1h5"].into_iter().map(Move::from).collect();
        base.notation = replay(&ChessOracle, &log).unwrap();
        base.moves = log;
        base.version = 4;

        let once = reconcile(&ChessOracle, &local, &base);
        let twice = reconcile(&ChessOracle, &once, &base);
        assert_eq!(once, twice);
        assert!(once.presentation.in_check);
    }

    #[test]
    fn test_duplicate_deliveries_commute() {
        let mut first = canonical();
        let local = LocalView::from_canonical(&ChessOracle, first.clone());
        first.version = 2;
        let second = first.clone();

        let a = reconcile(&ChessOracle, &reconcile(&ChessOracle, &local, &first), &second);
        let b = reconcile(&ChessOracle, &reconcile(&ChessOracle, &local, &second), &first);
        assert_eq!(a, b);
    }

    #[test]
    fn test_foreign_snapshot_ignored() {
        let local = LocalView::from_canonical(&ChessOracle, canonical());
        let other = canonical();
        assert_eq!(reconcile(&ChessOracle, &local, &other), local);
    }

    #[test]
    fn test_ended_session_has_no_legal_moves() {
        let mut base = canonical();
        base.outcome = Some(Outcome::Draw);
        let view = LocalView::from_canonical(&ChessOracle, base);
        assert!(view.presentation.legal_moves.is_empty());
    }

    #[test]
    fn test_unreplayable_notation_yields_default_presentation() {
        let mut base = canonical();
        base.notation = "Ke9".into();
        let view = LocalView::from_canonical(&ChessOracle, base);
        assert_eq!(view.presentation, Presentation::default());
    }
}
