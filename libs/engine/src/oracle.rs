//! Move-legality oracle
//!
//! The engine never keeps rules state of its own: legality, the resulting
//! notation and terminal positions are always asked of a [`MoveOracle`] as a
//! pure function of the session notation. [`ChessOracle`] is the chess
//! implementation backed by shakmaty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Position,
};
use thiserror::Error;

use crate::model::{Move, Side};

/// Errors reported by an oracle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The move is malformed or not legal in the position
    #[error("illegal move: {0}")]
    Illegal(String),

    /// The notation does not replay from the initial position
    #[error("invalid notation at {0:?}")]
    InvalidNotation(String),
}

/// Terminal status of a position, as judged by the game rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    #[default]
    None,
    /// Carries the winning side
    Checkmate(Side),
    Stalemate,
    /// Insufficient material, repetition or move-count rule
    DrawByRule,
}

/// Result of applying one move to a notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub notation: String,
    pub is_capture: bool,
    pub terminal: TerminalStatus,
}

/// Presentation facts about the position a notation leads to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub to_move: Side,
    pub in_check: bool,
    pub terminal: TerminalStatus,
}

/// External rules authority consulted by the engine
pub trait MoveOracle {
    /// All legal moves after `notation`
    fn legal_moves(&self, notation: &str) -> Result<Vec<Move>, OracleError>;

    /// Validates `mv` after `notation` and returns the extended notation
    fn apply_move(&self, notation: &str, mv: &Move) -> Result<Applied, OracleError>;

    /// Derived facts about the position after `notation`
    fn inspect(&self, notation: &str) -> Result<PositionInfo, OracleError>;
}

/// Rebuilds the notation of a move log from the initial position
pub fn replay<O: MoveOracle + ?Sized>(oracle: &O, moves: &[Move]) -> Result<String, OracleError> {
    moves.iter().try_fold(String::new(), |notation, mv| {
        oracle.apply_move(&notation, mv).map(|applied| applied.notation)
    })
}

/// Standard chess from the initial position; the first mover plays white
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessOracle;

impl ChessOracle {
    pub fn new() -> Self {
        Self
    }
}

/// A replayed game: the final position and how often each position occurred
struct Replayed {
    position: Chess,
    seen: HashMap<String, u32>,
}

impl Replayed {
    fn from_notation(notation: &str) -> Result<Self, OracleError> {
        let mut replayed = Self {
            position: Chess::default(),
            seen: HashMap::new(),
        };
        replayed.record();

        for token in notation.split_whitespace() {
            let invalid = || OracleError::InvalidNotation(token.to_string());
            let san: San = token.parse().map_err(|_| invalid())?;
            let m = san.to_move(&replayed.position).map_err(|_| invalid())?;
            replayed.position = replayed.position.clone().play(&m).map_err(|_| invalid())?;
            replayed.record();
        }

        Ok(replayed)
    }

    fn record(&mut self) -> u32 {
        let count = self.seen.entry(repetition_key(&self.position)).or_insert(0);
        *count += 1;
        *count
    }

    fn occurrences(&self) -> u32 {
        self.seen
            .get(&repetition_key(&self.position))
            .copied()
            .unwrap_or(0)
    }
}

/// Board, side to move, castling rights and en passant square
fn repetition_key(position: &Chess) -> String {
    let fen = Fen::from_position(position.clone(), EnPassantMode::Legal).to_string();
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::First,
        Color::Black => Side::Second,
    }
}

fn terminal_status(position: &Chess, occurrences: u32) -> TerminalStatus {
    if position.is_checkmate() {
        TerminalStatus::Checkmate(side_of(position.turn()).opposite())
    } else if position.is_stalemate() {
        TerminalStatus::Stalemate
    } else if position.is_insufficient_material() || occurrences >= 3 || position.halfmoves() >= 150
    {
        TerminalStatus::DrawByRule
    } else {
        TerminalStatus::None
    }
}

impl MoveOracle for ChessOracle {
    fn legal_moves(&self, notation: &str) -> Result<Vec<Move>, OracleError> {
        let replayed = Replayed::from_notation(notation)?;
        if terminal_status(&replayed.position, replayed.occurrences()) != TerminalStatus::None {
            return Ok(Vec::new());
        }

        Ok(replayed
            .position
            .legal_moves()
            .iter()
            .map(|m| Move::new(UciMove::from_move(m, CastlingMode::Standard).to_string()))
            .collect())
    }

    fn apply_move(&self, notation: &str, mv: &Move) -> Result<Applied, OracleError> {
        let mut replayed = Replayed::from_notation(notation)?;
        let illegal = || OracleError::Illegal(mv.to_string());

        if terminal_status(&replayed.position, replayed.occurrences()) != TerminalStatus::None {
            return Err(illegal());
        }

        let uci: UciMove = mv.as_str().parse().map_err(|_| illegal())?;
        let m = uci.to_move(&replayed.position).map_err(|_| illegal())?;
        let san = San::from_move(&replayed.position, &m);
        let is_capture = m.is_capture();

        replayed.position = replayed.position.clone().play(&m).map_err(|_| illegal())?;
        let occurrences = replayed.record();

        let notation = match notation.trim() {
            "" => san.to_string(),
            previous => format!("{previous} {san}"),
        };

        Ok(Applied {
            notation,
            is_capture,
            terminal: terminal_status(&replayed.position, occurrences),
        })
    }

    fn inspect(&self, notation: &str) -> Result<PositionInfo, OracleError> {
        let replayed = Replayed::from_notation(notation)?;
        Ok(PositionInfo {
            to_move: side_of(replayed.position.turn()),
            in_check: replayed.position.is_check(),
            terminal: terminal_status(&replayed.position, replayed.occurrences()),
        })
    }
}
