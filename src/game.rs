//! Game state machine: move application, clocks and terminal detection.
//!
//! A [`Game`] owns its [`Bitboard`], the list of completed moves and the
//! legal moves of the side to move. It is driven by exactly one writer,
//! the [`GameLoop`](crate::game_loop::GameLoop) actor of its room.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::bitboard::{Bitboard, DARK_SQUARES};
use crate::error::{FenResult, MoveError};
use crate::types::*;
use crate::{fen, movegen, san};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A move that has been applied, with its notation and the position it
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CompletedMove {
    /// The 16-bit move encoding.
    #[schema(value_type = u16)]
    pub mv: Move,
    pub san: String,
    /// FEN after the move.
    pub fen: String,
    /// Seconds left on the mover's clock, bonus included.
    pub time_left: u32,
}

/// Ways a game can be ended from outside the move flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The given side resigned.
    Resignation(Color),
    /// Both players agreed to a draw.
    Agreement,
    /// The given side ran out of time according to an external clock.
    Timeout(Color),
}

/// Everything a client needs to redraw the game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub white_time: u32,
    pub black_time: u32,
    pub result: GameResult,
    pub winner: Winner,
    pub active_color: Color,
    pub moves: Vec<CompletedMove>,
    pub legal_moves: Vec<Move>,
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Game {
    board: Bitboard,
    moves: Vec<CompletedMove>,
    legal_moves: Vec<Move>,
    white_time: u32,
    black_time: u32,
    time_control: u32,
    time_bonus: u32,
    result: GameResult,
    winner: Winner,
}

impl Game {
    /// A new game from the initial position. A `time_control` of 0 means
    /// the game is untimed.
    pub fn new(time_control: u32, time_bonus: u32) -> Self {
        Self::with_board(Bitboard::starting_position(), time_control, time_bonus)
    }

    /// A game starting from an arbitrary position.
    pub fn from_fen(fen: &str, time_control: u32, time_bonus: u32) -> FenResult<Self> {
        Ok(Self::with_board(fen::parse(fen)?, time_control, time_bonus))
    }

    fn with_board(board: Bitboard, time_control: u32, time_bonus: u32) -> Self {
        Self {
            legal_moves: movegen::legal_moves(&board),
            board,
            moves: Vec::new(),
            white_time: time_control,
            black_time: time_control,
            time_control,
            time_bonus,
            result: GameResult::Unknown,
            winner: Winner::None,
        }
    }

    pub fn board(&self) -> &Bitboard {
        &self.board
    }

    pub fn moves(&self) -> &[CompletedMove] {
        &self.moves
    }

    pub fn legal_moves(&self) -> &[Move] {
        &self.legal_moves
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    pub fn winner(&self) -> Winner {
        self.winner
    }

    pub fn is_over(&self) -> bool {
        self.result.is_terminal()
    }

    pub fn active_color(&self) -> Color {
        self.board.active_color
    }

    pub fn time_control(&self) -> u32 {
        self.time_control
    }

    pub fn time_bonus(&self) -> u32 {
        self.time_bonus
    }

    pub fn is_timed(&self) -> bool {
        self.time_control > 0
    }

    /// Seconds left on `color`'s clock.
    pub fn clock(&self, color: Color) -> u32 {
        match color {
            Color::White => self.white_time,
            Color::Black => self.black_time,
        }
    }

    fn clock_mut(&mut self, color: Color) -> &mut u32 {
        match color {
            Color::White => &mut self.white_time,
            Color::Black => &mut self.black_time,
        }
    }

    pub fn fen(&self) -> String {
        fen::serialize(&self.board)
    }

    // -----------------------------------------------------------------------
    // Moves
    // -----------------------------------------------------------------------

    /// Matches a submitted move against the legal list. A promotion takes
    /// the submitted piece but the legal entry's capture flag, so a client
    /// may pick any of the four promotion pieces.
    pub fn resolve(&self, submitted: Move) -> Option<Move> {
        if self.legal_moves.contains(&submitted) {
            return Some(submitted);
        }
        let piece = submitted.kind().promotion_piece()?;
        let legal = self.legal_moves.iter().find(|m| {
            m.from() == submitted.from() && m.to() == submitted.to() && m.kind().is_promotion()
        })?;
        MoveKind::promotion(piece, legal.kind().is_capture()).map(|kind| legal.with_kind(kind))
    }

    /// Plays a move for `color`, rejecting it if it is the other side's turn.
    pub fn play_as(&mut self, color: Color, mv: Move) -> Result<&CompletedMove, MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        if color != self.board.active_color {
            return Err(MoveError::NotYourTurn);
        }
        self.play(mv)
    }

    /// Plays a move for the side to move.
    pub fn play(&mut self, submitted: Move) -> Result<&CompletedMove, MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        let mv = self.resolve(submitted).ok_or(MoveError::IllegalMove)?;
        let mover = self.board.active_color;
        let moved = self
            .board
            .piece_at(mv.from())
            .map(|p| p.kind)
            .ok_or(MoveError::IllegalMove)?;

        let before = self.board;
        let legal_before = std::mem::take(&mut self.legal_moves);
        self.board.apply_move(mv);
        self.legal_moves = movegen::legal_moves(&self.board);

        let check = movegen::is_in_check(&self.board);
        let mate = check && self.legal_moves.is_empty();
        let san = san::encode(mv, &before, &legal_before, moved, check, mate);

        if self.is_timed() {
            let bonus = self.time_bonus;
            let clock = self.clock_mut(mover);
            *clock = clock.saturating_add(bonus);
        }

        self.moves.push(CompletedMove {
            mv,
            san,
            fen: fen::serialize(&self.board),
            time_left: self.clock(mover),
        });
        self.detect_terminal(mover);

        Ok(self.moves.last().ok_or(MoveError::IllegalMove)?)
    }

    /// Replays a persisted move and restores the mover's clock to the
    /// stored value.
    pub fn play_recorded(&mut self, mv: Move, time_left: u32) -> Result<(), MoveError> {
        let mover = self.board.active_color;
        self.play(mv)?;
        if self.is_timed() {
            *self.clock_mut(mover) = time_left;
        }
        if let Some(last) = self.moves.last_mut() {
            last.time_left = time_left;
        }
        Ok(())
    }

    fn detect_terminal(&mut self, mover: Color) {
        let in_check = movegen::is_in_check(&self.board);
        if self.legal_moves.is_empty() {
            if in_check {
                self.finish(GameResult::Checkmate, mover.into());
            } else {
                self.finish(GameResult::Stalemate, Winner::None);
            }
        } else if self.is_threefold_repetition() {
            self.finish(GameResult::Repetition, Winner::None);
        } else if is_insufficient_material(&self.board) {
            self.finish(GameResult::InsufficientMaterial, Winner::None);
        } else if self.board.halfmove >= 100 {
            self.finish(GameResult::FiftyMoves, Winner::None);
        }
    }

    fn is_threefold_repetition(&self) -> bool {
        let mut seen: HashMap<String, u32> = HashMap::new();
        for completed in &self.moves {
            let count = seen.entry(fen::position_key(&completed.fen)).or_insert(0);
            *count += 1;
            if *count >= 3 {
                return true;
            }
        }
        false
    }

    fn finish(&mut self, result: GameResult, winner: Winner) {
        self.result = result;
        self.winner = winner;
    }

    /// Records an outcome decided elsewhere, e.g. when replaying a
    /// resigned game from storage. Ignored once the game is over.
    pub fn conclude(&mut self, result: GameResult, winner: Winner) {
        if !self.is_over() && result.is_terminal() {
            self.finish(result, winner);
        }
    }

    // -----------------------------------------------------------------------
    // Clock and external endings
    // -----------------------------------------------------------------------

    /// One second elapses on the clock of the side to move. Returns `true`
    /// when this tick ended the game.
    pub fn tick(&mut self) -> bool {
        if self.is_over() || !self.is_timed() {
            return false;
        }
        let side = self.board.active_color;
        let clock = self.clock_mut(side);
        *clock = clock.saturating_sub(1);
        if *clock == 0 {
            self.flag(side);
            return true;
        }
        false
    }

    /// `side` ran out of time. The opponent wins unless it cannot mate.
    fn flag(&mut self, side: Color) {
        let opponent = side.opponent();
        if has_mating_material(&self.board, opponent) {
            self.finish(GameResult::Timeout, opponent.into());
        } else {
            self.finish(GameResult::InsufficientMaterial, Winner::None);
        }
    }

    /// Ends the game from outside the move flow. No effect once over.
    pub fn end(&mut self, reason: EndReason) {
        if self.is_over() {
            return;
        }
        match reason {
            EndReason::Resignation(loser) => {
                self.finish(GameResult::Resignation, loser.opponent().into())
            }
            EndReason::Agreement => self.finish(GameResult::Agreement, Winner::None),
            EndReason::Timeout(side) => {
                *self.clock_mut(side) = 0;
                self.flag(side);
            }
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            white_time: self.white_time,
            black_time: self.black_time,
            result: self.result,
            winner: self.winner,
            active_color: self.board.active_color,
            moves: self.moves.clone(),
            legal_moves: self.legal_moves.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Material rules
// ---------------------------------------------------------------------------

/// Bare kings, a lone minor piece, or one bishop each on same-colored
/// squares.
pub fn is_insufficient_material(bb: &Bitboard) -> bool {
    let pawns = bb.word(Piece::new(PieceKind::Pawn, Color::White))
        | bb.word(Piece::new(PieceKind::Pawn, Color::Black));
    match bb.material() {
        0 => true,
        3 => pawns == 0,
        6 => {
            let white = bb.word(Piece::new(PieceKind::Bishop, Color::White));
            let black = bb.word(Piece::new(PieceKind::Bishop, Color::Black));
            white.count_ones() == 1
                && black.count_ones() == 1
                && (white & DARK_SQUARES != 0) == (black & DARK_SQUARES != 0)
        }
        _ => false,
    }
}

/// Whether `color` has anything beyond a king or a king and one minor piece.
pub fn has_mating_material(bb: &Bitboard, color: Color) -> bool {
    let count = |kind: PieceKind| bb.word(Piece::new(kind, color)).count_ones();
    let heavy = count(PieceKind::Pawn) + count(PieceKind::Rook) + count(PieceKind::Queen);
    heavy > 0 || count(PieceKind::Knight) + count(PieceKind::Bishop) >= 2
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
