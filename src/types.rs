//! Core value types shared by the rules engine, the actors and the wire
//! protocol.
//!
//! Squares are packed indices (0 = a1, 7 = h1, 56 = a8, 63 = h8) so they
//! map one-to-one onto bitboard bits. Moves are 16-bit words: destination
//! in bits 0-5, origin in bits 6-11, [`MoveKind`] in bits 12-15.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Piece & Color
// ---------------------------------------------------------------------------

/// The side a piece or player belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    /// Returns the opposite color.
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Offset of this color inside the twelve piece words.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Rank index (0-based) pawns of this color start on.
    pub fn pawn_start_rank(self) -> u8 {
        match self {
            Color::White => 1,
            Color::Black => 6,
        }
    }

    /// Rank index (0-based) pawns of this color promote on.
    pub fn promotion_rank(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// Index of the a-file square on this color's back rank.
    pub fn back_rank_offset(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => 56,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// A piece kind without color. The declaration order is the word order
/// inside a bitboard (pawns first, kings last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PieceKind {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

impl PieceKind {
    pub const ALL: [PieceKind; 6] = [
        PieceKind::Pawn,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
        PieceKind::King,
    ];

    /// Promotion targets in ascending value.
    pub const PROMOTIONS: [PieceKind; 4] = [
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
    ];

    /// Material value used by the insufficient-material rule. Kings count 0.
    pub fn value(self) -> u32 {
        match self {
            PieceKind::Pawn => 1,
            PieceKind::Knight | PieceKind::Bishop => 3,
            PieceKind::Rook => 5,
            PieceKind::Queen => 9,
            PieceKind::King => 0,
        }
    }

    /// Uppercase letter used by FEN and SAN.
    pub fn letter(self) -> char {
        match self {
            PieceKind::Pawn => 'P',
            PieceKind::Knight => 'N',
            PieceKind::Bishop => 'B',
            PieceKind::Rook => 'R',
            PieceKind::Queen => 'Q',
            PieceKind::King => 'K',
        }
    }

    /// Parses an uppercase or lowercase piece letter.
    pub fn from_letter(c: char) -> Option<PieceKind> {
        match c.to_ascii_uppercase() {
            'P' => Some(PieceKind::Pawn),
            'N' => Some(PieceKind::Knight),
            'B' => Some(PieceKind::Bishop),
            'R' => Some(PieceKind::Rook),
            'Q' => Some(PieceKind::Queen),
            'K' => Some(PieceKind::King),
            _ => None,
        }
    }
}

/// A chess piece with both kind and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    /// Index of this piece's occupancy word: `kind * 2 + color`, so white
    /// pawns are word 0, black pawns word 1, ..., black king word 11.
    pub fn index(self) -> usize {
        self.kind as usize * 2 + self.color.index()
    }

    /// Inverse of [`Piece::index`].
    pub fn from_index(index: usize) -> Option<Piece> {
        let kind = *PieceKind::ALL.get(index / 2)?;
        let color = if index % 2 == 0 {
            Color::White
        } else {
            Color::Black
        };
        Some(Piece { kind, color })
    }

    /// FEN character: uppercase for White, lowercase for Black.
    pub fn to_fen_char(self) -> char {
        let c = self.kind.letter();
        match self.color {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }

    /// Parses a FEN character into a piece.
    pub fn from_fen_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_letter(c)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Piece { kind, color })
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A board square as a packed index `rank * 8 + file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(pub u8);

impl Square {
    /// Creates a square from 0-based file and rank.
    pub fn new(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8 && rank < 8, "Square out of bounds");
        Square(rank * 8 + file)
    }

    /// Validating constructor for indices coming off the wire.
    pub fn from_index(index: u8) -> Option<Self> {
        (index < 64).then_some(Square(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    /// The single-bit bitboard of this square.
    pub fn bit(self) -> u64 {
        1u64 << self.0
    }

    pub fn file_char(self) -> char {
        (b'a' + self.file()) as char
    }

    pub fn rank_char(self) -> char {
        (b'1' + self.rank()) as char
    }

    /// Parses algebraic notation such as `"e4"`.
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        if file < 8 && rank < 8 {
            Some(Square::new(file, rank))
        } else {
            None
        }
    }

    pub fn to_algebraic(self) -> String {
        format!("{}{}", self.file_char(), self.rank_char())
    }

    /// Squares are on dark fields when file and rank have equal parity (a1 is dark).
    pub fn is_dark(self) -> bool {
        (self.file() + self.rank()) % 2 == 0
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.file_char(), self.rank_char())
    }
}

// ---------------------------------------------------------------------------
// Castling Rights
// ---------------------------------------------------------------------------

/// The four castling flags. Once a flag is cleared it is never set again
/// by move application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CastlingRights(u8);

impl CastlingRights {
    pub const WHITE_SHORT: u8 = 0b0001;
    pub const BLACK_SHORT: u8 = 0b0010;
    pub const WHITE_LONG: u8 = 0b0100;
    pub const BLACK_LONG: u8 = 0b1000;

    pub const NONE: CastlingRights = CastlingRights(0);
    pub const ALL: CastlingRights = CastlingRights(0b1111);

    /// King-side flag of `color`.
    pub fn short(color: Color) -> u8 {
        match color {
            Color::White => Self::WHITE_SHORT,
            Color::Black => Self::BLACK_SHORT,
        }
    }

    /// Queen-side flag of `color`.
    pub fn long(color: Color) -> u8 {
        match color {
            Color::White => Self::WHITE_LONG,
            Color::Black => Self::BLACK_LONG,
        }
    }

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Clears both flags of `color` (the king moved).
    pub fn clear_color(&mut self, color: Color) {
        self.clear(Self::short(color) | Self::long(color));
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// FEN castling field (`"KQkq"`, a subset of it, or `"-"`).
    pub fn to_fen(self) -> String {
        let mut s = String::new();
        for (flag, c) in [
            (Self::WHITE_SHORT, 'K'),
            (Self::WHITE_LONG, 'Q'),
            (Self::BLACK_SHORT, 'k'),
            (Self::BLACK_LONG, 'q'),
        ] {
            if self.has(flag) {
                s.push(c);
            }
        }
        if s.is_empty() { "-".to_string() } else { s }
    }

    /// Parses a FEN castling field. Unknown characters are ignored.
    pub fn from_fen(field: &str) -> Self {
        let mut bits = 0;
        for c in field.chars() {
            bits |= match c {
                'K' => Self::WHITE_SHORT,
                'Q' => Self::WHITE_LONG,
                'k' => Self::BLACK_SHORT,
                'q' => Self::BLACK_LONG,
                _ => 0,
            };
        }
        CastlingRights(bits)
    }
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// The four-bit move kind stored in bits 12-15 of a [`Move`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MoveKind {
    Quiet = 0,
    DoublePawnPush = 1,
    KingCastle = 2,
    QueenCastle = 3,
    Capture = 4,
    EnPassant = 5,
    KnightPromo = 6,
    BishopPromo = 7,
    RookPromo = 8,
    QueenPromo = 9,
    KnightPromoCapture = 10,
    BishopPromoCapture = 11,
    RookPromoCapture = 12,
    QueenPromoCapture = 13,
}

impl MoveKind {
    pub fn from_bits(bits: u8) -> Option<MoveKind> {
        use MoveKind::*;
        Some(match bits {
            0 => Quiet,
            1 => DoublePawnPush,
            2 => KingCastle,
            3 => QueenCastle,
            4 => Capture,
            5 => EnPassant,
            6 => KnightPromo,
            7 => BishopPromo,
            8 => RookPromo,
            9 => QueenPromo,
            10 => KnightPromoCapture,
            11 => BishopPromoCapture,
            12 => RookPromoCapture,
            13 => QueenPromoCapture,
            _ => return None,
        })
    }

    pub fn is_capture(self) -> bool {
        matches!(self, MoveKind::Capture | MoveKind::EnPassant) || self as u8 >= 10
    }

    pub fn is_promotion(self) -> bool {
        self as u8 >= 6
    }

    pub fn is_castle(self) -> bool {
        matches!(self, MoveKind::KingCastle | MoveKind::QueenCastle)
    }

    /// The piece a pawn turns into, for promotion kinds.
    pub fn promotion_piece(self) -> Option<PieceKind> {
        if !self.is_promotion() {
            return None;
        }
        PieceKind::PROMOTIONS.get(((self as u8 - 6) % 4) as usize).copied()
    }

    /// The promotion kind for `piece`, with or without capture.
    pub fn promotion(piece: PieceKind, capture: bool) -> Option<MoveKind> {
        let offset = PieceKind::PROMOTIONS.iter().position(|&p| p == piece)? as u8;
        let base = if capture { 10 } else { 6 };
        MoveKind::from_bits(base + offset)
    }
}

/// A move packed into 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub struct Move(u16);

impl Move {
    pub fn new(from: Square, to: Square, kind: MoveKind) -> Self {
        Move(((kind as u16) << 12) | ((from.0 as u16) << 6) | to.0 as u16)
    }

    /// Decodes a raw word; kinds 14 and 15 are rejected.
    pub fn from_raw(raw: u16) -> Option<Self> {
        MoveKind::from_bits((raw >> 12) as u8).map(|_| Move(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn to(self) -> Square {
        Square((self.0 & 0x3F) as u8)
    }

    pub fn from(self) -> Square {
        Square(((self.0 >> 6) & 0x3F) as u8)
    }

    pub fn kind(self) -> MoveKind {
        // Every constructor goes through a valid MoveKind.
        MoveKind::from_bits((self.0 >> 12) as u8).unwrap_or(MoveKind::Quiet)
    }

    /// Same squares, different kind.
    pub fn with_kind(self, kind: MoveKind) -> Self {
        Move::new(self.from(), self.to(), kind)
    }
}

impl From<Move> for u16 {
    fn from(mv: Move) -> u16 {
        mv.0
    }
}

impl TryFrom<u16> for Move {
    type Error = ProtocolError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Move::from_raw(raw).ok_or(ProtocolError::BadEncoding(raw))
    }
}

impl fmt::Display for Move {
    /// Coordinate notation, e.g. `e2e4` or `e7e8q`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from(), self.to())?;
        if let Some(piece) = self.kind().promotion_piece() {
            write!(f, "{}", piece.letter().to_ascii_lowercase())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Move({}, {:?})", self, self.kind())
    }
}

// ---------------------------------------------------------------------------
// Game outcome
// ---------------------------------------------------------------------------

/// How a game ended. `Unknown` means it is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[repr(u8)]
pub enum GameResult {
    Unknown = 0,
    Checkmate = 1,
    Timeout = 2,
    Stalemate = 3,
    InsufficientMaterial = 4,
    FiftyMoves = 5,
    Repetition = 6,
    Agreement = 7,
    Resignation = 8,
}

impl GameResult {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use GameResult::*;
        Some(match code {
            0 => Unknown,
            1 => Checkmate,
            2 => Timeout,
            3 => Stalemate,
            4 => InsufficientMaterial,
            5 => FiftyMoves,
            6 => Repetition,
            7 => Agreement,
            8 => Resignation,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        self != GameResult::Unknown
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameResult::Unknown => "in progress",
            GameResult::Checkmate => "checkmate",
            GameResult::Timeout => "timeout",
            GameResult::Stalemate => "stalemate",
            GameResult::InsufficientMaterial => "insufficient material",
            GameResult::FiftyMoves => "fifty-move rule",
            GameResult::Repetition => "threefold repetition",
            GameResult::Agreement => "agreement",
            GameResult::Resignation => "resignation",
        };
        f.write_str(s)
    }
}

/// The side credited with the win, or `None` for draws and running games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Winner {
    White,
    Black,
    None,
}

impl Winner {
    pub fn code(self) -> u8 {
        match self {
            Winner::None => 0,
            Winner::White => 1,
            Winner::Black => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Winner::None),
            1 => Some(Winner::White),
            2 => Some(Winner::Black),
            _ => None,
        }
    }
}

impl From<Color> for Winner {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Winner::White,
            Color::Black => Winner::Black,
        }
    }
}

// ---------------------------------------------------------------------------
// Players & time controls
// ---------------------------------------------------------------------------

/// An authenticated player as resolved from a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub rating: f64,
}

impl Player {
    pub fn new(id: impl Into<String>, rating: f64) -> Self {
        Self {
            id: id.into(),
            rating,
        }
    }
}

/// A queue bucket: initial clock and per-move bonus, both in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct TimeControl {
    /// Queue id, a single decimal digit on the wire.
    pub id: u8,
    /// Initial seconds per side. Zero disables the clock.
    pub control: u32,
    /// Seconds added to the mover's clock after each move.
    pub bonus: u32,
}

impl TimeControl {
    const fn new(id: u8, minutes: u32, bonus: u32) -> Self {
        Self {
            id,
            control: minutes * 60,
            bonus,
        }
    }

    /// The id clients pass as `?id=` to join this queue.
    pub fn queue_id(&self) -> String {
        self.id.to_string()
    }

    /// Looks up a queue by its wire id (`"1"` to `"9"`).
    pub fn by_queue_id(id: &str) -> Option<TimeControl> {
        TIME_CONTROLS.iter().find(|tc| tc.queue_id() == id).copied()
    }
}

impl fmt::Display for TimeControl {
    /// PGN style: `180+2`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.control, self.bonus)
    }
}

/// Every queue the hub opens at startup.
pub const TIME_CONTROLS: [TimeControl; 9] = [
    TimeControl::new(1, 1, 0),
    TimeControl::new(2, 2, 1),
    TimeControl::new(3, 3, 0),
    TimeControl::new(4, 3, 2),
    TimeControl::new(5, 5, 0),
    TimeControl::new(6, 5, 2),
    TimeControl::new(7, 10, 0),
    TimeControl::new(8, 10, 10),
    TimeControl::new(9, 15, 10),
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
