//! Twelve-word bitboard position and shift-based attack generation.
//!
//! Bit `i` of a word is square `i` (a1 = 0, h8 = 63). Word `kind * 2 + color`
//! holds the pieces of that kind and color, see [`Piece::index`].
//!
//! Edge clipping is branchless: a shift that moves a piece one or two files
//! sideways is preceded by masking out the files it would wrap from.

use crate::types::*;

// ---------------------------------------------------------------------------
// Masks
// ---------------------------------------------------------------------------

/// Every square except the a-file.
pub const NOT_A: u64 = 0xFEFE_FEFE_FEFE_FEFE;
/// Every square except the h-file.
pub const NOT_H: u64 = 0x7F7F_7F7F_7F7F_7F7F;
/// Every square except the a- and b-files.
pub const NOT_AB: u64 = 0xFCFC_FCFC_FCFC_FCFC;
/// Every square except the g- and h-files.
pub const NOT_GH: u64 = 0x3F3F_3F3F_3F3F_3F3F;

pub const RANK_1: u64 = 0x0000_0000_0000_00FF;
pub const RANK_2: u64 = 0x0000_0000_0000_FF00;
pub const RANK_7: u64 = 0x00FF_0000_0000_0000;
pub const RANK_8: u64 = 0xFF00_0000_0000_0000;

/// Dark squares (a1 is dark).
pub const DARK_SQUARES: u64 = 0xAA55_AA55_AA55_AA55;

const ROOK_RAYS: [(i8, u64); 4] = [(8, !0), (-8, !0), (1, NOT_H), (-1, NOT_A)];
const BISHOP_RAYS: [(i8, u64); 4] = [(9, NOT_H), (7, NOT_A), (-7, NOT_H), (-9, NOT_A)];

#[inline(always)]
fn shift(bb: u64, by: i8) -> u64 {
    if by >= 0 { bb << by } else { bb >> -by }
}

// ---------------------------------------------------------------------------
// Bit iteration
// ---------------------------------------------------------------------------

/// Iterates the set bits of a word from a1 upwards.
pub struct Bits(u64);

impl Iterator for Bits {
    type Item = Square;

    #[inline]
    fn next(&mut self) -> Option<Square> {
        if self.0 == 0 {
            return None;
        }
        let sq = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        Some(Square(sq))
    }
}

#[inline]
pub fn bits(bb: u64) -> Bits {
    Bits(bb)
}

// ---------------------------------------------------------------------------
// Attack patterns
// ---------------------------------------------------------------------------

/// One-step king moves for every king bit in `kings`.
pub fn king_attacks(kings: u64) -> u64 {
    ((kings & NOT_H) << 1)
        | ((kings & NOT_A) >> 1)
        | (kings << 8)
        | (kings >> 8)
        | ((kings & NOT_H) << 9)
        | ((kings & NOT_A) << 7)
        | ((kings & NOT_H) >> 7)
        | ((kings & NOT_A) >> 9)
}

/// Knight jumps for every knight bit in `knights`.
pub fn knight_attacks(knights: u64) -> u64 {
    ((knights & NOT_H) << 17)
        | ((knights & NOT_A) << 15)
        | ((knights & NOT_GH) << 10)
        | ((knights & NOT_AB) << 6)
        | ((knights & NOT_A) >> 17)
        | ((knights & NOT_H) >> 15)
        | ((knights & NOT_AB) >> 10)
        | ((knights & NOT_GH) >> 6)
}

/// Diagonal capture squares of `pawns`. Forward pushes are not attacks.
pub fn pawn_attacks(pawns: u64, color: Color) -> u64 {
    match color {
        Color::White => ((pawns & NOT_A) << 7) | ((pawns & NOT_H) << 9),
        Color::Black => ((pawns & NOT_H) >> 7) | ((pawns & NOT_A) >> 9),
    }
}

/// Walks each ray from a single square until it leaves the board or hits
/// an occupied square, which is included.
fn ray_attacks(square: u64, occupied: u64, rays: &[(i8, u64)]) -> u64 {
    let mut attacks = 0;
    for &(by, mask) in rays {
        let mut cursor = square;
        loop {
            cursor = shift(cursor & mask, by);
            if cursor == 0 {
                break;
            }
            attacks |= cursor;
            if cursor & occupied != 0 {
                break;
            }
        }
    }
    attacks
}

/// Bishop attacks from one square.
pub fn bishop_attacks(square: Square, occupied: u64) -> u64 {
    ray_attacks(square.bit(), occupied, &BISHOP_RAYS)
}

/// Rook attacks from one square.
pub fn rook_attacks(square: Square, occupied: u64) -> u64 {
    ray_attacks(square.bit(), occupied, &ROOK_RAYS)
}

pub fn queen_attacks(square: Square, occupied: u64) -> u64 {
    bishop_attacks(square, occupied) | rook_attacks(square, occupied)
}

/// Attack pattern of a non-pawn piece standing on `square`.
pub fn piece_attacks(kind: PieceKind, square: Square, occupied: u64) -> u64 {
    match kind {
        PieceKind::Knight => knight_attacks(square.bit()),
        PieceKind::Bishop => bishop_attacks(square, occupied),
        PieceKind::Rook => rook_attacks(square, occupied),
        PieceKind::Queen => queen_attacks(square, occupied),
        PieceKind::King => king_attacks(square.bit()),
        PieceKind::Pawn => 0,
    }
}

/// Every square attacked by `color` given the piece words and the occupancy
/// sliders should see. Callers testing king destinations pass an occupancy
/// with that king removed.
pub fn attacks_by(pieces: &[u64; 12], color: Color, occupied: u64) -> u64 {
    let word = |kind: PieceKind| pieces[Piece::new(kind, color).index()];
    let queens = word(PieceKind::Queen);

    let mut attacks = pawn_attacks(word(PieceKind::Pawn), color)
        | knight_attacks(word(PieceKind::Knight))
        | king_attacks(word(PieceKind::King));
    for sq in bits(word(PieceKind::Bishop) | queens) {
        attacks |= bishop_attacks(sq, occupied);
    }
    for sq in bits(word(PieceKind::Rook) | queens) {
        attacks |= rook_attacks(sq, occupied);
    }
    attacks
}

// ---------------------------------------------------------------------------
// Bitboard
// ---------------------------------------------------------------------------

/// A full position: piece placement plus side to move, castling rights,
/// en-passant target and move counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bitboard {
    pub pieces: [u64; 12],
    pub active_color: Color,
    pub castling: CastlingRights,
    /// The square a pawn skipped on the previous ply, if it moved two.
    pub en_passant: Option<Square>,
    /// Plies since the last capture or pawn move.
    pub halfmove: u32,
    /// Starts at 1 and increments after each black move.
    pub fullmove: u32,
}

impl Default for Bitboard {
    fn default() -> Self {
        Self::starting_position()
    }
}

impl Bitboard {
    /// A board with no pieces, white to move and no castling rights.
    pub fn empty() -> Self {
        Self {
            pieces: [0; 12],
            active_color: Color::White,
            castling: CastlingRights::NONE,
            en_passant: None,
            halfmove: 0,
            fullmove: 1,
        }
    }

    /// The standard initial position.
    pub fn starting_position() -> Self {
        let mut bb = Self::empty();
        let mut put = |kind: PieceKind, white: u64| {
            bb.pieces[Piece::new(kind, Color::White).index()] = white;
            // Mirror rank 1/2 onto rank 8/7.
            bb.pieces[Piece::new(kind, Color::Black).index()] = white.swap_bytes();
        };
        put(PieceKind::Pawn, RANK_2);
        put(PieceKind::Knight, 0x42);
        put(PieceKind::Bishop, 0x24);
        put(PieceKind::Rook, 0x81);
        put(PieceKind::Queen, 0x08);
        put(PieceKind::King, 0x10);
        bb.castling = CastlingRights::ALL;
        bb
    }

    /// The occupancy word of one piece.
    #[inline]
    pub fn word(&self, piece: Piece) -> u64 {
        self.pieces[piece.index()]
    }

    /// All squares occupied by `color`.
    pub fn color_occupancy(&self, color: Color) -> u64 {
        self.pieces
            .iter()
            .skip(color.index())
            .step_by(2)
            .fold(0, |acc, w| acc | w)
    }

    /// All occupied squares.
    pub fn occupancy(&self) -> u64 {
        self.pieces.iter().fold(0, |acc, w| acc | w)
    }

    /// Scans the twelve words for the piece on `sq`.
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        let bit = sq.bit();
        self.pieces
            .iter()
            .position(|w| w & bit != 0)
            .and_then(Piece::from_index)
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        bits(self.word(Piece::new(PieceKind::King, color))).next()
    }

    /// Squares attacked by `color` in the current position.
    pub fn attacked_by(&self, color: Color) -> u64 {
        attacks_by(&self.pieces, color, self.occupancy())
    }

    /// Whether `color`'s king stands on an attacked square.
    pub fn in_check(&self, color: Color) -> bool {
        let king = self.word(Piece::new(PieceKind::King, color));
        king != 0 && self.attacked_by(color.opponent()) & king != 0
    }

    /// Sum of non-king material of both sides.
    pub fn material(&self) -> u32 {
        self.pieces
            .iter()
            .enumerate()
            .filter_map(|(i, w)| Piece::from_index(i).map(|p| p.kind.value() * w.count_ones()))
            .sum()
    }

    // -----------------------------------------------------------------------
    // Move application
    // -----------------------------------------------------------------------

    /// Updates piece placement only. Counters, rights and side to move are
    /// left alone; legality filtering calls this on a copy.
    pub fn make_move(&mut self, mv: Move) {
        let from = mv.from().bit();
        let to = mv.to().bit();
        let kind = mv.kind();
        let Some(moved) = self.piece_at(mv.from()) else {
            return;
        };

        if kind.is_capture()
            && kind != MoveKind::EnPassant
            && let Some(captured) = self.piece_at(mv.to())
        {
            self.pieces[captured.index()] &= !to;
        }

        self.pieces[moved.index()] ^= from | to;

        let rook = Piece::new(PieceKind::Rook, moved.color).index();
        match kind {
            MoveKind::EnPassant => {
                let behind = match moved.color {
                    Color::White => to >> 8,
                    Color::Black => to << 8,
                };
                let pawn = Piece::new(PieceKind::Pawn, moved.color.opponent());
                self.pieces[pawn.index()] &= !behind;
            }
            // King lands on g-file, rook goes h -> f.
            MoveKind::KingCastle => self.pieces[rook] ^= (to << 1) | (to >> 1),
            // King lands on c-file, rook goes a -> d.
            MoveKind::QueenCastle => self.pieces[rook] ^= (to >> 2) | (to << 1),
            _ => {
                if let Some(promoted) = kind.promotion_piece() {
                    self.pieces[moved.index()] &= !to;
                    self.pieces[Piece::new(promoted, moved.color).index()] |= to;
                }
            }
        }
    }

    /// Applies a move and maintains castling rights, en-passant target,
    /// counters and side to move.
    pub fn apply_move(&mut self, mv: Move) {
        let mover = self.active_color;
        let moved = self.piece_at(mv.from());
        self.make_move(mv);

        if moved.is_some_and(|p| p.kind == PieceKind::King) {
            self.castling.clear_color(mover);
        }
        self.revoke_castling_for_missing_rooks();

        self.en_passant = if mv.kind() == MoveKind::DoublePawnPush {
            Some(Square((mv.from().0 + mv.to().0) / 2))
        } else {
            None
        };

        if mv.kind().is_capture() || moved.is_some_and(|p| p.kind == PieceKind::Pawn) {
            self.halfmove = 0;
        } else {
            self.halfmove += 1;
        }
        if mover == Color::Black {
            self.fullmove += 1;
        }
        self.active_color = mover.opponent();
    }

    fn revoke_castling_for_missing_rooks(&mut self) {
        for (flag, home, color) in [
            (CastlingRights::WHITE_SHORT, 7, Color::White),
            (CastlingRights::WHITE_LONG, 0, Color::White),
            (CastlingRights::BLACK_SHORT, 63, Color::Black),
            (CastlingRights::BLACK_LONG, 56, Color::Black),
        ] {
            let rooks = self.word(Piece::new(PieceKind::Rook, color));
            if rooks & (1u64 << home) == 0 {
                self.castling.clear(flag);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
