//! Legal move generation on top of [`Bitboard`].
//!
//! Generation runs in two passes:
//!
//! 1. Pseudo-legal moves for every allied piece except the king. Each
//!    candidate is applied to a copy of the bitboard and dropped if the
//!    allied king ends up attacked. Pins, check evasions and en passant
//!    discovered checks all fall out of this one filter.
//! 2. King moves, computed against an enemy attack map built with the king
//!    lifted off the board, followed by castling.
//!
//! Promotions are expanded into all four pieces so that perft counts match
//! the reference numbers. The wire protocol collapses them again, see
//! [`crate::protocol::compact_legal_moves`].

use crate::bitboard::*;
use crate::types::*;

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// All legal moves for the side to move.
pub fn legal_moves(bb: &Bitboard) -> Vec<Move> {
    let mut moves = Vec::with_capacity(48);
    for mv in pseudo_legal_moves(bb) {
        if leaves_king_safe(bb, mv) {
            moves.push(mv);
        }
    }
    king_moves(bb, &mut moves);
    moves
}

/// Pseudo-legal moves of every non-king piece of the side to move.
pub fn pseudo_legal_moves(bb: &Bitboard) -> Vec<Move> {
    let mut moves = Vec::with_capacity(64);
    let us = bb.active_color;
    let allies = bb.color_occupancy(us);
    let enemies = bb.color_occupancy(us.opponent());
    let occupied = allies | enemies;

    for kind in [
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
    ] {
        for from in bits(bb.word(Piece::new(kind, us))) {
            let targets = piece_attacks(kind, from, occupied) & !allies;
            push_targets(&mut moves, from, targets, enemies);
        }
    }
    pawn_moves(bb, &mut moves);
    moves
}

/// Applies `mv` to a copy and reports whether the mover's king is safe.
pub fn leaves_king_safe(bb: &Bitboard, mv: Move) -> bool {
    let mut copy = *bb;
    copy.make_move(mv);
    !copy.in_check(bb.active_color)
}

/// Whether the side to move is in check.
pub fn is_in_check(bb: &Bitboard) -> bool {
    bb.in_check(bb.active_color)
}

// ---------------------------------------------------------------------------
// Piece generators
// ---------------------------------------------------------------------------

fn push_targets(moves: &mut Vec<Move>, from: Square, targets: u64, enemies: u64) {
    for to in bits(targets) {
        let kind = if to.bit() & enemies != 0 {
            MoveKind::Capture
        } else {
            MoveKind::Quiet
        };
        moves.push(Move::new(from, to, kind));
    }
}

fn push_promotions(moves: &mut Vec<Move>, from: Square, to: Square, capture: bool) {
    for piece in PieceKind::PROMOTIONS {
        if let Some(kind) = MoveKind::promotion(piece, capture) {
            moves.push(Move::new(from, to, kind));
        }
    }
}

fn pawn_moves(bb: &Bitboard, moves: &mut Vec<Move>) {
    let us = bb.active_color;
    let enemies = bb.color_occupancy(us.opponent());
    let empty = !(enemies | bb.color_occupancy(us));
    let forward: i8 = match us {
        Color::White => 8,
        Color::Black => -8,
    };
    let step = |bit: u64| if forward > 0 { bit << 8 } else { bit >> 8 };

    for from in bits(bb.word(Piece::new(PieceKind::Pawn, us))) {
        let single = step(from.bit()) & empty;
        if single != 0 {
            let to = Square((from.0 as i8 + forward) as u8);
            if to.rank() == us.promotion_rank() {
                push_promotions(moves, from, to, false);
            } else {
                moves.push(Move::new(from, to, MoveKind::Quiet));
                if from.rank() == us.pawn_start_rank() && step(single) & empty != 0 {
                    let double = Square((to.0 as i8 + forward) as u8);
                    moves.push(Move::new(from, double, MoveKind::DoublePawnPush));
                }
            }
        }

        let attacks = pawn_attacks(from.bit(), us);
        for to in bits(attacks & enemies) {
            if to.rank() == us.promotion_rank() {
                push_promotions(moves, from, to, true);
            } else {
                moves.push(Move::new(from, to, MoveKind::Capture));
            }
        }

        if let Some(target) = bb.en_passant
            && attacks & target.bit() != 0
        {
            moves.push(Move::new(from, target, MoveKind::EnPassant));
        }
    }
}

/// King steps and castling. Must run after the filter pass since these
/// moves are already legal by construction.
fn king_moves(bb: &Bitboard, moves: &mut Vec<Move>) {
    let us = bb.active_color;
    let Some(king_sq) = bb.king_square(us) else {
        return;
    };
    let king = king_sq.bit();
    let allies = bb.color_occupancy(us);
    let enemies = bb.color_occupancy(us.opponent());
    let occupied = allies | enemies;

    let attacked = attacks_by(&bb.pieces, us.opponent(), occupied & !king);
    push_targets(moves, king_sq, king_attacks(king) & !allies & !attacked, enemies);

    if attacked & king != 0 {
        return;
    }
    let home = us.back_rank_offset();
    if king_sq.0 != home + 4 {
        return;
    }
    let rooks = bb.word(Piece::new(PieceKind::Rook, us));

    // f and g must be empty and safe.
    let short_path = 0b0110_0000u64 << home;
    if bb.castling.has(CastlingRights::short(us))
        && rooks & (1u64 << (home + 7)) != 0
        && occupied & short_path == 0
        && attacked & short_path == 0
    {
        moves.push(Move::new(king_sq, Square(home + 6), MoveKind::KingCastle));
    }

    // b, c and d must be empty; only c and d must be safe.
    let long_empty = 0b0000_1110u64 << home;
    let long_path = 0b0000_1100u64 << home;
    if bb.castling.has(CastlingRights::long(us))
        && rooks & (1u64 << home) != 0
        && occupied & long_empty == 0
        && attacked & long_path == 0
    {
        moves.push(Move::new(king_sq, Square(home + 2), MoveKind::QueenCastle));
    }
}

// ---------------------------------------------------------------------------
// Perft
// ---------------------------------------------------------------------------

/// Leaf statistics of a perft run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerftCounts {
    pub nodes: u64,
    pub captures: u64,
    pub en_passant: u64,
    pub castles: u64,
    pub promotions: u64,
    pub checks: u64,
    pub checkmates: u64,
}

impl PerftCounts {
    fn merge(&mut self, rhs: PerftCounts) {
        self.nodes += rhs.nodes;
        self.captures += rhs.captures;
        self.en_passant += rhs.en_passant;
        self.castles += rhs.castles;
        self.promotions += rhs.promotions;
        self.checks += rhs.checks;
        self.checkmates += rhs.checkmates;
    }
}

/// Counts leaf nodes `depth` plies below `bb`.
pub fn perft(bb: &Bitboard, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let moves = legal_moves(bb);
    if depth == 1 {
        return moves.len() as u64;
    }
    moves
        .into_iter()
        .map(|mv| {
            let mut next = *bb;
            next.apply_move(mv);
            perft(&next, depth - 1)
        })
        .sum()
}

/// Like [`perft`] but classifies every leaf move.
pub fn perft_counts(bb: &Bitboard, depth: u32) -> PerftCounts {
    if depth == 0 {
        return PerftCounts {
            nodes: 1,
            ..PerftCounts::default()
        };
    }
    let mut total = PerftCounts::default();
    for mv in legal_moves(bb) {
        let mut next = *bb;
        next.apply_move(mv);
        if depth > 1 {
            total.merge(perft_counts(&next, depth - 1));
            continue;
        }

        total.nodes += 1;
        let kind = mv.kind();
        if kind.is_capture() {
            total.captures += 1;
        }
        if kind == MoveKind::EnPassant {
            total.en_passant += 1;
        }
        if kind.is_castle() {
            total.castles += 1;
        }
        if kind.is_promotion() {
            total.promotions += 1;
        }
        if is_in_check(&next) {
            total.checks += 1;
            if legal_moves(&next).is_empty() {
                total.checkmates += 1;
            }
        }
    }
    total
}

/// Per-root-move node counts, sorted by coordinate notation.
pub fn divide(bb: &Bitboard, depth: u32) -> Vec<(Move, u64)> {
    if depth == 0 {
        return Vec::new();
    }
    let mut out: Vec<(Move, u64)> = legal_moves(bb)
        .into_iter()
        .map(|mv| {
            let mut next = *bb;
            next.apply_move(mv);
            (mv, perft(&next, depth - 1))
        })
        .collect();
    out.sort_by_key(|(mv, _)| mv.to_string());
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
