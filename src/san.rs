//! Standard Algebraic Notation encoder.
//!
//! Disambiguation only looks at the filtered legal-move list, so a piece
//! that is pinned never forces a file or rank qualifier on its twin.

use crate::bitboard::Bitboard;
use crate::movegen;
use crate::types::*;

/// Encodes `mv` played from `before`.
///
/// `legal` is the legal-move list of `before`; `check` and `mate` describe
/// the position after the move.
pub fn encode(
    mv: Move,
    before: &Bitboard,
    legal: &[Move],
    moved: PieceKind,
    check: bool,
    mate: bool,
) -> String {
    let mut san = String::with_capacity(8);

    match mv.kind() {
        MoveKind::KingCastle => san.push_str("O-O"),
        MoveKind::QueenCastle => san.push_str("O-O-O"),
        kind => {
            if moved == PieceKind::Pawn {
                if kind.is_capture() {
                    san.push(mv.from().file_char());
                }
            } else {
                san.push(moved.letter());
                san.push_str(&disambiguator(mv, before, legal, moved));
            }
            if kind.is_capture() {
                san.push('x');
            }
            san.push_str(&mv.to().to_algebraic());
            if let Some(promoted) = kind.promotion_piece() {
                san.push('=');
                san.push(promoted.letter());
            }
        }
    }

    if mate {
        san.push('#');
    } else if check {
        san.push('+');
    }
    san
}

/// File, rank or full origin square needed to tell `mv` apart from other
/// legal moves of the same piece kind landing on the same square.
fn disambiguator(mv: Move, before: &Bitboard, legal: &[Move], moved: PieceKind) -> String {
    let piece = Piece::new(moved, before.active_color);
    let rivals: Vec<Square> = legal
        .iter()
        .filter(|other| {
            other.to() == mv.to()
                && other.from() != mv.from()
                && before.piece_at(other.from()) == Some(piece)
        })
        .map(|other| other.from())
        .collect();

    let from = mv.from();
    if rivals.is_empty() {
        String::new()
    } else if rivals.iter().all(|sq| sq.file() != from.file()) {
        from.file_char().to_string()
    } else if rivals.iter().all(|sq| sq.rank() != from.rank()) {
        from.rank_char().to_string()
    } else {
        from.to_algebraic()
    }
}

/// Convenience wrapper that derives the moved piece and the check flags by
/// playing `mv` on a copy of `before`.
pub fn describe(mv: Move, before: &Bitboard, legal: &[Move]) -> String {
    let moved = before
        .piece_at(mv.from())
        .map(|p| p.kind)
        .unwrap_or(PieceKind::Pawn);
    let mut after = *before;
    after.apply_move(mv);
    let check = movegen::is_in_check(&after);
    let mate = check && movegen::legal_moves(&after).is_empty();
    encode(mv, before, legal, moved, check, mate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen;
    use std::collections::HashSet;

    fn san_of(fen_str: &str, from: &str, to: &str, kind: MoveKind) -> String {
        let bb = fen::parse(fen_str).unwrap();
        let legal = movegen::legal_moves(&bb);
        let mv = Move::new(
            Square::from_algebraic(from).unwrap(),
            Square::from_algebraic(to).unwrap(),
            kind,
        );
        assert!(legal.contains(&mv), "{} is not legal in {}", mv, fen_str);
        describe(mv, &bb, &legal)
    }

    #[test]
    fn test_pawn_and_piece_moves() {
        assert_eq!(san_of(fen::INITIAL_FEN, "e2", "e4", MoveKind::DoublePawnPush), "e4");
        assert_eq!(san_of(fen::INITIAL_FEN, "g1", "f3", MoveKind::Quiet), "Nf3");
        assert_eq!(
            san_of(
                "rnbqkb1r/pppppppp/5n2/8/3PP3/8/PPP2PPP/RNBQKBNR b KQkq - 0 1",
                "f6",
                "e4",
                MoveKind::Capture
            ),
            "Nxe4"
        );
    }

    #[test]
    fn test_file_disambiguation() {
        assert_eq!(
            san_of("4k3/8/8/8/8/2N5/8/4K1N1 w - - 0 1", "c3", "e2", MoveKind::Quiet),
            "Nce2"
        );
    }

    #[test]
    fn test_pinned_rival_does_not_disambiguate() {
        assert_eq!(
            san_of("4k3/8/8/8/1b6/2N5/8/4K1N1 w - - 0 1", "g1", "e2", MoveKind::Quiet),
            "Ne2"
        );
    }

    #[test]
    fn test_rank_disambiguation_and_mate() {
        assert_eq!(
            san_of("2k5/Qr6/Q7/8/8/8/8/3R4 w - - 0 1", "a6", "b7", MoveKind::Capture),
            "Q6xb7#"
        );
    }

    #[test]
    fn test_full_square_disambiguation() {
        // Queens on a1, a3 and c1 can all reach b2.
        assert_eq!(
            san_of("4k3/8/8/8/8/Q7/8/Q1Q1K3 w - - 0 1", "a1", "b2", MoveKind::Quiet),
            "Qa1b2"
        );
    }

    #[test]
    fn test_promotion_and_check_suffix() {
        assert_eq!(
            san_of("4b3/3P1P2/8/8/8/8/8/K1k5 w - - 0 1", "d7", "e8", MoveKind::QueenPromoCapture),
            "dxe8=Q"
        );
        assert_eq!(
            san_of("4b3/3P1P2/8/8/8/8/8/K1k5 w - - 0 1", "f7", "e8", MoveKind::KnightPromoCapture),
            "fxe8=N"
        );
        assert_eq!(
            san_of("8/8/8/4p3/3P4/2K5/8/7k b - - 0 1", "e5", "d4", MoveKind::Capture),
            "exd4+"
        );
    }

    #[test]
    fn test_castling() {
        let fen_str = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1";
        assert_eq!(san_of(fen_str, "e1", "g1", MoveKind::KingCastle), "O-O");
        assert_eq!(san_of(fen_str, "e1", "c1", MoveKind::QueenCastle), "O-O-O");
    }

    #[test]
    fn test_san_is_unique_per_position() {
        for fen_str in [
            fen::INITIAL_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            "4k3/8/8/8/8/Q7/8/Q1Q1K3 w - - 0 1",
            "1n2k3/P7/8/8/8/8/8/4K3 w - - 0 1",
        ] {
            let bb = fen::parse(fen_str).unwrap();
            let legal = movegen::legal_moves(&bb);
            let names: HashSet<String> = legal.iter().map(|&mv| describe(mv, &bb, &legal)).collect();
            assert_eq!(names.len(), legal.len(), "duplicate SAN in {}", fen_str);
        }
    }
}
