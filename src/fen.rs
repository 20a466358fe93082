//! Forsyth-Edwards Notation codec for [`Bitboard`].
//!
//! Only the placement field is mandatory when parsing; the remaining five
//! fields fall back to white to move, no castling, no en passant, halfmove
//! 0 and fullmove 1 when missing or malformed.

use crate::bitboard::Bitboard;
use crate::error::{FenError, FenResult};
use crate::types::*;

/// FEN of the standard initial position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Serializes a position to six-field FEN.
pub fn serialize(bb: &Bitboard) -> String {
    let mut out = String::with_capacity(90);

    for rank in (0..8u8).rev() {
        let mut empty = 0;
        for file in 0..8u8 {
            match bb.piece_at(Square::new(file, rank)) {
                Some(piece) => {
                    if empty > 0 {
                        out.push((b'0' + empty) as char);
                        empty = 0;
                    }
                    out.push(piece.to_fen_char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            out.push((b'0' + empty) as char);
        }
        if rank > 0 {
            out.push('/');
        }
    }

    out.push(' ');
    out.push(match bb.active_color {
        Color::White => 'w',
        Color::Black => 'b',
    });
    out.push(' ');
    out.push_str(&bb.castling.to_fen());
    out.push(' ');
    match bb.en_passant {
        Some(sq) => out.push_str(&sq.to_algebraic()),
        None => out.push('-'),
    }
    out.push_str(&format!(" {} {}", bb.halfmove, bb.fullmove));
    out
}

/// Parses a FEN string.
pub fn parse(fen: &str) -> FenResult<Bitboard> {
    let mut fields = fen.split_whitespace();
    let placement = fields.next().ok_or(FenError::Empty)?;

    let mut bb = Bitboard::empty();
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::RankCount(ranks.len()));
    }

    for (i, row) in ranks.iter().enumerate() {
        let rank = 7 - i as u8;
        let mut file: usize = 0;
        for c in row.chars() {
            if let Some(skip) = c.to_digit(10) {
                file += skip as usize;
                continue;
            }
            let piece = Piece::from_fen_char(c).ok_or(FenError::PieceLetter(c))?;
            if file >= 8 {
                return Err(FenError::RankWidth {
                    rank: rank as usize + 1,
                    files: file + 1,
                });
            }
            bb.pieces[piece.index()] |= Square::new(file as u8, rank).bit();
            file += 1;
        }
        if file != 8 {
            return Err(FenError::RankWidth {
                rank: rank as usize + 1,
                files: file,
            });
        }
    }

    bb.active_color = match fields.next() {
        Some("b") => Color::Black,
        _ => Color::White,
    };
    bb.castling = fields
        .next()
        .map(CastlingRights::from_fen)
        .unwrap_or(CastlingRights::NONE);
    // A target square only exists behind a pawn that just advanced two
    // ranks, so it sits on rank 6 with White to move and rank 3 with Black.
    let ep_rank = match bb.active_color {
        Color::White => 5,
        Color::Black => 2,
    };
    bb.en_passant = fields
        .next()
        .and_then(Square::from_algebraic)
        .filter(|sq| sq.rank() == ep_rank);
    bb.halfmove = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    bb.fullmove = fields
        .next()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1);

    Ok(bb)
}

/// The first four fields of a FEN: placement, side to move, castling and
/// en passant. Two positions with equal keys count as repetitions.
pub fn position_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_position_round_trip() {
        let bb = parse(INITIAL_FEN).unwrap();
        assert_eq!(bb, Bitboard::starting_position());
        assert_eq!(serialize(&bb), INITIAL_FEN);
    }

    #[test]
    fn test_round_trip_is_canonical() {
        for fen in [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "2kr1b1r/ppp1qppp/2np1n2/1B2p3/P3P1b1/2NP1N2/1PP2PPP/R1BQ1RK1 w - - 5 7",
        ] {
            let parsed = parse(fen).unwrap();
            assert_eq!(serialize(&parsed), fen);
            assert_eq!(parse(&serialize(&parsed)).unwrap(), parsed);
        }
    }

    #[test]
    fn test_missing_fields_default() {
        let bb = parse("4k3/8/8/8/8/8/8/4K3").unwrap();
        assert_eq!(bb.active_color, Color::White);
        assert!(bb.castling.is_empty());
        assert_eq!(bb.en_passant, None);
        assert_eq!(bb.halfmove, 0);
        assert_eq!(bb.fullmove, 1);
        assert_eq!(serialize(&bb), "4k3/8/8/8/8/8/8/4K3 w - - 0 1");

        let bb = parse("4k3/8/8/8/8/8/8/4K3 b - x9 abc").unwrap();
        assert_eq!(bb.active_color, Color::Black);
        assert_eq!(bb.en_passant, None);
        assert_eq!(bb.halfmove, 0);
    }

    #[test]
    fn test_en_passant_square_must_match_side_to_move() {
        let bb = parse("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 2").unwrap();
        assert_eq!(bb.en_passant, Square::from_algebraic("d6"));

        let bb = parse("4k3/8/8/8/3Pp3/8/8/4K3 b - d3 0 1").unwrap();
        assert_eq!(bb.en_passant, Square::from_algebraic("d3"));

        for fen in [
            "4k3/8/8/3pP3/8/8/8/4K3 w - e4 0 2",
            "4k3/8/8/3pP3/8/8/8/4K3 w - a1 0 2",
            "4k3/8/8/3pP3/8/8/8/4K3 w - d3 0 2",
            "4k3/8/8/8/3Pp3/8/8/4K3 b - d6 0 1",
        ] {
            let bb = parse(fen).unwrap();
            assert_eq!(bb.en_passant, None, "{fen}");
        }
    }

    #[test]
    fn test_rejects_bad_placement() {
        assert_eq!(parse(""), Err(FenError::Empty));
        assert_eq!(parse("8/8/8 w - - 0 1"), Err(FenError::RankCount(3)));
        assert_eq!(
            parse("9/8/8/8/8/8/8/8 w - - 0 1"),
            Err(FenError::RankWidth { rank: 8, files: 9 })
        );
        assert_eq!(
            parse("8/8/8/8/8/8/8/7 w - - 0 1"),
            Err(FenError::RankWidth { rank: 1, files: 7 })
        );
        assert_eq!(
            parse("8/8/8/8/8/8/8/7x w - - 0 1"),
            Err(FenError::PieceLetter('x'))
        );
    }

    #[test]
    fn test_position_key_drops_counters() {
        assert_eq!(
            position_key("1kr5/Bb3R2/4p3/4Pn1p/R7/2P3p1/1KP4r/8 w - - 4 40"),
            "1kr5/Bb3R2/4p3/4Pn1p/R7/2P3p1/1KP4r/8 w - -"
        );
    }
}
