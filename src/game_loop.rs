//! Per-game run loop.
//!
//! A `GameLoop` actor is the single writer of one [`Game`]. Moves, clock
//! ticks, external endings and snapshot requests all arrive through its
//! mailbox and are handled one at a time. When the game reaches a result
//! the loop cancels its clock, reports [`GameOver`] to its room and stops.

use actix::prelude::*;
use std::time::Duration;

use crate::error::MoveError;
use crate::game::{EndReason, Game, GameSnapshot};
use crate::types::{Color, Move};

/// Clock resolution.
const TICK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A move from the player owning `color`. Replies with the post-move
/// snapshot so the caller can broadcast it.
#[derive(Message)]
#[rtype(result = "Result<GameSnapshot, MoveError>")]
pub struct SubmitMove {
    pub color: Color,
    pub mv: Move,
}

/// Ends the game from outside the move flow.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EndGame(pub EndReason);

/// Requests the current state.
#[derive(Message)]
#[rtype(result = "GameSnapshot")]
pub struct GetSnapshot;

/// Stops the loop without touching the game.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

/// Sent to the owning room exactly once, with the final state.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct GameOver(pub GameSnapshot);

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct GameLoop {
    game: Game,
    room: Recipient<GameOver>,
    ticker: Option<SpawnHandle>,
}

impl GameLoop {
    pub fn new(game: Game, room: Recipient<GameOver>) -> Self {
        Self {
            game,
            room,
            ticker: None,
        }
    }

    /// Reports the result if the game just ended. Returns `true` if it did.
    fn check_over(&mut self, ctx: &mut Context<Self>) -> bool {
        if !self.game.is_over() {
            return false;
        }
        log::info!(
            "game over: {} (winner {:?}) after {} plies",
            self.game.result(),
            self.game.winner(),
            self.game.moves().len()
        );
        self.room.do_send(GameOver(self.game.snapshot()));
        self.halt(ctx);
        true
    }

    fn halt(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.ticker.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}

impl Actor for GameLoop {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        if self.game.is_timed() {
            self.ticker = Some(ctx.run_interval(TICK, |act, ctx| {
                if act.game.tick() {
                    act.check_over(ctx);
                }
            }));
        }
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        log::debug!("game loop stopped ({})", self.game.result());
    }
}

impl Handler<SubmitMove> for GameLoop {
    type Result = Result<GameSnapshot, MoveError>;

    fn handle(&mut self, msg: SubmitMove, ctx: &mut Context<Self>) -> Self::Result {
        let san = self.game.play_as(msg.color, msg.mv)?.san.clone();
        log::debug!("{:?} played {} ({})", msg.color, san, msg.mv);
        let snapshot = self.game.snapshot();
        self.check_over(ctx);
        Ok(snapshot)
    }
}

impl Handler<EndGame> for GameLoop {
    type Result = ();

    fn handle(&mut self, msg: EndGame, ctx: &mut Context<Self>) {
        self.game.end(msg.0);
        self.check_over(ctx);
    }
}

impl Handler<GetSnapshot> for GameLoop {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.game.snapshot())
    }
}

impl Handler<Shutdown> for GameLoop {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self>) {
        self.halt(ctx);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameResult, MoveKind, Square, Winner};
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RoomRecorder(Arc<Mutex<Vec<GameSnapshot>>>);

    impl Actor for RoomRecorder {
        type Context = Context<Self>;
    }

    impl Handler<GameOver> for RoomRecorder {
        type Result = ();

        fn handle(&mut self, msg: GameOver, _ctx: &mut Context<Self>) {
            self.0.lock().unwrap().push(msg.0);
        }
    }

    fn mv(from: &str, to: &str, kind: MoveKind) -> Move {
        Move::new(
            Square::from_algebraic(from).unwrap(),
            Square::from_algebraic(to).unwrap(),
            kind,
        )
    }

    fn spawn(game: Game) -> (Addr<GameLoop>, RoomRecorder) {
        let peer = RoomRecorder::default();
        let room = peer.clone().start();
        (GameLoop::new(game, room.recipient()).start(), peer)
    }

    #[actix::test]
    async fn test_moves_are_validated_in_order() {
        let (game_loop, peer) = spawn(Game::new(60, 1));

        let snapshot = game_loop
            .send(SubmitMove {
                color: Color::White,
                mv: mv("e2", "e4", MoveKind::DoublePawnPush),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.moves.len(), 1);
        assert_eq!(snapshot.active_color, Color::Black);

        let again = game_loop
            .send(SubmitMove {
                color: Color::White,
                mv: mv("d2", "d4", MoveKind::DoublePawnPush),
            })
            .await
            .unwrap();
        assert_eq!(again, Err(MoveError::NotYourTurn));

        let illegal = game_loop
            .send(SubmitMove {
                color: Color::Black,
                mv: mv("e7", "e4", MoveKind::Quiet),
            })
            .await
            .unwrap();
        assert_eq!(illegal, Err(MoveError::IllegalMove));

        let current = game_loop.send(GetSnapshot).await.unwrap();
        assert_eq!(current.moves.len(), 1);
        assert!(peer.0.lock().unwrap().is_empty());
    }

    #[actix::test]
    async fn test_checkmate_reports_and_stops() {
        let (game_loop, peer) = spawn(Game::new(0, 0));
        for (color, m) in [
            (Color::White, mv("f2", "f3", MoveKind::Quiet)),
            (Color::Black, mv("e7", "e5", MoveKind::DoublePawnPush)),
            (Color::White, mv("g2", "g4", MoveKind::DoublePawnPush)),
            (Color::Black, mv("d8", "h4", MoveKind::Quiet)),
        ] {
            game_loop.send(SubmitMove { color, mv: m }).await.unwrap().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reports = peer.0.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, GameResult::Checkmate);
        assert_eq!(reports[0].winner, Winner::Black);
        assert!(game_loop.send(GetSnapshot).await.is_err());
    }

    #[actix::test]
    async fn test_resignation_through_end_game() {
        let (game_loop, peer) = spawn(Game::new(60, 0));
        game_loop.do_send(EndGame(EndReason::Resignation(Color::Black)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reports = peer.0.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, GameResult::Resignation);
        assert_eq!(reports[0].winner, Winner::White);
        assert!(!game_loop.connected());
    }

    #[actix::test]
    async fn test_clock_flag_falls() {
        let (game_loop, peer) = spawn(Game::new(1, 0));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let reports = peer.0.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, GameResult::Timeout);
        assert_eq!(reports[0].winner, Winner::Black);
        assert_eq!(reports[0].white_time, 0);
        assert!(!game_loop.connected());
    }

    #[actix::test]
    async fn test_untimed_game_has_no_clock() {
        let (game_loop, peer) = spawn(Game::new(0, 0));
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let snapshot = game_loop.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.result, GameResult::Unknown);
        assert!(peer.0.lock().unwrap().is_empty());

        game_loop.do_send(Shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!game_loop.connected());
    }
}
