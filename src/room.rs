//! Room actor: one per live game.
//!
//! A room owns the [`GameLoop`] of its game and every client watching it.
//! Joins, leaves and moves are handled one at a time; a move is forwarded
//! to the game loop and the room waits for the reply before touching its
//! mailbox again, so move results reach clients in submission order.
//!
//! The room closes when the game ends or when it has been empty for the
//! configured time-to-live. Either way the hub receives a [`RoomClosed`]
//! with the final record.

use actix::prelude::*;
use actix_web_actors::ws::{CloseCode, CloseReason};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{HubError, MoveError};
use crate::game::{Game, GameSnapshot};
use crate::game_loop::{GameLoop, GameOver, GetSnapshot, Shutdown, SubmitMove};
use crate::hub::{Hub, RoomClosed};
use crate::protocol::{Encoded, GameState, RoomInfo};
use crate::storage::GameRecord;
use crate::types::Color;
use crate::ws::{ClientMove, Register, Subscribers, Unregister};

/// Which players are connected. Spectators never change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Empty,
    WhiteOnly,
    BlackOnly,
    Both,
}

impl RoomState {
    pub fn join(self, color: Color) -> Self {
        match (self, color) {
            (RoomState::Empty, Color::White) => RoomState::WhiteOnly,
            (RoomState::Empty, Color::Black) => RoomState::BlackOnly,
            (RoomState::WhiteOnly, Color::Black) | (RoomState::BlackOnly, Color::White) => {
                RoomState::Both
            }
            (state, _) => state,
        }
    }

    pub fn leave(self, color: Color) -> Self {
        match (self, color) {
            (RoomState::Both, Color::White) => RoomState::BlackOnly,
            (RoomState::Both, Color::Black) => RoomState::WhiteOnly,
            (RoomState::WhiteOnly, Color::White) | (RoomState::BlackOnly, Color::Black) => {
                RoomState::Empty
            }
            (state, _) => state,
        }
    }
}

/// Closes the room without a result.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Abandon;

pub struct RoomActor {
    id: String,
    record: GameRecord,
    game_loop: Addr<GameLoop>,
    hub: Addr<Hub>,
    clients: Subscribers,
    state: RoomState,
    spectators: u32,
    ttl: u32,
    config: ServerConfig,
    snapshot: GameSnapshot,
}

impl RoomActor {
    /// Starts a room and its game loop for a freshly persisted record.
    pub fn launch(record: GameRecord, hub: Addr<Hub>, config: ServerConfig) -> Addr<RoomActor> {
        RoomActor::create(move |ctx| {
            let game = Game::new(record.time_control, record.time_bonus);
            let snapshot = game.snapshot();
            let game_loop = GameLoop::new(game, ctx.address().recipient()).start();
            RoomActor {
                id: record.id.clone(),
                record,
                game_loop,
                hub,
                clients: Subscribers::default(),
                state: RoomState::Empty,
                spectators: 0,
                ttl: config.room_ttl,
                config,
                snapshot,
            }
        })
    }

    fn color_of(&self, player_id: &str) -> Option<Color> {
        if player_id == self.record.white_id {
            Some(Color::White)
        } else if player_id == self.record.black_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    fn room_info(&self) -> RoomInfo {
        RoomInfo {
            w: self.record.white_id.clone(),
            b: self.record.black_id.clone(),
            t: self.ttl,
            v: self.spectators,
        }
    }

    fn broadcast_room_info(&mut self) {
        let event = Encoded::room_info(&self.room_info());
        self.clients.broadcast(&event);
    }

    fn broadcast_state(&mut self) {
        let event = Encoded::game_state(&GameState::from(&self.snapshot));
        self.clients.broadcast(&event);
    }
}

impl Actor for RoomActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        log::info!(
            "room {} opened: {} (white) vs {} (black), {}+{}",
            self.id,
            self.record.white_id,
            self.record.black_id,
            self.record.time_control,
            self.record.time_bonus
        );
        ctx.run_interval(Duration::from_secs(1), |act, ctx| {
            if act.state != RoomState::Empty {
                return;
            }
            act.ttl = act.ttl.saturating_sub(1);
            if act.ttl == 0 {
                log::info!("room {} expired with no players", act.id);
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        self.game_loop.do_send(Shutdown);
        self.record.sync(&self.snapshot);
        log::info!("room {} closed: {}", self.id, self.record.result);
        self.hub.do_send(RoomClosed {
            id: self.id.clone(),
            record: self.record.clone(),
        });
    }
}

impl Handler<Register> for RoomActor {
    type Result = ();

    fn handle(&mut self, msg: Register, ctx: &mut Context<Self>) {
        let Register { player, conn, client } = msg;
        if self.clients.contains(&player.id) {
            log::warn!("player {} is already in room {}", player.id, self.id);
            Subscribers::refuse(&client, &HubError::Conflict(player.id));
            return;
        }

        match self.color_of(&player.id) {
            Some(color) => {
                self.state = self.state.join(color);
                self.ttl = self.config.room_ttl;
            }
            None => self.spectators += 1,
        }
        self.clients.insert(player.id.clone(), conn, client);
        log::debug!("player {} joined room {} ({:?})", player.id, self.id, self.state);
        self.broadcast_room_info();

        let player_id = player.id;
        ctx.wait(
            self.game_loop
                .send(GetSnapshot)
                .into_actor(self)
                .map(move |res, act, _ctx| {
                    if let Ok(snapshot) = res {
                        act.snapshot = snapshot;
                    }
                    let event = Encoded::game_state(&GameState::from(&act.snapshot));
                    act.clients.send(&player_id, &event);
                }),
        );
    }
}

impl Handler<Unregister> for RoomActor {
    type Result = ();

    fn handle(&mut self, msg: Unregister, _ctx: &mut Context<Self>) {
        if !self.clients.remove(&msg.player_id, msg.conn) {
            return;
        }
        match self.color_of(&msg.player_id) {
            Some(color) => self.state = self.state.leave(color),
            None => self.spectators = self.spectators.saturating_sub(1),
        }
        log::debug!("player {} left room {} ({:?})", msg.player_id, self.id, self.state);
        self.broadcast_room_info();
    }
}

impl Handler<ClientMove> for RoomActor {
    type Result = ();

    fn handle(&mut self, msg: ClientMove, ctx: &mut Context<Self>) {
        let Some(color) = self.color_of(&msg.player_id) else {
            log::debug!("spectator {} tried to move in room {}", msg.player_id, self.id);
            return;
        };
        let player_id = msg.player_id;
        ctx.wait(
            self.game_loop
                .send(SubmitMove { color, mv: msg.mv })
                .into_actor(self)
                .map(move |res, act, ctx| match res {
                    Ok(Ok(snapshot)) => {
                        act.snapshot = snapshot;
                        // The final state goes out with GameOver.
                        if !act.snapshot.result.is_terminal() {
                            act.broadcast_state();
                        }
                    }
                    Ok(Err(MoveError::IllegalMove)) => {
                        act.clients.send(&player_id, &Encoded::error("illegal move"));
                    }
                    Ok(Err(e)) => {
                        log::debug!("move by {} in room {} ignored: {}", player_id, act.id, e);
                    }
                    Err(e) => {
                        log::error!("room {}: game loop unavailable: {}", act.id, e);
                        ctx.stop();
                    }
                }),
        );
    }
}

impl Handler<GameOver> for RoomActor {
    type Result = ();

    fn handle(&mut self, msg: GameOver, ctx: &mut Context<Self>) {
        self.snapshot = msg.0;
        self.broadcast_state();
        self.clients.close_all(CloseReason {
            code: CloseCode::Normal,
            description: Some(format!("game over: {}", self.snapshot.result)),
        });
        ctx.stop();
    }
}

impl Handler<Abandon> for RoomActor {
    type Result = ();

    fn handle(&mut self, _msg: Abandon, ctx: &mut Context<Self>) {
        log::info!("room {} abandoned", self.id);
        self.clients.close_all(CloseReason {
            code: CloseCode::Normal,
            description: Some("room abandoned".into()),
        });
        ctx.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
