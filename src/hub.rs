//! The hub: session authentication, connection routing and the room table.
//!
//! One `Hub` actor runs per server. It owns a queue actor for every entry
//! of [`TIME_CONTROLS`] and the table of live rooms. Nothing else reads or
//! writes that table.
//!
//! Store writes run on the blocking thread pool, so a slow disk never
//! holds up connection routing.

use actix::prelude::*;
use actix_web::web;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{HubError, StoreError, StoreResult};
use crate::queue::QueueActor;
use crate::room::{Abandon, RoomActor};
use crate::storage::{GameRecord, Store};
use crate::types::{Player, TIME_CONTROLS, TimeControl};
use crate::ws::{ClientMove, Register, Unregister};

const ROOM_ID_LEN: usize = 16;

/// Where an authenticated connection is attached.
#[derive(Clone)]
pub enum Target {
    Queue(Addr<QueueActor>),
    Room(Addr<RoomActor>),
}

impl Target {
    pub fn register(&self, msg: Register) {
        match self {
            Target::Queue(queue) => queue.do_send(msg),
            Target::Room(room) => room.do_send(msg),
        }
    }

    pub fn unregister(&self, msg: Unregister) {
        match self {
            Target::Queue(queue) => queue.do_send(msg),
            Target::Room(room) => room.do_send(msg),
        }
    }

    pub fn room(&self) -> Option<&Addr<RoomActor>> {
        match self {
            Target::Room(room) => Some(room),
            Target::Queue(_) => None,
        }
    }

    /// Forwards a move if this is a room.
    pub fn submit(&self, msg: ClientMove) -> bool {
        match self.room() {
            Some(room) => {
                room.do_send(msg);
                true
            }
            None => false,
        }
    }
}

/// The result of a successful [`Connect`].
#[derive(Clone)]
pub struct Link {
    pub player: Player,
    pub target: Target,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Authenticates `token` and resolves `target` to a queue id or room id.
#[derive(Message)]
#[rtype(result = "Result<Link, HubError>")]
pub struct Connect {
    pub token: String,
    pub target: String,
}

/// Sent by a queue for every pair it emits. Replies with the room id.
#[derive(Message)]
#[rtype(result = "Result<String, HubError>")]
pub struct CreateRoom {
    pub white: Player,
    pub black: Player,
    pub control: TimeControl,
}

/// Sent by a queue when a paired player left before the room was ready.
/// The room is closed unplayed.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DiscardRoom {
    pub id: String,
}

/// Sent by a room when it stops, carrying the record to persist.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RoomClosed {
    pub id: String,
    pub record: GameRecord,
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct Hub {
    store: Arc<dyn Store>,
    config: ServerConfig,
    queues: HashMap<String, Addr<QueueActor>>,
    rooms: HashMap<String, Addr<RoomActor>>,
    /// Ids handed out whose record is still being written.
    pending: HashSet<String>,
}

/// Runs a store call on the blocking thread pool.
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            queues: HashMap::new(),
            rooms: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    fn fresh_room_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ROOM_ID_LEN)
                .map(char::from)
                .collect();
            if !self.rooms.contains_key(&id)
                && !self.queues.contains_key(&id)
                && !self.pending.contains(&id)
            {
                return id;
            }
        }
    }
}

impl Actor for Hub {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        for control in TIME_CONTROLS {
            let queue = QueueActor::new(control, ctx.address(), self.config).start();
            self.queues.insert(control.queue_id(), queue);
        }
        log::info!("hub started with {} queues", self.queues.len());
    }
}

impl Handler<Connect> for Hub {
    type Result = Result<Link, HubError>;

    fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self>) -> Self::Result {
        let player = self
            .store
            .resolve_session(&msg.token)
            .map_err(|e| {
                log::error!("session lookup failed: {}", e);
                HubError::Persistence(e)
            })?
            .ok_or(HubError::Unauthorized)?;

        let target = if let Some(queue) = self.queues.get(&msg.target) {
            Target::Queue(queue.clone())
        } else if let Some(room) = self.rooms.get(&msg.target) {
            Target::Room(room.clone())
        } else {
            log::debug!("player {} asked for unknown target {:?}", player.id, msg.target);
            return Err(HubError::RoomNotFound(msg.target));
        };
        Ok(Link { player, target })
    }
}

impl Handler<CreateRoom> for Hub {
    type Result = ResponseActFuture<Self, Result<String, HubError>>;

    fn handle(&mut self, msg: CreateRoom, _ctx: &mut Context<Self>) -> Self::Result {
        let id = self.fresh_room_id();
        self.pending.insert(id.clone());
        let record = GameRecord::new(
            id.as_str(),
            msg.white.id,
            msg.black.id,
            msg.control.control,
            msg.control.bonus,
        );
        let store = self.store.clone();
        let write = blocking(move || store.insert_game(&record).map(|()| record));

        Box::pin(write.into_actor(self).map(move |res, act, ctx| {
            act.pending.remove(&id);
            let record = match res {
                Ok(record) => record,
                Err(e) => {
                    log::error!("cannot persist new game {}: {}", id, e);
                    return Err(HubError::Persistence(e));
                }
            };
            let room = RoomActor::launch(record, ctx.address(), act.config);
            act.rooms.insert(id.clone(), room);
            log::info!("room {} created ({} live)", id, act.rooms.len());
            Ok(id)
        }))
    }
}

impl Handler<DiscardRoom> for Hub {
    type Result = ();

    fn handle(&mut self, msg: DiscardRoom, _ctx: &mut Context<Self>) {
        if let Some(room) = self.rooms.get(&msg.id) {
            log::info!("discarding room {}: a player left before it opened", msg.id);
            room.do_send(Abandon);
        }
    }
}

impl Handler<RoomClosed> for Hub {
    type Result = ();

    fn handle(&mut self, msg: RoomClosed, ctx: &mut Context<Self>) {
        self.rooms.remove(&msg.id);
        let RoomClosed { id, record } = msg;
        let result = record.result;
        let store = self.store.clone();
        let write = blocking(move || store.update_game(&record));

        ctx.spawn(write.into_actor(self).map(move |res, act, _ctx| match res {
            Ok(()) => log::info!(
                "room {} retired: {} ({} live)",
                id,
                result,
                act.rooms.len()
            ),
            Err(e) => log::error!("cannot persist game {}: {}", id, e),
        }));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
