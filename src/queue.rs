//! Queue actor: one per time control.
//!
//! Connected clients wait in a rating-ordered [`Pool`]. Every
//! `pairing_interval` the queue sweeps the pool, assigns colours at random
//! and asks the hub for a room. Both players are then redirected to it.

use actix::prelude::*;
use rand::Rng;

use crate::config::ServerConfig;
use crate::error::HubError;
use crate::hub::{CreateRoom, DiscardRoom, Hub};
use crate::matchmaking::Pool;
use crate::protocol::Encoded;
use crate::types::{Player, TimeControl};
use crate::ws::{Register, Subscribers, Unregister};

pub struct QueueActor {
    control: TimeControl,
    pool: Pool,
    clients: Subscribers,
    hub: Addr<Hub>,
    config: ServerConfig,
}

impl QueueActor {
    pub fn new(control: TimeControl, hub: Addr<Hub>, config: ServerConfig) -> Self {
        Self {
            control,
            pool: Pool::new(config.tolerance),
            clients: Subscribers::default(),
            hub,
            config,
        }
    }

    fn broadcast_counter(&mut self) {
        let event = Encoded::clients_counter(self.clients.len());
        self.clients.broadcast(&event);
    }

    fn pair(&mut self, ctx: &mut Context<Self>) {
        let pairs = self.pool.sweep();
        if pairs.is_empty() {
            return;
        }
        let mut rng = rand::rng();
        for (low, high) in pairs {
            let (white, black) = if rng.random_bool(0.5) {
                (low, high)
            } else {
                (high, low)
            };
            log::info!(
                "queue {}: paired {} ({}) with {} ({})",
                self.control,
                white.id,
                white.rating,
                black.id,
                black.rating
            );
            let request = CreateRoom {
                white: white.clone(),
                black: black.clone(),
                control: self.control,
            };
            ctx.spawn(
                self.hub
                    .send(request)
                    .into_actor(self)
                    .map(move |res, act, _ctx| match res {
                        Ok(Ok(room_id)) => act.seat(room_id, white, black),
                        Ok(Err(e)) => act.requeue(white, black, &e.to_string()),
                        Err(e) => {
                            log::error!("queue {}: hub unavailable: {}", act.control, e);
                            act.requeue(white, black, "server unavailable");
                        }
                    }),
            );
        }
    }

    /// Redirects both players to their new room. If either left while the
    /// room was being created, the room is discarded and whoever is still
    /// here goes back into the pool.
    fn seat(&mut self, room_id: String, white: Player, black: Player) {
        if self.clients.contains(&white.id) && self.clients.contains(&black.id) {
            let event = Encoded::redirect(&room_id);
            self.clients.send(&white.id, &event);
            self.clients.send(&black.id, &event);
            return;
        }
        self.hub.do_send(DiscardRoom { id: room_id });
        self.requeue(white, black, "opponent left before the game started");
    }

    /// Puts the players that are still connected back in the pool.
    fn requeue(&mut self, white: Player, black: Player, reason: &str) {
        log::warn!(
            "queue {}: no room for {} and {}: {}",
            self.control,
            white.id,
            black.id,
            reason
        );
        let event = Encoded::error(reason);
        for player in [white, black] {
            if self.clients.contains(&player.id) {
                self.clients.send(&player.id, &event);
                self.pool.join(&player);
            }
        }
    }
}

impl Actor for QueueActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        log::debug!("queue {} ({}) started", self.control.queue_id(), self.control);
        ctx.run_interval(self.config.pairing_interval, |act, ctx| act.pair(ctx));
    }
}

impl Handler<Register> for QueueActor {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Context<Self>) {
        let Register { player, conn, client } = msg;
        if self.clients.contains(&player.id) {
            log::warn!("player {} is already in queue {}", player.id, self.control);
            Subscribers::refuse(&client, &HubError::Conflict(player.id));
            return;
        }
        self.pool.join(&player);
        log::info!(
            "player {} ({}) joined queue {}",
            player.id,
            player.rating,
            self.control
        );
        self.clients.insert(player.id, conn, client);
        self.broadcast_counter();
    }
}

impl Handler<Unregister> for QueueActor {
    type Result = ();

    fn handle(&mut self, msg: Unregister, _ctx: &mut Context<Self>) {
        if !self.clients.remove(&msg.player_id, msg.conn) {
            return;
        }
        self.pool.leave(&msg.player_id);
        log::info!("player {} left queue {}", msg.player_id, self.control);
        self.broadcast_counter();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::hub::Connect;
    use crate::protocol::Action;
    use crate::storage::{GameRecord, MemoryStore, Store};
    use crate::types::TIME_CONTROLS;
    use crate::ws::tests::TestClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> ServerConfig {
        ServerConfig {
            pairing_interval: Duration::from_millis(100),
            ..ServerConfig::default()
        }
    }

    fn start_queue(store: Arc<dyn Store>) -> Addr<QueueActor> {
        let config = fast_config();
        let hub = Hub::new(store, config).start();
        QueueActor::new(TIME_CONTROLS[3], hub, config).start()
    }

    fn counter(peer: &TestClient) -> Option<usize> {
        let event = peer.last(Action::ClientsCounter)?;
        serde_json::from_str(&event.payload).ok()
    }

    #[actix::test]
    async fn test_pairs_close_ratings_into_one_room() {
        let store = Arc::new(MemoryStore::new());
        let queue = start_queue(store.clone());
        let a = TestClient::join(&queue, "a", 1500.0);
        let b = TestClient::join(&queue, "b", 1530.0);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let room_a: String =
            serde_json::from_str(&a.last(Action::Redirect).unwrap().payload).unwrap();
        let room_b: String =
            serde_json::from_str(&b.last(Action::Redirect).unwrap().payload).unwrap();
        assert_eq!(room_a, room_b);
        assert_eq!(room_a.len(), 16);

        let record = store.load_game(&room_a).unwrap().unwrap();
        let mut ids = [record.white_id.as_str(), record.black_id.as_str()];
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(record.time_control, 180);
        assert_eq!(record.time_bonus, 2);
    }

    #[actix::test]
    async fn test_distant_ratings_wait() {
        let queue = start_queue(Arc::new(MemoryStore::new()));
        let a = TestClient::join(&queue, "a", 1000.0);
        let b = TestClient::join(&queue, "b", 2000.0);
        // Two sweeps widen each ticket to 150 at most.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(a.last(Action::Redirect).is_none());
        assert!(b.last(Action::Redirect).is_none());
        assert_eq!(counter(&a), Some(2));
    }

    #[actix::test]
    async fn test_counter_follows_membership() {
        let queue = start_queue(Arc::new(MemoryStore::new()));
        let a = TestClient::join(&queue, "a", 1000.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter(&a), Some(1));

        let b = TestClient::join(&queue, "b", 2500.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter(&a), Some(2));

        queue.do_send(b.unregister());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter(&a), Some(1));
    }

    #[actix::test]
    async fn test_second_connection_is_refused() {
        let queue = start_queue(Arc::new(MemoryStore::new()));
        let first = TestClient::join(&queue, "a", 1500.0);
        let second = TestClient::join(&queue, "a", 1500.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(second.close_code(), Some(4009));
        assert!(second.last(Action::Error).is_some());

        // The refused connection must not detach the first one.
        queue.do_send(second.unregister());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter(&first), Some(1));
        assert_eq!(first.close_code(), None);
    }

    struct BrokenStore;

    impl Store for BrokenStore {
        fn resolve_session(&self, _token: &str) -> StoreResult<Option<Player>> {
            Ok(None)
        }
        fn insert_game(&self, _record: &GameRecord) -> StoreResult<()> {
            Err(StoreError::Corrupt("disk full".into()))
        }
        fn update_game(&self, _record: &GameRecord) -> StoreResult<()> {
            Ok(())
        }
        fn load_game(&self, _id: &str) -> StoreResult<Option<GameRecord>> {
            Ok(None)
        }
        fn list_games(&self) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[actix::test]
    async fn test_failed_room_creation_requeues() {
        let queue = start_queue(Arc::new(BrokenStore));
        let a = TestClient::join(&queue, "a", 1500.0);
        let b = TestClient::join(&queue, "b", 1500.0);
        tokio::time::sleep(Duration::from_millis(350)).await;

        for peer in [&a, &b] {
            assert!(peer.last(Action::Redirect).is_none());
            let errors = peer
                .events()
                .iter()
                .filter(|e| e.action == Action::Error)
                .count();
            // Requeued and paired again on a later sweep.
            assert!(errors >= 2, "expected repeated errors, got {errors}");
            assert_eq!(peer.close_code(), None);
        }
    }

    /// Holds every insert for `delay` so pairing replies arrive late.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl Store for SlowStore {
        fn resolve_session(&self, token: &str) -> StoreResult<Option<Player>> {
            self.inner.resolve_session(token)
        }
        fn insert_game(&self, record: &GameRecord) -> StoreResult<()> {
            std::thread::sleep(self.delay);
            self.inner.insert_game(record)
        }
        fn update_game(&self, record: &GameRecord) -> StoreResult<()> {
            self.inner.update_game(record)
        }
        fn load_game(&self, id: &str) -> StoreResult<Option<GameRecord>> {
            self.inner.load_game(id)
        }
        fn list_games(&self) -> StoreResult<Vec<String>> {
            self.inner.list_games()
        }
    }

    #[actix::test]
    async fn test_player_leaving_during_room_creation() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        store.inner.add_session("tok-a", Player::new("a", 1500.0));
        let config = fast_config();
        let hub = Hub::new(store.clone(), config).start();
        let queue = QueueActor::new(TIME_CONTROLS[3], hub.clone(), config).start();

        let a = TestClient::join(&queue, "a", 1500.0);
        let b = TestClient::join(&queue, "b", 1500.0);
        // Paired on the first sweep; b leaves while the record is written.
        tokio::time::sleep(Duration::from_millis(150)).await;
        queue.do_send(b.unregister());
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert!(a.last(Action::Redirect).is_none());
        assert!(b.last(Action::Redirect).is_none());
        assert!(a.last(Action::Error).is_some());

        let ids = store.list_games().unwrap();
        assert_eq!(ids.len(), 1);
        let err = hub
            .send(Connect {
                token: "tok-a".into(),
                target: ids[0].clone(),
            })
            .await
            .unwrap()
            .err()
            .unwrap();
        assert!(matches!(err, HubError::RoomNotFound(_)));

        // a is back in the pool and pairs with the next arrival.
        let c = TestClient::join(&queue, "c", 1500.0);
        tokio::time::sleep(Duration::from_millis(700)).await;
        let room_a = a.last(Action::Redirect).unwrap();
        assert_eq!(Some(room_a), c.last(Action::Redirect));
    }
}
