//! WebSocket client sessions.
//!
//! Every connection is a [`ClientSession`] actor. Before the upgrade the
//! HTTP handler asks the hub to authenticate the session token and resolve
//! the requested id to a queue or a room; the session then registers with
//! that target and relays frames in both directions.
//!
//! ## Frames
//!
//! Text frames carry `{"a": <action>, "p": <payload>}`. Binary frames carry
//! the JSON payload followed by one action byte. A session answers in the
//! format the client last used.
//!
//! ## Liveness
//!
//! The session sends a transport ping and an application `Ping` every
//! `ping_period`. The `Ping` payload is the last measured round trip in
//! milliseconds. A client that sends nothing for `pong_wait` is dropped.
//! Undecodable frames close the socket with 1002, oversized ones with 1009.
//!
//! ## Back-pressure
//!
//! Outbound events travel through the session mailbox, bounded to
//! `send_buffer`. Owners deliver with `try_send`; when a client falls
//! behind, events for it are dropped and counted rather than queued.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws::{self, CloseCode, CloseReason};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::HubError;
use crate::hub::{Connect, Link};
use crate::protocol::{self, ClientMessage, Encoded};
use crate::types::{Move, Player};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Something for a client session to write to its socket.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub enum Outbound {
    Event(Encoded),
    Close(Option<CloseReason>),
}

/// Attaches a client to a queue or room.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub player: Player,
    /// Distinguishes two connections of the same player.
    pub conn: Uuid,
    pub client: Recipient<Outbound>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unregister {
    pub player_id: String,
    pub conn: Uuid,
}

/// A move submitted by a client connected to a room.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ClientMove {
    pub player_id: String,
    pub mv: Move,
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

struct Subscriber {
    conn: Uuid,
    client: Recipient<Outbound>,
}

/// The clients attached to a queue or room, keyed by player id.
#[derive(Default)]
pub struct Subscribers {
    entries: HashMap<String, Subscriber>,
    dropped: u64,
}

impl Subscribers {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.entries.contains_key(player_id)
    }

    pub fn insert(&mut self, player_id: String, conn: Uuid, client: Recipient<Outbound>) {
        self.entries.insert(player_id, Subscriber { conn, client });
    }

    /// Removes the player only if `conn` is the connection on record, so a
    /// refused duplicate cannot detach the first connection.
    pub fn remove(&mut self, player_id: &str, conn: Uuid) -> bool {
        match self.entries.get(player_id) {
            Some(sub) if sub.conn == conn => {
                self.entries.remove(player_id);
                true
            }
            _ => false,
        }
    }

    /// Events dropped because a client's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn send(&mut self, player_id: &str, event: &Encoded) {
        if let Some(sub) = self.entries.get(player_id) {
            Self::deliver(player_id, sub, event, &mut self.dropped);
        }
    }

    pub fn broadcast(&mut self, event: &Encoded) {
        for (player_id, sub) in &self.entries {
            Self::deliver(player_id, sub, event, &mut self.dropped);
        }
    }

    /// Closes every connection. Close frames bypass the buffer limit.
    pub fn close_all(&mut self, reason: CloseReason) {
        for sub in self.entries.values() {
            sub.client.do_send(Outbound::Close(Some(reason.clone())));
        }
    }

    /// Rejects a client that was never inserted: an `Error` event, then a
    /// close frame carrying the error's code.
    pub fn refuse(client: &Recipient<Outbound>, err: &HubError) {
        client.do_send(Outbound::Event(Encoded::error(&err.to_string())));
        client.do_send(Outbound::Close(Some(close_reason(err))));
    }

    fn deliver(player_id: &str, sub: &Subscriber, event: &Encoded, dropped: &mut u64) {
        match sub.client.try_send(Outbound::Event(event.clone())) {
            Ok(()) => {}
            Err(SendError::Full(_)) => {
                *dropped += 1;
                log::warn!(
                    "send buffer full for {}, dropped {:?} event",
                    player_id,
                    event.action
                );
            }
            Err(SendError::Closed(_)) => {
                log::debug!("client {} already gone", player_id);
            }
        }
    }
}

fn close_reason(err: &HubError) -> CloseReason {
    CloseReason {
        code: CloseCode::Other(err.close_code()),
        description: Some(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

pub struct ClientSession {
    conn: Uuid,
    link: Result<Link, HubError>,
    config: ServerConfig,
    last_heartbeat: Instant,
    /// Set while an application ping is unanswered.
    ping_sent: Option<Instant>,
    rtt_ms: u64,
    binary: bool,
}

impl ClientSession {
    pub fn new(link: Result<Link, HubError>, config: ServerConfig) -> Self {
        Self {
            conn: Uuid::new_v4(),
            link,
            config,
            last_heartbeat: Instant::now(),
            ping_sent: None,
            rtt_ms: 0,
            binary: false,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.config.ping_period(), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.config.pong_wait {
                log::warn!("session {} heartbeat timeout, disconnecting", act.conn);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Away,
                    description: Some("heartbeat timeout".into()),
                }));
                ctx.stop();
                return;
            }
            ctx.ping(b"");
            if act.ping_sent.is_none() {
                act.ping_sent = Some(Instant::now());
                act.write(&Encoded::ping(act.rtt_ms), ctx);
            }
        });
    }

    fn write(&self, event: &Encoded, ctx: &mut ws::WebsocketContext<Self>) {
        if self.binary {
            ctx.binary(event.to_binary());
        } else {
            ctx.text(event.to_text());
        }
    }

    fn dispatch(
        &mut self,
        decoded: Result<ClientMessage, crate::error::ProtocolError>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("session {}: bad frame: {}", self.conn, e);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Protocol,
                    description: Some(e.to_string()),
                }));
                ctx.stop();
                return;
            }
        };

        match msg {
            ClientMessage::Pong => {
                if let Some(sent) = self.ping_sent.take() {
                    self.rtt_ms = sent.elapsed().as_millis() as u64;
                }
            }
            ClientMessage::MakeMove(mv) => {
                let Ok(link) = &self.link else { return };
                let submitted = link.target.submit(ClientMove {
                    player_id: link.player.id.clone(),
                    mv,
                });
                if !submitted {
                    self.write(&Encoded::error("not in a room"), ctx);
                }
            }
        }
    }
}

impl Actor for ClientSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(self.config.send_buffer);
        match &self.link {
            Ok(link) => {
                log::info!("session {} started for {}", self.conn, link.player.id);
                self.start_heartbeat(ctx);
                link.target.register(Register {
                    player: link.player.clone(),
                    conn: self.conn,
                    client: ctx.address().recipient(),
                });
            }
            Err(e) => {
                log::info!("session {} refused: {}", self.conn, e);
                self.write(&Encoded::error(&e.to_string()), ctx);
                ctx.close(Some(close_reason(e)));
                ctx.stop();
            }
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Ok(link) = &self.link {
            log::info!("session {} stopped", self.conn);
            link.target.unregister(Unregister {
                player_id: link.player.id.clone(),
                conn: self.conn,
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.binary = false;
                self.dispatch(protocol::decode_text(&text), ctx);
            }
            Ok(ws::Message::Binary(bytes)) => {
                self.binary = true;
                self.dispatch(protocol::decode_binary(&bytes), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                log::info!("session {} closed: {:?}", self.conn, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {}
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                log::error!("session {} protocol error: {}", self.conn, e);
                let code = match e {
                    ws::ProtocolError::Overflow => CloseCode::Size,
                    _ => CloseCode::Protocol,
                };
                ctx.close(Some(CloseReason {
                    code,
                    description: Some(e.to_string()),
                }));
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for ClientSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Event(event) => self.write(&event, ctx),
            Outbound::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP → WebSocket upgrade handler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Queue id (`"1"`..`"9"`) or room id.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub token: String,
}

/// `GET /ws?id=<queue or room>&token=<session>`.
///
/// An unknown token is rejected with 401 before the upgrade. Any other
/// failure is reported over the socket and closes it with a 4xxx code.
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let ConnectQuery { id, token } = query.into_inner();
    let link = state
        .hub
        .send(Connect { token, target: id })
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    if let Err(HubError::Unauthorized) = link {
        log::info!("rejected connection from {:?}: bad token", req.peer_addr());
        return Ok(HttpResponse::Unauthorized().finish());
    }

    log::info!("websocket connection from {:?}", req.peer_addr());
    ws::WsResponseBuilder::new(ClientSession::new(link, state.config), &req, stream)
        .frame_size(state.config.max_frame_size)
        .start()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::protocol::Action;
    use crate::storage::MemoryStore;
    use actix::dev::ToEnvelope;
    use actix_web::App;
    use futures_util::{SinkExt, Stream, StreamExt};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        events: Vec<Encoded>,
        close: Option<u16>,
    }

    struct Recorder(Arc<Mutex<Recording>>);

    impl Actor for Recorder {
        type Context = Context<Self>;
    }

    impl Handler<Outbound> for Recorder {
        type Result = ();

        fn handle(&mut self, msg: Outbound, _ctx: &mut Context<Self>) {
            let mut log = self.0.lock().unwrap();
            match msg {
                Outbound::Event(event) => log.events.push(event),
                Outbound::Close(reason) => {
                    log.close = Some(reason.map_or(1005, |r| u16::from(r.code)));
                }
            }
        }
    }

    /// Stands in for a client session in actor tests.
    pub(crate) struct TestClient {
        pub player: Player,
        pub conn: Uuid,
        log: Arc<Mutex<Recording>>,
        addr: Addr<Recorder>,
    }

    impl TestClient {
        pub fn new(id: &str, rating: f64) -> Self {
            Self::with_capacity(id, rating, 16)
        }

        pub fn with_capacity(id: &str, rating: f64, capacity: usize) -> Self {
            let log = Arc::new(Mutex::new(Recording::default()));
            let shared = log.clone();
            let addr = Recorder::create(move |ctx| {
                ctx.set_mailbox_capacity(capacity);
                Recorder(shared)
            });
            Self {
                player: Player::new(id, rating),
                conn: Uuid::new_v4(),
                log,
                addr,
            }
        }

        /// Creates a peer and registers it with `target`.
        pub fn join<A>(target: &Addr<A>, id: &str, rating: f64) -> Self
        where
            A: Actor + Handler<Register>,
            A::Context: ToEnvelope<A, Register>,
        {
            let peer = Self::new(id, rating);
            target.do_send(peer.register());
            peer
        }

        pub fn register(&self) -> Register {
            Register {
                player: self.player.clone(),
                conn: self.conn,
                client: self.recipient(),
            }
        }

        pub fn unregister(&self) -> Unregister {
            Unregister {
                player_id: self.player.id.clone(),
                conn: self.conn,
            }
        }

        pub fn recipient(&self) -> Recipient<Outbound> {
            self.addr.clone().recipient()
        }

        pub fn events(&self) -> Vec<Encoded> {
            self.log.lock().unwrap().events.clone()
        }

        pub fn last(&self, action: Action) -> Option<Encoded> {
            self.events().into_iter().rev().find(|e| e.action == action)
        }

        pub fn close_code(&self) -> Option<u16> {
            self.log.lock().unwrap().close
        }
    }

    fn reason(code: u16) -> CloseReason {
        CloseReason {
            code: CloseCode::Other(code),
            description: None,
        }
    }

    #[actix::test]
    async fn test_subscribers_send_and_broadcast() {
        let a = TestClient::new("a", 1500.0);
        let b = TestClient::new("b", 1500.0);
        let mut subs = Subscribers::default();
        subs.insert("a".into(), a.conn, a.recipient());
        subs.insert("b".into(), b.conn, b.recipient());
        assert_eq!(subs.len(), 2);

        subs.send("a", &Encoded::redirect("room"));
        subs.broadcast(&Encoded::clients_counter(2));
        subs.close_all(reason(4000));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let a_events: Vec<Action> = a.events().iter().map(|e| e.action).collect();
        assert_eq!(a_events, vec![Action::Redirect, Action::ClientsCounter]);
        assert_eq!(b.events().len(), 1);
        assert_eq!(a.close_code(), Some(4000));
        assert_eq!(subs.dropped(), 0);
    }

    #[actix::test]
    async fn test_remove_requires_matching_connection() {
        let a = TestClient::new("a", 1500.0);
        let mut subs = Subscribers::default();
        subs.insert("a".into(), a.conn, a.recipient());
        assert!(!subs.remove("a", Uuid::new_v4()));
        assert!(subs.contains("a"));
        assert!(subs.remove("a", a.conn));
        assert!(subs.is_empty());
        assert!(!subs.remove("a", a.conn));
    }

    #[actix::test]
    async fn test_full_buffer_drops_events() {
        let slow = TestClient::with_capacity("slow", 1500.0, 1);
        let mut subs = Subscribers::default();
        subs.insert("slow".into(), slow.conn, slow.recipient());

        // Nothing is processed until this task yields.
        for n in 0..10 {
            subs.send("slow", &Encoded::clients_counter(n));
        }
        assert!(subs.dropped() > 0);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(slow.events().len() < 10);
    }

    #[actix::test]
    async fn test_refuse_sends_error_then_close() {
        let peer = TestClient::new("p", 1500.0);
        Subscribers::refuse(&peer.recipient(), &HubError::RoomNotFound("x".into()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = peer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Error);
        assert_eq!(peer.close_code(), Some(4004));
    }

    // -- Sessions over a real socket ----------------------------------------

    fn session_config() -> ServerConfig {
        ServerConfig {
            pong_wait: Duration::from_millis(400),
            max_frame_size: 256,
            ..ServerConfig::default()
        }
    }

    /// A server with one session token, `tok-a`, for player `a`.
    fn serve(config: ServerConfig) -> actix_test::TestServer {
        let store = Arc::new(MemoryStore::new());
        store.add_session("tok-a", Player::new("a", 1500.0));
        let hub = Hub::new(store.clone(), config).start();
        let state = web::Data::new(AppState { store, hub, config });
        actix_test::start(move || {
            App::new()
                .app_data(state.clone())
                .configure(crate::api::configure_routes)
        })
    }

    /// Action, payload and whether the frame was binary.
    fn decode_frame(frame: &ws::Frame) -> Option<(Action, String, bool)> {
        match frame {
            ws::Frame::Text(bytes) => {
                let v: serde_json::Value = serde_json::from_slice(bytes).ok()?;
                let action = Action::try_from(v["a"].as_u64()? as u8).ok()?;
                Some((action, v["p"].to_string(), false))
            }
            ws::Frame::Binary(bytes) => {
                let (&code, payload) = bytes.split_last()?;
                let payload = String::from_utf8(payload.to_vec()).ok()?;
                Some((Action::try_from(code).ok()?, payload, true))
            }
            _ => None,
        }
    }

    /// Reads frames until `pick` accepts one. `None` if the socket ends or
    /// nothing matches within three seconds.
    async fn read_until<S, T>(
        framed: &mut S,
        mut pick: impl FnMut(ws::Frame) -> Option<T>,
    ) -> Option<T>
    where
        S: Stream<Item = Result<ws::Frame, ws::ProtocolError>> + Unpin,
    {
        let read = async {
            while let Some(Ok(frame)) = framed.next().await {
                if let Some(found) = pick(frame) {
                    return Some(found);
                }
            }
            None
        };
        tokio::time::timeout(Duration::from_secs(3), read)
            .await
            .ok()
            .flatten()
    }

    async fn read_event<S>(framed: &mut S, action: Action) -> Option<(String, bool)>
    where
        S: Stream<Item = Result<ws::Frame, ws::ProtocolError>> + Unpin,
    {
        read_until(framed, |frame| match decode_frame(&frame) {
            Some((a, payload, binary)) if a == action => Some((payload, binary)),
            _ => None,
        })
        .await
    }

    async fn read_close<S>(framed: &mut S) -> Option<CloseCode>
    where
        S: Stream<Item = Result<ws::Frame, ws::ProtocolError>> + Unpin,
    {
        read_until(framed, |frame| match frame {
            ws::Frame::Close(reason) => Some(reason.map_or(CloseCode::Normal, |r| r.code)),
            _ => None,
        })
        .await
    }

    const MOVE_E2E4: &str = r#"{"to":28,"from":12,"type":0}"#;

    #[actix::test]
    async fn test_session_answers_in_the_client_format() {
        let mut srv = serve(session_config());
        let mut framed = srv.ws_at("/ws?id=4&token=tok-a").await.unwrap();

        let text = format!(r#"{{"a":2,"p":{}}}"#, MOVE_E2E4);
        framed.send(ws::Message::Text(text.into())).await.unwrap();
        let (payload, binary) = read_event(&mut framed, Action::Error).await.unwrap();
        assert_eq!(payload, "\"not in a room\"");
        assert!(!binary);

        let mut frame = MOVE_E2E4.as_bytes().to_vec();
        frame.push(Action::MakeMove as u8);
        framed.send(ws::Message::Binary(frame.into())).await.unwrap();
        let (payload, binary) = read_event(&mut framed, Action::Error).await.unwrap();
        assert_eq!(payload, "\"not in a room\"");
        assert!(binary);
    }

    #[actix::test]
    async fn test_undecodable_frame_closes_with_protocol_error() {
        let mut srv = serve(session_config());
        let mut framed = srv.ws_at("/ws?id=4&token=tok-a").await.unwrap();
        framed
            .send(ws::Message::Text("not json".into()))
            .await
            .unwrap();
        assert_eq!(read_close(&mut framed).await, Some(CloseCode::Protocol));
    }

    #[actix::test]
    async fn test_oversized_frame_closes_with_size_error() {
        let config = session_config();
        let mut srv = serve(config);
        let mut framed = srv.ws_at("/ws?id=4&token=tok-a").await.unwrap();
        let big = "x".repeat(config.max_frame_size * 4);
        framed.send(ws::Message::Text(big.into())).await.unwrap();
        assert_eq!(read_close(&mut framed).await, Some(CloseCode::Size));
    }

    #[actix::test]
    async fn test_silent_client_is_dropped() {
        let config = session_config();
        let mut srv = serve(config);
        let mut framed = srv.ws_at("/ws?id=4&token=tok-a").await.unwrap();
        let started = Instant::now();
        assert_eq!(read_close(&mut framed).await, Some(CloseCode::Away));
        assert!(started.elapsed() >= config.pong_wait);
    }

    #[actix::test]
    async fn test_ping_carries_measured_round_trip() {
        let mut srv = serve(session_config());
        let mut framed = srv.ws_at("/ws?id=4&token=tok-a").await.unwrap();

        let (first, _) = read_event(&mut framed, Action::Ping).await.unwrap();
        assert_eq!(first, "0");
        tokio::time::sleep(Duration::from_millis(60)).await;
        framed
            .send(ws::Message::Text(r#"{"a":1}"#.into()))
            .await
            .unwrap();

        let (second, _) = read_event(&mut framed, Action::Ping).await.unwrap();
        let rtt: u64 = second.parse().unwrap();
        assert!(rtt >= 60, "round trip {rtt}ms");
        assert!(rtt < 300, "round trip {rtt}ms");
    }
}
