// live-server/src/actors/client_session_actor.rs
use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use viewer_engine::{Connection, ConnectionId, TransportError};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest inbound frame payload the socket accepts
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Outbound text frame produced by the engine
#[derive(Message)]
#[rtype(result = "()")]
pub struct PushFrame(pub String);

/// Close the socket on behalf of the engine
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseConnection;

/// Actor owning one websocket.
///
/// Text frames are forwarded to the engine through a channel; dropping the
/// actor drops the sender, which the engine observes as a closed connection.
pub struct ClientSessionActor {
    connection_id: ConnectionId,
    inbound: mpsc::UnboundedSender<String>,
    last_heartbeat: Instant,
}

impl ClientSessionActor {
    pub fn new(connection_id: ConnectionId, inbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            connection_id,
            inbound,
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::warn!("Websocket heartbeat timeout: {}", act.connection_id);
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for ClientSessionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("Websocket opened: {}", self.connection_id);
        self.last_heartbeat = Instant::now();
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("Websocket closed: {}", self.connection_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSessionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                tracing::trace!("Frame on {} ({} bytes)", self.connection_id, text.len());
                if self.inbound.send(text.to_string()).is_err() {
                    // Engine stopped listening
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.last_heartbeat = Instant::now();
                tracing::debug!("Ignoring binary frame on {}", self.connection_id);
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!("Client closing {}: {:?}", self.connection_id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => (),
            Err(e) => {
                tracing::debug!("Protocol error on {}: {}", self.connection_id, e);
                ctx.stop();
            }
        }
    }
}

impl Handler<PushFrame> for ClientSessionActor {
    type Result = ();

    fn handle(&mut self, msg: PushFrame, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

impl Handler<CloseConnection> for ClientSessionActor {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) -> Self::Result {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// Engine-facing handle for a websocket actor
pub struct WsConnection {
    id: ConnectionId,
    addr: Addr<ClientSessionActor>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl WsConnection {
    pub fn new(id: ConnectionId, addr: Addr<ClientSessionActor>, inbound: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            id,
            addr,
            inbound: Mutex::new(inbound),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.addr.connected() {
            return Err(TransportError::Closed);
        }
        self.addr.do_send(PushFrame(frame));
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(text)) => Ok(Some(text)),
            Ok(None) => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        if self.addr.connected() {
            self.addr.do_send(CloseConnection);
        }
    }
}
