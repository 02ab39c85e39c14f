// live-server/src/routing.rs
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use common::Config;
use std::sync::Arc;
use tokio::sync::mpsc;
use viewer_engine::{ConnectionId, LiveEngine};

use crate::actors::client_session_actor::{ClientSessionActor, WsConnection, MAX_FRAME_BYTES};
use crate::api::{page_route, IDENTITY_COOKIE};
use crate::utils::transport::transport_metadata;

/// Page and websocket routes at the configured paths
pub fn routes(cfg: &mut web::ServiceConfig, config: &Config) {
    cfg.service(web::resource(config.home_route.as_str()).route(web::get().to(page_route)))
        .service(web::resource(config.ws_route.as_str()).route(web::get().to(live_ws_route)));
}

/// Upgrade to a websocket and hand the connection to the engine
async fn live_ws_route(
    req: HttpRequest,
    stream: web::Payload,
    engine: web::Data<LiveEngine>,
) -> Result<HttpResponse, Error> {
    let meta = transport_metadata(&req);
    let persisted = req.cookie(IDENTITY_COOKIE).map(|c| c.value().to_string());

    let connection_id = ConnectionId::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let actor = ClientSessionActor::new(connection_id, inbound_tx);

    let (addr, resp) = ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(MAX_FRAME_BYTES)
        .start_with_addr()?;
    let connection = Arc::new(WsConnection::new(connection_id, addr, inbound_rx));

    tracing::debug!("Websocket {} from {}", connection_id, meta.remote_address);
    let engine = engine.into_inner();
    actix_web::rt::spawn(async move {
        engine.serve(connection, meta, persisted).await;
    });

    Ok(resp)
}
