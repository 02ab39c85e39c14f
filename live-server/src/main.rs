// live-server/src/main.rs
mod actors;
mod api;
mod demo;
mod middleware;
mod routing;
mod template;
mod utils;

use actix::Actor;
use actix_web::{web, App, HttpServer};
use actors::housekeeping::HousekeepingActor;
use common::{setup_tracing, ChaChaSealer, Config};
use demo::DemoHandler;
use middleware::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use viewer_engine::{EngineSettings, LiveEngine};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Setup tracing
    setup_tracing();

    // Load configuration
    let config = Config::from_env();

    // Save address before moving config into web::Data
    let server_addr = config.server_addr.clone();

    let engine = Arc::new(LiveEngine::new(
        Arc::new(ChaChaSealer::from_secret(&config.seal_secret)),
        Arc::new(DemoHandler::new()),
        EngineSettings::from(&config),
    ));
    let limiter = RateLimiter::new(vec![config.home_route.clone()], &config.rate_limit);

    HousekeepingActor::new(
        Arc::clone(&engine),
        limiter.clone(),
        Duration::from_secs(config.timeouts.sweep_interval_secs.max(1)),
    )
    .start();

    tracing::info!(
        "Starting live server on {} (page {}, websocket {})",
        server_addr,
        config.home_route,
        config.ws_route
    );

    // Create data references
    let engine_data = web::Data::from(engine);
    let config_data = web::Data::new(config);

    // Start HTTP server
    HttpServer::new(move || {
        let config = config_data.clone();
        App::new()
            .wrap(limiter.clone())
            .app_data(engine_data.clone())
            .app_data(config_data.clone())
            .configure(|cfg| routing::routes(cfg, &config))
    })
    .bind(&server_addr)?
    .run()
    .await
}
