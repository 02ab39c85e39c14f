// live-server/src/api/page.rs
use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use common::Config;
use viewer_engine::LiveEngine;

use crate::template::{render_page, PageOptions};
use crate::utils::transport::transport_metadata;

/// Sealed identity record
pub const IDENTITY_COOKIE: &str = "DEVICE_INFO";
/// Unix time the identity cookie was first issued
pub const CREATION_COOKIE: &str = "DEVICE_INFO_CREATION";

fn persistent_cookie(name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_secs))
        .finish()
}

/// Serve the page, refreshing the viewer's identity cookies
pub async fn page_route(
    req: HttpRequest,
    engine: web::Data<LiveEngine>,
    config: web::Data<Config>,
) -> HttpResponse {
    let meta = transport_metadata(&req);
    let persisted = req.cookie(IDENTITY_COOKIE).map(|c| c.value().to_string());

    let grant = match engine.page_load(&meta, persisted.as_deref()) {
        Ok(grant) => grant,
        Err(e) => {
            tracing::error!("Page load for {} failed: {}", meta.remote_address, e);
            return HttpResponse::InternalServerError().body("Internal server error");
        }
    };

    // A returning viewer keeps its original creation time
    let created_at = req
        .cookie(CREATION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|value| !grant.new_visitor && value.parse::<i64>().is_ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp().to_string());

    let max_age = config.cookie_max_age_secs();
    let page = render_page(&PageOptions {
        title: &config.title,
        extra_head: &config.extra_head,
        ws_route: &config.ws_route,
        handshake_token: &grant.handshake_token,
        reset_on_disconnect: config.reset_on_disconnect,
    });

    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .cookie(persistent_cookie(IDENTITY_COOKIE, grant.identity_token, max_age))
        .cookie(persistent_cookie(CREATION_COOKIE, created_at, max_age))
        .body(page)
}
