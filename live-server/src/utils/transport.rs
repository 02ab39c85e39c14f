// live-server/src/utils/transport.rs
use actix_web::http::header::{HeaderMap, HOST, ORIGIN, USER_AGENT};
use actix_web::HttpRequest;
use common::TransportMetadata;
use std::net::IpAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Remote address recorded in a viewer's identity.
///
/// Loopback peers are assumed to be a local reverse proxy, so the first
/// `X-Forwarded-For` hop is used when present.
pub fn resolve_remote_address(peer: Option<IpAddr>, forwarded_for: Option<&str>) -> String {
    match peer {
        None => "BANNED".to_string(),
        Some(ip) if ip.is_loopback() => forwarded_for
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .unwrap_or("LOCAL")
            .to_string(),
        Some(ip) => ip.to_string(),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: impl actix_web::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Remote address of a request, as `resolve_remote_address` sees it
pub fn remote_address_of(peer: Option<IpAddr>, headers: &HeaderMap) -> String {
    resolve_remote_address(peer, header(headers, FORWARDED_FOR))
}

/// Everything the engine compares against a sealed identity
pub fn transport_metadata(req: &HttpRequest) -> TransportMetadata {
    let headers = req.headers();
    let peer = req.peer_addr().map(|addr| addr.ip());
    let host = match header(headers, HOST) {
        Some(host) => host.to_string(),
        None => req.connection_info().host().to_string(),
    };

    TransportMetadata::new(
        remote_address_of(peer, headers),
        header(headers, USER_AGENT).unwrap_or_default(),
        host,
    )
    .with_origin(header(headers, ORIGIN))
}
