// viewer-engine/src/handshake.rs
use common::{generate_handshake_token, generate_viewer_id, redact};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::registry::ConnectionRegistry;
use crate::viewer::Viewer;

// Session waiting for its connection to present the token
struct PendingHandshake {
    session: Arc<Viewer>,
    created_at: Instant,
}

/// Short-lived tokens issued with a page and redeemed by its connection.
///
/// Expiry is checked on every access; `sweep` only reclaims memory early.
pub struct HandshakeCoordinator {
    pending: DashMap<String, PendingHandshake>,
    // viewer ID -> reserved at
    reservations: DashMap<String, Instant>,
    handshake_ttl: Duration,
    reservation_ttl: Duration,
}

impl HandshakeCoordinator {
    pub fn new(handshake_ttl: Duration, reservation_ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            reservations: DashMap::new(),
            handshake_ttl,
            reservation_ttl,
        }
    }

    fn reservation_live(&self, reserved_at: Instant) -> bool {
        reserved_at.elapsed() < self.reservation_ttl
    }

    /// Mint a viewer ID that is neither bound nor reserved, and reserve it
    pub fn reserve_viewer_id(&self, registry: &ConnectionRegistry) -> String {
        loop {
            let candidate = generate_viewer_id();
            if registry.is_registered(&candidate) {
                continue;
            }
            match self.reservations.entry(candidate.clone()) {
                Entry::Occupied(mut entry) => {
                    if self.reservation_live(*entry.get()) {
                        continue;
                    }
                    entry.insert(Instant::now());
                }
                Entry::Vacant(entry) => {
                    entry.insert(Instant::now());
                }
            }
            tracing::debug!("Reserved viewer ID {}", redact(&candidate));
            return candidate;
        }
    }

    /// Restart the reservation window of a returning viewer
    pub fn rearm(&self, viewer_id: &str) {
        self.reservations.insert(viewer_id.to_string(), Instant::now());
    }

    pub fn is_reserved(&self, viewer_id: &str) -> bool {
        match self.reservations.get(viewer_id) {
            Some(reserved_at) => self.reservation_live(*reserved_at),
            None => false,
        }
    }

    /// Consume a reservation; false if it was absent or already expired
    pub fn release(&self, viewer_id: &str) -> bool {
        match self.reservations.remove(viewer_id) {
            Some((_, reserved_at)) => self.reservation_live(reserved_at),
            None => false,
        }
    }

    /// A token not currently pending
    pub fn mint_token(&self) -> String {
        loop {
            let token = generate_handshake_token();
            if !self.pending.contains_key(&token) {
                return token;
            }
        }
    }

    /// Bind an already minted token to `session`
    pub fn register(&self, token: String, session: Arc<Viewer>) {
        self.pending.insert(
            token,
            PendingHandshake {
                session,
                created_at: Instant::now(),
            },
        );
    }

    /// Issue a fresh token bound to `session`
    pub fn issue_handshake(&self, session: Arc<Viewer>) -> String {
        let token = self.mint_token();
        self.register(token.clone(), session);
        token
    }

    /// Exchange a token for its session, at most once
    pub fn consume_handshake(&self, token: &str) -> Option<Arc<Viewer>> {
        let (_, pending) = self.pending.remove(token)?;
        if pending.created_at.elapsed() >= self.handshake_ttl {
            tracing::debug!("Handshake {} expired before use", redact(token));
            return None;
        }
        Some(pending.session)
    }

    /// Drop expired handshakes and reservations, returning how many went
    pub fn sweep(&self) -> (usize, usize) {
        let before = (self.pending.len(), self.reservations.len());
        self.pending
            .retain(|_, pending| pending.created_at.elapsed() < self.handshake_ttl);
        self.reservations
            .retain(|_, reserved_at| reserved_at.elapsed() < self.reservation_ttl);
        (
            before.0.saturating_sub(self.pending.len()),
            before.1.saturating_sub(self.reservations.len()),
        )
    }

    pub fn pending_handshakes(&self) -> usize {
        self.pending.len()
    }

    pub fn reservations(&self) -> usize {
        self.reservations.len()
    }
}
