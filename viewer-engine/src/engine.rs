// viewer-engine/src/engine.rs
use common::{redact, IdentityRecord, InboundFrame, Sealer, TransportMetadata};
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{LiveError, LiveResult, RejectReason};
use crate::handler::ViewerHandler;
use crate::handshake::HandshakeCoordinator;
use crate::registry::ConnectionRegistry;
use crate::settings::EngineSettings;
use crate::viewer::Viewer;

/// What a page load hands back to the HTTP layer
#[derive(Debug, Clone)]
pub struct PageGrant {
    /// Sent by the page as the first frame of its connection
    pub handshake_token: String,
    /// Sealed identity for the persisted client state
    pub identity_token: String,
    pub viewer_id: String,
    /// A fresh viewer ID was reserved for this load
    pub new_visitor: bool,
}

/// Counters reported by the housekeeping task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub live_viewers: usize,
    pub pending_handshakes: usize,
    pub reservations: usize,
}

/// Ties page loads, connection handshakes and per-connection receive loops
/// to the registry and the application handler.
pub struct LiveEngine {
    registry: Arc<ConnectionRegistry>,
    handshakes: HandshakeCoordinator,
    sealer: Arc<dyn Sealer>,
    handler: Arc<dyn ViewerHandler>,
    settings: EngineSettings,
}

impl LiveEngine {
    pub fn new(sealer: Arc<dyn Sealer>, handler: Arc<dyn ViewerHandler>, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            handshakes: HandshakeCoordinator::new(settings.handshake_ttl, settings.reservation_ttl),
            sealer,
            handler,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn handshakes(&self) -> &HandshakeCoordinator {
        &self.handshakes
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The live session for `viewer_id`
    pub fn viewer(&self, viewer_id: &str) -> LiveResult<Arc<Viewer>> {
        self.registry.viewer(viewer_id).ok_or(LiveError::SessionStale)
    }

    // Sealed identity that is complete and observed from the same client
    fn recognise(&self, persisted: Option<&str>, meta: &TransportMetadata) -> Option<IdentityRecord> {
        let record = IdentityRecord::unseal(persisted?, self.sealer.as_ref())?;
        if !record.is_complete() || !record.matches_transport(meta) {
            tracing::debug!("Sealed identity for {} does not match the request", meta.remote_address);
            return None;
        }
        Some(record)
    }

    /// Serve the identity half of a page request.
    ///
    /// A returning viewer whose identity still matches keeps its ID and has
    /// its reservation re-armed; anyone else gets a freshly reserved ID.
    pub fn page_load(&self, meta: &TransportMetadata, persisted: Option<&str>) -> LiveResult<PageGrant> {
        let (viewer_id, new_visitor) = match self.recognise(persisted, meta) {
            Some(record) => {
                self.handshakes.rearm(&record.viewer_id);
                (record.viewer_id, false)
            }
            None => (self.handshakes.reserve_viewer_id(&self.registry), true),
        };

        let handshake_token = self.handshakes.mint_token();
        let mut identity = IdentityRecord::observe(meta, viewer_id.clone());
        identity.session_nonce = handshake_token.clone();
        let identity_token = identity.seal(self.sealer.as_ref())?;

        let session = Viewer::new(identity, Arc::downgrade(&self.registry), self.settings.clone());
        self.handshakes.register(handshake_token.clone(), session);

        tracing::debug!(
            "Page load from {}: viewer {} ({}), handshake {}",
            meta.remote_address,
            redact(&viewer_id),
            if new_visitor { "new" } else { "returning" },
            redact(&handshake_token)
        );
        Ok(PageGrant {
            handshake_token,
            identity_token,
            viewer_id,
            new_visitor,
        })
    }

    /// Run the handshake on a freshly opened connection and bind it
    pub async fn connect(
        &self,
        connection: Arc<dyn Connection>,
        meta: &TransportMetadata,
        persisted: Option<&str>,
    ) -> LiveResult<Arc<Viewer>> {
        let mut identity = self
            .recognise(persisted, meta)
            .ok_or(RejectReason::IdentityMismatch)?;
        identity.origin = meta.origin.clone();
        if !identity.is_same_origin() {
            return Err(RejectReason::CrossOrigin.into());
        }
        if !self.handshakes.is_reserved(&identity.viewer_id) {
            return Err(RejectReason::NotReserved.into());
        }

        let token = self.await_handshake(connection.as_ref()).await?;
        let viewer = self
            .handshakes
            .consume_handshake(token.trim())
            .ok_or(RejectReason::UnknownToken)?;
        if viewer.viewer_id() != identity.viewer_id
            || viewer.identity().session_nonce != identity.session_nonce
        {
            return Err(RejectReason::ViewerMismatch.into());
        }

        self.handshakes.release(&identity.viewer_id);
        self.registry.bind(Arc::clone(&viewer), connection);

        let handler = Arc::clone(&self.handler);
        let visitor = Arc::clone(&viewer);
        tokio::spawn(async move { handler.on_new_visitor(visitor).await });
        Ok(viewer)
    }

    async fn await_handshake(&self, connection: &dyn Connection) -> LiveResult<String> {
        for attempt in 1..=self.settings.handshake_attempts {
            if let Some(frame) = connection.receive(self.settings.receive_poll).await? {
                return Ok(frame);
            }
            tracing::trace!("No handshake on connection {} (attempt {})", connection.id(), attempt);
        }
        Err(RejectReason::NoHandshake.into())
    }

    /// Own a connection from open to close.
    ///
    /// Rejected handshakes close the connection without notifying the
    /// handler; bound ones run the receive loop until the peer leaves or the
    /// session is replaced.
    pub async fn serve(&self, connection: Arc<dyn Connection>, meta: TransportMetadata, persisted: Option<String>) {
        match self.connect(Arc::clone(&connection), &meta, persisted.as_deref()).await {
            Ok(viewer) => self.receive_loop(viewer, connection).await,
            Err(e) => {
                tracing::warn!(
                    "Rejected connection {} from {}: {}",
                    connection.id(),
                    meta.remote_address,
                    e
                );
                connection.close().await;
            }
        }
    }

    async fn receive_loop(&self, viewer: Arc<Viewer>, connection: Arc<dyn Connection>) {
        loop {
            if !viewer.is_current() {
                tracing::debug!("Viewer {} was replaced; leaving receive loop", viewer.viewer_id());
                break;
            }
            match connection.receive(self.settings.receive_poll).await {
                Ok(None) => continue,
                Ok(Some(text)) => self.dispatch(&viewer, &text),
                Err(e) => {
                    tracing::debug!("Connection {} ended: {}", connection.id(), e);
                    break;
                }
            }
        }

        self.registry.release(viewer.viewer_id(), connection.id());
        connection.close().await;
        tracing::info!("Viewer left: {}", viewer.viewer_id());
        self.handler.on_visitor_left(viewer).await;
    }

    fn dispatch(&self, viewer: &Arc<Viewer>, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Fragment(fragment)) => {
                let viewer = Arc::clone(viewer);
                tokio::spawn(async move {
                    let file_id = fragment.file_id.clone();
                    if !viewer.accept_fragment(fragment) {
                        tracing::trace!("Dropped fragment for unknown upload {}", file_id);
                    }
                });
            }
            Ok(InboundFrame::Form(form)) => match viewer.validate_and_strip(form) {
                Some(form) => {
                    let handler = Arc::clone(&self.handler);
                    let viewer = Arc::clone(viewer);
                    tokio::spawn(async move { handler.on_form_submit(viewer, form).await });
                }
                None => tracing::debug!("{} for viewer {}", LiveError::ChallengeRejected, viewer.viewer_id()),
            },
            Err(e) => tracing::debug!("Ignoring undecodable frame from {}: {}", viewer.viewer_id(), e),
        }
    }

    /// Reclaim expired handshakes and reservations
    pub fn sweep(&self) -> (usize, usize) {
        let (handshakes, reservations) = self.handshakes.sweep();
        if handshakes + reservations > 0 {
            tracing::debug!(
                "Swept {} expired handshakes and {} reservations",
                handshakes,
                reservations
            );
        }
        (handshakes, reservations)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            live_viewers: self.registry.len(),
            pending_handshakes: self.handshakes.pending_handshakes(),
            reservations: self.handshakes.reservations(),
        }
    }
}
