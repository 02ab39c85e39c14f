// viewer-engine/src/testing.rs
//! In-memory transport and fixtures for exercising the engine without sockets.
use async_trait::async_trait;
use common::{IdentityRecord, TransportMetadata};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionId};
use crate::error::TransportError;
use crate::forms::CleanedForm;
use crate::handler::ViewerHandler;
use crate::viewer::Viewer;

/// A connection whose inbound frames are scripted and whose sends are recorded
pub struct ScriptedConnection {
    id: ConnectionId,
    inbound_tx: mpsc::UnboundedSender<Result<String, TransportError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, TransportError>>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl ScriptedConnection {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: ConnectionId::new(),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Queue a text frame for the next `receive`
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound_tx.send(Ok(text.into()));
    }

    /// Make a later `receive` fail as if the peer went away
    pub fn hang_up(&self) {
        let _ = self.inbound_tx.send(Err(TransportError::Closed));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("scripted failure".to_string()));
        }
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(frame);
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut inbound = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(frame)) => frame.map(Some),
            Ok(None) => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport metadata of a typical same-origin browser request
pub fn sample_metadata() -> TransportMetadata {
    TransportMetadata::new("203.0.113.9", "Mozilla/5.0 (X11; Linux x86_64)", "live.test:49000")
        .with_origin(Some("http://live.test:49000"))
}

/// A complete identity record for `viewer_id`
pub fn sample_identity(viewer_id: &str) -> IdentityRecord {
    let mut identity = IdentityRecord::observe(&sample_metadata(), viewer_id);
    identity.session_nonce = format!("nonce-for-{}", viewer_id);
    identity
}

/// Callback observed by [`RecordingHandler`]
#[derive(Debug)]
pub enum HandlerEvent {
    NewVisitor(String),
    FormSubmit(String, CleanedForm),
    VisitorLeft(String),
}

/// A handler that forwards every callback to a channel
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<HandlerEvent>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

#[async_trait]
impl ViewerHandler for RecordingHandler {
    async fn on_new_visitor(&self, viewer: Arc<Viewer>) {
        let _ = self.events.send(HandlerEvent::NewVisitor(viewer.viewer_id().to_string()));
    }

    async fn on_form_submit(&self, viewer: Arc<Viewer>, form: CleanedForm) {
        let _ = self
            .events
            .send(HandlerEvent::FormSubmit(viewer.viewer_id().to_string(), form));
    }

    async fn on_visitor_left(&self, viewer: Arc<Viewer>) {
        let _ = self.events.send(HandlerEvent::VisitorLeft(viewer.viewer_id().to_string()));
    }
}
