// viewer-engine/src/connection.rs
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::TransportError;

/// Identity of one live connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The single send/receive primitive the engine needs from a transport
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next text frame; `Ok(None)` on timeout
    async fn receive(&self, timeout: Duration) -> Result<Option<String>, TransportError>;

    async fn close(&self);
}
