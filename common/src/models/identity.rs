// common/src/models/identity.rs
use serde::{Deserialize, Serialize};

use crate::seal::{SealError, Sealer};

/// What the transport layer observed about the request currently being served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetadata {
    pub remote_address: String,
    pub user_agent: String,
    pub host: String,
    /// `Origin` header with the scheme removed (`host:port`)
    pub origin: Option<String>,
}

impl TransportMetadata {
    pub fn new(
        remote_address: impl Into<String>,
        user_agent: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            remote_address: remote_address.into(),
            user_agent: user_agent.into(),
            host: host.into(),
            origin: None,
        }
    }

    /// Attach the request's `Origin` header, stripping its scheme
    pub fn with_origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(strip_scheme).filter(|o| !o.is_empty());
        self
    }
}

/// Remove a leading `scheme://` from an origin value
pub fn strip_scheme(origin: &str) -> String {
    match origin.split_once("://") {
        Some((_, rest)) => rest.trim_end_matches('/').to_string(),
        None => origin.trim_end_matches('/').to_string(),
    }
}

/// Identity of a viewer, sealed into the `DEVICE_INFO` cookie.
///
/// Two records are equal only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(rename = "REMOTE_ADDRESS")]
    pub remote_address: String,
    #[serde(rename = "USER_AGENT")]
    pub user_agent: String,
    #[serde(rename = "VIEWER_ID")]
    pub viewer_id: String,
    #[serde(rename = "HOST_URL")]
    pub host_url: String,
    #[serde(rename = "ORIGIN", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Handshake token issued with the page that carried this record
    #[serde(rename = "SESSION_NONCE")]
    pub session_nonce: String,
}

impl IdentityRecord {
    /// Build a fresh record from what the transport observed
    pub fn observe(meta: &TransportMetadata, viewer_id: impl Into<String>) -> Self {
        Self {
            remote_address: meta.remote_address.clone(),
            user_agent: meta.user_agent.clone(),
            viewer_id: viewer_id.into(),
            host_url: meta.host.clone(),
            origin: meta.origin.clone(),
            session_nonce: String::new(),
        }
    }

    /// Every mandatory field is present
    pub fn is_complete(&self) -> bool {
        !self.remote_address.is_empty()
            && !self.user_agent.is_empty()
            && !self.viewer_id.is_empty()
            && !self.host_url.is_empty()
            && !self.session_nonce.is_empty()
    }

    /// Remote address, user agent and host all match the current transport
    pub fn matches_transport(&self, meta: &TransportMetadata) -> bool {
        self.remote_address == meta.remote_address
            && self.user_agent == meta.user_agent
            && self.host_url == meta.host
    }

    /// The declared origin equals the declared host
    pub fn is_same_origin(&self) -> bool {
        self.origin.as_deref() == Some(self.host_url.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Render and seal this record into an opaque token
    pub fn seal(&self, sealer: &dyn Sealer) -> Result<String, SealError> {
        let bytes = self.to_bytes().map_err(|e| SealError::Encoding(e.to_string()))?;
        sealer.seal(&bytes)
    }

    /// Reconstruct a record from a sealed token.
    ///
    /// Any failure (bad token, tampering, malformed contents) yields `None`.
    pub fn unseal(token: &str, sealer: &dyn Sealer) -> Option<Self> {
        let bytes = match sealer.unseal(token) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Discarding identity token: {}", e);
                return None;
            }
        };
        match Self::from_bytes(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Identity token carried malformed record: {}", e);
                None
            }
        }
    }
}
