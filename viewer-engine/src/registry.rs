// viewer-engine/src/registry.rs
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::connection::{Connection, ConnectionId};
use crate::viewer::Viewer;

// Viewer bound to its live connection handles
struct LiveViewer {
    viewer: Arc<Viewer>,
    connections: BTreeMap<ConnectionId, Arc<dyn Connection>>,
}

impl LiveViewer {
    fn connection_ids(&self) -> BTreeSet<ConnectionId> {
        self.connections.keys().copied().collect()
    }
}

/// Process-wide map from viewer ID to the live connection set for that viewer.
///
/// The registry owns bound sessions; a session is current only while its
/// remembered connection set equals the set registered here.
#[derive(Default)]
pub struct ConnectionRegistry {
    live: DashMap<String, LiveViewer>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a viewer to a single connection, replacing any previous binding
    pub fn bind(&self, viewer: Arc<Viewer>, connection: Arc<dyn Connection>) {
        let viewer_id = viewer.viewer_id().to_string();
        let connection_id = connection.id();

        let mut connections = BTreeMap::new();
        connections.insert(connection_id, Arc::clone(&connection));
        viewer.attach(connections.clone());

        let previous = self.live.insert(viewer_id.clone(), LiveViewer { viewer, connections });
        match previous {
            Some(_) => tracing::info!("Viewer reconnected: {} (connection {})", viewer_id, connection_id),
            None => tracing::info!("Viewer bound: {} (connection {})", viewer_id, connection_id),
        }
    }

    /// The session's remembered connections are exactly the live set
    pub fn is_current(&self, viewer: &Viewer) -> bool {
        match self.live.get(viewer.viewer_id()) {
            Some(entry) => entry.connection_ids() == viewer.connection_ids(),
            None => false,
        }
    }

    /// Drop the binding for a viewer regardless of which connection holds it
    pub fn unbind(&self, viewer_id: &str) -> Option<Arc<Viewer>> {
        let removed = self.live.remove(viewer_id).map(|(_, entry)| entry.viewer);
        if removed.is_some() {
            tracing::info!("Viewer unbound: {}", viewer_id);
        }
        removed
    }

    /// Drop the binding only if `connection_id` is still part of it
    pub fn release(&self, viewer_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .live
            .remove_if(viewer_id, |_, entry| entry.connections.contains_key(&connection_id))
            .is_some();
        if removed {
            tracing::info!("Viewer released: {} (connection {})", viewer_id, connection_id);
        }
        removed
    }

    pub fn is_registered(&self, viewer_id: &str) -> bool {
        self.live.contains_key(viewer_id)
    }

    pub fn viewer(&self, viewer_id: &str) -> Option<Arc<Viewer>> {
        self.live.get(viewer_id).map(|entry| Arc::clone(&entry.viewer))
    }

    pub fn viewers(&self) -> Vec<Arc<Viewer>> {
        self.live.iter().map(|entry| Arc::clone(&entry.viewer)).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
