// viewer-engine/src/viewer.rs
use common::{FileFragment, IdentityRecord, StreamAction};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use crate::challenge::{Challenge, PurposeBook};
use crate::connection::{Connection, ConnectionId};
use crate::error::{LiveError, LiveResult, TransportError};
use crate::forms::{strip_challenge, CleanedForm};
use crate::registry::ConnectionRegistry;
use crate::scheduler::{schedule, DelayedPush};
use crate::settings::EngineSettings;
use crate::updates::{EnqueueOptions, Payload, PushOperation, QueuedUpdate, UpdateQueue};
use crate::uploads::{UploadHandle, UploadTable};

/// In-memory state of one viewer for the lifetime of one live connection
pub struct Viewer {
    viewer_id: String,
    identity: IdentityRecord,
    registry: Weak<ConnectionRegistry>,
    settings: EngineSettings,
    connections: RwLock<BTreeMap<ConnectionId, Arc<dyn Connection>>>,
    purposes: Mutex<PurposeBook>,
    updates: UpdateQueue,
    uploads: UploadTable,
}

impl Viewer {
    pub fn new(
        identity: IdentityRecord,
        registry: Weak<ConnectionRegistry>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            viewer_id: identity.viewer_id.clone(),
            identity,
            registry,
            settings,
            connections: RwLock::new(BTreeMap::new()),
            purposes: Mutex::new(PurposeBook::default()),
            updates: UpdateQueue::default(),
            uploads: UploadTable::default(),
        })
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }

    pub(crate) fn attach(&self, connections: BTreeMap<ConnectionId, Arc<dyn Connection>>) {
        let mut current = self
            .connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = connections;
    }

    pub fn connection_ids(&self) -> BTreeSet<ConnectionId> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect()
    }

    fn connection_handles(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// This session still owns the viewer's live connection set
    pub fn is_current(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.is_current(self),
            None => false,
        }
    }

    // ---- challenges ----

    pub fn challenge(&self, purpose: &str) -> Challenge {
        self.purposes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .issue(purpose)
    }

    /// Hidden `PURPOSE`/`CSRF` inputs to embed in a form for `purpose`
    pub fn issue_challenge(&self, purpose: &str) -> String {
        self.challenge(purpose).to_hidden_inputs()
    }

    /// Check and consume the challenge of a raw submission
    pub fn validate_and_strip(&self, form: Map<String, Value>) -> Option<CleanedForm> {
        if !self.is_current() {
            return None;
        }
        strip_challenge(&self.purposes, &self.uploads, self.settings.upload_stall, form)
    }

    pub fn outstanding_challenges(&self) -> usize {
        self.purposes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .outstanding()
    }

    // ---- uploads ----

    pub fn accept_fragment(&self, fragment: FileFragment) -> bool {
        self.uploads.accept(fragment)
    }

    /// Handle for a declared upload that has not been assembled yet.
    ///
    /// Parts are consumed by whichever handle assembles first.
    pub fn upload(&self, file_id: &str) -> LiveResult<UploadHandle> {
        self.uploads
            .handle(file_id, self.settings.upload_stall)
            .ok_or_else(|| LiveError::UnknownUpload(file_id.to_string()))
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    // ---- updates ----

    /// Queue a push for this viewer.
    ///
    /// Returns the element ID the push landed on (the generated child for
    /// `CreateNamed`), or `None` when the push was deferred.
    pub async fn enqueue(
        self: &Arc<Self>,
        payload: impl Into<Payload>,
        target: &str,
        operation: PushOperation,
        options: EnqueueOptions,
    ) -> LiveResult<Option<String>> {
        let content = payload.into().into_content()?;
        let push = DelayedPush {
            target: target.to_string(),
            content,
            operation,
            remove_after: options.remove_after,
            attributes: options.new_element_attributes,
        };

        if !options.non_blocking_delay.is_zero() {
            schedule(self, options.non_blocking_delay, push);
            return Ok(None);
        }
        if !options.blocking_delay.is_zero() {
            tokio::time::sleep(options.blocking_delay).await;
        }
        Ok(Some(self.apply(push).await))
    }

    pub async fn update(self: &Arc<Self>, payload: impl Into<Payload>, target: &str) -> LiveResult<Option<String>> {
        self.enqueue(payload, target, PushOperation::Update, EnqueueOptions::default())
            .await
    }

    pub async fn replace(self: &Arc<Self>, payload: impl Into<Payload>, target: &str) -> LiveResult<Option<String>> {
        self.enqueue(payload, target, PushOperation::Replace, EnqueueOptions::default())
            .await
    }

    pub async fn create_named(self: &Arc<Self>, payload: impl Into<Payload>, base: &str) -> LiveResult<Option<String>> {
        self.enqueue(payload, base, PushOperation::CreateNamed, EnqueueOptions::default())
            .await
    }

    pub async fn remove(self: &Arc<Self>, target: &str) -> LiveResult<Option<String>> {
        self.enqueue("", target, PushOperation::Remove, EnqueueOptions::default())
            .await
    }

    pub(crate) async fn apply(self: &Arc<Self>, push: DelayedPush) -> String {
        match push.operation {
            PushOperation::CreateNamed => {
                let base = push.target;
                let child = self.updates.reserve_child(&base);
                let anchor = format!("{}_create", base);
                let attributes = push
                    .attributes
                    .map(|attrs| format!(" {}", attrs.trim()))
                    .unwrap_or_default();
                let markup = format!(
                    "<div id='{}'{}></div><div id='{}'></div>",
                    child, attributes, anchor
                );
                self.submit(QueuedUpdate::new(StreamAction::Replace, anchor, markup))
                    .await;
                self.update_now(&child, push.content, push.remove_after).await;
                child
            }
            PushOperation::Update => {
                self.update_now(&push.target, push.content, push.remove_after)
                    .await;
                push.target
            }
            PushOperation::Replace => {
                self.submit(QueuedUpdate::new(StreamAction::Replace, &push.target, push.content))
                    .await;
                push.target
            }
            PushOperation::Remove => {
                self.submit(QueuedUpdate::new(StreamAction::Remove, &push.target, ""))
                    .await;
                push.target
            }
        }
    }

    async fn update_now(self: &Arc<Self>, target: &str, content: String, remove_after: Duration) {
        let (queued, start) = self
            .updates
            .push_if_changed(QueuedUpdate::new(StreamAction::Update, target, content));
        if !queued {
            tracing::trace!("Suppressed unchanged update of {} for viewer {}", target, self.viewer_id);
        }
        if start {
            self.drain().await;
        }
        if !remove_after.is_zero() {
            schedule(self, remove_after, DelayedPush::removal(target));
        }
    }

    async fn submit(&self, update: QueuedUpdate) {
        if self.updates.push(update) {
            self.drain().await;
        }
    }

    // Only the caller that claimed the drain gets here
    async fn drain(&self) {
        loop {
            if !self.is_current() {
                let dropped = self.updates.discard();
                tracing::debug!(
                    "Viewer {} is no longer current; dropped {} queued updates",
                    self.viewer_id,
                    dropped
                );
                return;
            }
            let Some(update) = self.updates.next() else {
                return;
            };
            if let Err(e) = self.send_frame(update.render()).await {
                self.updates.abort();
                tracing::warn!("Delivery to viewer {} failed: {}", self.viewer_id, e);
                return;
            }
            self.updates.record_sent(&update);
        }
    }

    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let handles = self.connection_handles();
        if handles.is_empty() {
            return Err(TransportError::Closed);
        }
        for connection in handles {
            connection.send(frame.clone()).await?;
        }
        Ok(())
    }

    /// Content last delivered to `target`, if any
    pub fn cached_content(&self, target: &str) -> Option<String> {
        self.updates.cached(target)
    }

    pub fn pending_updates(&self) -> usize {
        self.updates.pending_len()
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("viewer_id", &self.viewer_id)
            .field("identity", &self.identity)
            .finish()
    }
}
