// viewer-engine/src/scheduler.rs
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::updates::PushOperation;
use crate::viewer::Viewer;

/// A push whose content is already normalized, waiting to be applied
#[derive(Debug, Clone)]
pub(crate) struct DelayedPush {
    pub target: String,
    pub content: String,
    pub operation: PushOperation,
    pub remove_after: Duration,
    pub attributes: Option<String>,
}

impl DelayedPush {
    pub fn removal(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            content: String::new(),
            operation: PushOperation::Remove,
            remove_after: Duration::ZERO,
            attributes: None,
        }
    }
}

/// Submit a push to run after `delay` without blocking the caller.
///
/// The task holds only a weak reference; a viewer dropped in the meantime
/// cancels the push.
pub(crate) fn schedule(viewer: &Arc<Viewer>, delay: Duration, push: DelayedPush) -> JoinHandle<()> {
    let viewer: Weak<Viewer> = Arc::downgrade(viewer);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(viewer) = viewer.upgrade() else {
            return;
        };
        let target = viewer.apply(push).await;
        tracing::trace!("Deferred push applied to {} for viewer {}", target, viewer.viewer_id());
    })
}
