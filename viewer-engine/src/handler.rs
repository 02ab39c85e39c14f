// viewer-engine/src/handler.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::forms::CleanedForm;
use crate::viewer::Viewer;

/// Application callbacks driven by the engine.
///
/// Each callback runs on its own task, so a slow handler never stalls the
/// receive loop of the connection that triggered it.
#[async_trait]
pub trait ViewerHandler: Send + Sync + 'static {
    /// A connection finished its handshake and is now live
    async fn on_new_visitor(&self, viewer: Arc<Viewer>);

    /// A submission passed its challenge
    async fn on_form_submit(&self, viewer: Arc<Viewer>, form: CleanedForm);

    /// The viewer's connection closed or was replaced
    async fn on_visitor_left(&self, viewer: Arc<Viewer>);
}
