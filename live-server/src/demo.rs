// live-server/src/demo.rs
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use viewer_engine::{CleanedForm, EnqueueOptions, LiveResult, PushOperation, UploadHandle, Viewer, ViewerHandler};

use crate::utils::html::escape;

const NOTICES: &str = "notices";
const NOTICE_LIFETIME: Duration = Duration::from_secs(8);

/// Sample application: a greeting, a challenge-protected form and
/// transient notices for each accepted submission.
#[derive(Debug, Default)]
pub struct DemoHandler;

impl DemoHandler {
    pub fn new() -> Self {
        Self
    }

    fn login_form(viewer: &Viewer) -> String {
        format!(
            r#"<form onsubmit="return submit_ws(this)">{}<input name="username" placeholder="Name"><input type="file" name="attachment" multiple><button type="submit">Send</button></form>"#,
            viewer.issue_challenge("login")
        )
    }

    async fn notice(viewer: &Arc<Viewer>, text: &str) -> LiveResult<Option<String>> {
        let options = EnqueueOptions::new()
            .remove_after(NOTICE_LIFETIME)
            .attributes("class='notice'");
        viewer
            .enqueue(escape(text), NOTICES, PushOperation::CreateNamed, options)
            .await
    }

    async fn digest_upload(viewer: &Arc<Viewer>, upload: &UploadHandle) -> LiveResult<()> {
        let bytes = upload.assemble().await?;
        let digest = hex::encode(Sha256::digest(&bytes));
        tracing::info!(
            "Viewer {} uploaded {} ({} bytes, {})",
            viewer.viewer_id(),
            upload.name(),
            bytes.len(),
            upload.mime_type()
        );
        Self::notice(viewer, &format!("Received {} ({} bytes, sha256 {})", upload.name(), bytes.len(), digest)).await?;
        Ok(())
    }

    async fn handle_login(viewer: &Arc<Viewer>, form: &CleanedForm) -> LiveResult<()> {
        // Each challenge is single use, so the form is re-rendered with a fresh one
        viewer.update(Self::login_form(viewer), "loginForm").await?;

        let name = form.get_str("username").unwrap_or_default().trim();
        let greeting = if name.is_empty() {
            "Hello, stranger".to_string()
        } else {
            format!("Hello, {}", name)
        };
        Self::notice(viewer, &greeting).await?;

        for upload in form.all_uploads() {
            if let Err(e) = Self::digest_upload(viewer, upload).await {
                tracing::warn!("Upload {} from {} failed: {}", upload.file_id(), viewer.viewer_id(), e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ViewerHandler for DemoHandler {
    async fn on_new_visitor(&self, viewer: Arc<Viewer>) {
        let body = format!(
            r#"<h1>Live</h1><p>Viewer <code>{}</code></p><div id="loginForm">{}</div><div id="{}_create"></div>"#,
            escape(viewer.viewer_id()),
            Self::login_form(&viewer),
            NOTICES
        );
        if let Err(e) = viewer.update(body, "mainDiv").await {
            tracing::warn!("Could not render page for {}: {}", viewer.viewer_id(), e);
        }
    }

    async fn on_form_submit(&self, viewer: Arc<Viewer>, form: CleanedForm) {
        let result = match form.purpose() {
            "login" => Self::handle_login(&viewer, &form).await,
            other => {
                tracing::debug!("No handler for purpose {}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("Form from {} failed: {}", viewer.viewer_id(), e);
        }
    }

    async fn on_visitor_left(&self, viewer: Arc<Viewer>) {
        tracing::debug!(
            "Viewer {} left with {} pending uploads",
            viewer.viewer_id(),
            viewer.pending_uploads()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use viewer_engine::testing::{sample_identity, ScriptedConnection};
    use viewer_engine::{ConnectionRegistry, EngineSettings};

    fn bound_viewer() -> (Arc<ConnectionRegistry>, Arc<Viewer>, Arc<ScriptedConnection>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let viewer = Viewer::new(sample_identity("demo-viewer"), Arc::downgrade(&registry), EngineSettings::default());
        let connection = ScriptedConnection::new();
        registry.bind(Arc::clone(&viewer), connection.clone());
        (registry, viewer, connection)
    }

    #[tokio::test]
    async fn test_new_visitor_gets_challenge_form() {
        let (_registry, viewer, connection) = bound_viewer();
        DemoHandler::new().on_new_visitor(Arc::clone(&viewer)).await;

        let sent = connection.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#"target="mainDiv""#));
        assert!(sent[0].contains(r#"name="CSRF""#));
        assert_eq!(viewer.outstanding_challenges(), 1);
    }

    #[tokio::test]
    async fn test_login_posts_escaped_notice() {
        let (_registry, viewer, connection) = bound_viewer();
        let challenge = viewer.challenge("login");
        let Value::Object(raw) = json!({"PURPOSE": challenge.purpose, "CSRF": challenge.secret, "username": "<bob>"}) else {
            unreachable!()
        };
        let form = viewer.validate_and_strip(raw).expect("valid challenge");

        DemoHandler::new().on_form_submit(Arc::clone(&viewer), form).await;

        let sent = connection.sent();
        assert!(sent[0].contains(r#"target="loginForm""#));
        assert!(sent.iter().any(|frame| frame.contains("Hello, &lt;bob&gt;")));
        assert!(!sent.iter().any(|frame| frame.contains("<bob>")));
    }
}
