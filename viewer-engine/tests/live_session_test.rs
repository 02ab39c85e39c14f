// viewer-engine/tests/live_session_test.rs
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::ChaChaSealer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use viewer_engine::testing::{sample_metadata, HandlerEvent, RecordingHandler, ScriptedConnection};
use viewer_engine::{Connection, EngineSettings, LiveEngine, LiveError, PageGrant, RejectReason};

fn engine() -> (Arc<LiveEngine>, UnboundedReceiver<HandlerEvent>) {
    let (handler, events) = RecordingHandler::new();
    let engine = LiveEngine::new(
        Arc::new(ChaChaSealer::from_secret("integration-secret")),
        handler,
        EngineSettings::default(),
    );
    (Arc::new(engine), events)
}

fn serve(engine: &Arc<LiveEngine>, conn: &Arc<ScriptedConnection>, grant: &PageGrant) -> JoinHandle<()> {
    let engine = Arc::clone(engine);
    let conn: Arc<dyn Connection> = conn.clone();
    let cookie = Some(grant.identity_token.clone());
    tokio::spawn(async move { engine.serve(conn, sample_metadata(), cookie).await })
}

async fn next_event(events: &mut UnboundedReceiver<HandlerEvent>) -> HandlerEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("handler event in time")
        .expect("handler channel open")
}

fn rejection(result: Result<Arc<viewer_engine::Viewer>, LiveError>) -> RejectReason {
    match result {
        Err(LiveError::HandshakeRejected(reason)) => reason,
        other => panic!("expected a handshake rejection, got {:?}", other.map(|v| v.viewer_id().to_string())),
    }
}

#[tokio::test]
async fn test_new_visitor_connects_and_leaves() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = engine();

    // 1. Page load without a cookie reserves a viewer
    let grant = engine.page_load(&sample_metadata(), None)?;
    assert!(grant.new_visitor);
    assert!(engine.handshakes().is_reserved(&grant.viewer_id));

    // 2. Connection presents the handshake token first
    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    let task = serve(&engine, &conn, &grant);

    match next_event(&mut events).await {
        HandlerEvent::NewVisitor(id) => assert_eq!(id, grant.viewer_id),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(engine.registry().is_registered(&grant.viewer_id));
    assert!(!engine.handshakes().is_reserved(&grant.viewer_id));

    // 3. Pushes reach the bound connection
    let viewer = engine.registry().viewer(&grant.viewer_id).expect("bound viewer");
    viewer.update("<p>hi</p>", "mainDiv").await?;
    assert_eq!(
        conn.sent(),
        vec![r#"<turbo-stream action="update" target="mainDiv"><template><p>hi</p></template></turbo-stream>"#.to_string()]
    );

    // 4. Peer hangs up
    conn.hang_up();
    match next_event(&mut events).await {
        HandlerEvent::VisitorLeft(id) => assert_eq!(id, grant.viewer_id),
        other => panic!("unexpected event {:?}", other),
    }
    task.await?;
    assert!(conn.is_closed());
    assert!(engine.registry().is_empty());
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_handshake_after_expiry_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;

    tokio::time::advance(Duration::from_secs(21)).await;

    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    serve(&engine, &conn, &grant).await?;

    assert!(conn.is_closed());
    assert!(!engine.registry().is_registered(&grant.viewer_id));
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_consumed_handshake_cannot_be_replayed() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;

    let first = ScriptedConnection::new();
    first.push_text(grant.handshake_token.clone());
    engine
        .connect(first.clone(), &sample_metadata(), Some(&grant.identity_token))
        .await?;

    // A reload re-arms the reservation, but the old token is spent
    engine.page_load(&sample_metadata(), Some(&grant.identity_token))?;
    let replay = ScriptedConnection::new();
    replay.push_text(grant.handshake_token.clone());
    let result = engine
        .connect(replay.clone(), &sample_metadata(), Some(&grant.identity_token))
        .await;
    assert_eq!(rejection(result), RejectReason::UnknownToken);
    Ok(())
}

#[tokio::test]
async fn test_cross_origin_connection_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;

    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    let foreign = sample_metadata().with_origin(Some("https://evil.test"));
    let result = engine.connect(conn, &foreign, Some(&grant.identity_token)).await;
    assert_eq!(rejection(result), RejectReason::CrossOrigin);
    Ok(())
}

#[tokio::test]
async fn test_missing_identity_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;

    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    let result = engine.connect(conn, &sample_metadata(), None).await;
    assert_eq!(rejection(result), RejectReason::IdentityMismatch);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_times_out() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;

    let conn = ScriptedConnection::new();
    let result = engine
        .connect(conn, &sample_metadata(), Some(&grant.identity_token))
        .await;
    assert_eq!(rejection(result), RejectReason::NoHandshake);
    Ok(())
}

#[tokio::test]
async fn test_form_challenge_is_single_use() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;
    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    let task = serve(&engine, &conn, &grant);
    assert!(matches!(next_event(&mut events).await, HandlerEvent::NewVisitor(_)));

    let viewer = engine.registry().viewer(&grant.viewer_id).expect("bound viewer");
    let challenge = viewer.challenge("login");
    let frame = json!({"PURPOSE": challenge.purpose, "CSRF": challenge.secret, "username": "bob"}).to_string();

    conn.push_text(frame.clone());
    match next_event(&mut events).await {
        HandlerEvent::FormSubmit(_, form) => {
            assert_eq!(
                serde_json::Value::Object(form.into_fields()),
                json!({"PURPOSE": "login", "username": "bob"})
            );
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Replay is dropped; the next callback is the departure
    conn.push_text(frame);
    conn.hang_up();
    assert!(matches!(next_event(&mut events).await, HandlerEvent::VisitorLeft(_)));
    task.await?;
    Ok(())
}

#[tokio::test]
async fn test_upload_fragments_in_reverse_order() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = engine();
    let grant = engine.page_load(&sample_metadata(), None)?;
    let conn = ScriptedConnection::new();
    conn.push_text(grant.handshake_token.clone());
    let task = serve(&engine, &conn, &grant);
    assert!(matches!(next_event(&mut events).await, HandlerEvent::NewVisitor(_)));

    let viewer = engine.registry().viewer(&grant.viewer_id).expect("bound viewer");
    let challenge = viewer.challenge("upload");
    let parts: [&[u8]; 3] = [b"alpha-", b"beta-", b"gamma"];
    conn.push_text(
        json!({
            "PURPOSE": challenge.purpose,
            "CSRF": challenge.secret,
            "FILES": {"doc": [{"FILEID": "file-7", "NAME": "notes.txt", "SIZE": 16, "MIME": "text/plain", "MAXPART": 2}]}
        })
        .to_string(),
    );
    for (index, part) in parts.iter().enumerate().rev() {
        conn.push_text(
            json!({"ISFILE": true, "FILEID": "file-7", "CURRENT": index, "DATA": STANDARD.encode(part)}).to_string(),
        );
    }

    let form = match next_event(&mut events).await {
        HandlerEvent::FormSubmit(_, form) => form,
        other => panic!("unexpected event {:?}", other),
    };
    let upload = &form.uploads("doc")[0];
    assert_eq!(upload.name(), "notes.txt");
    assert_eq!(upload.mime_type(), "text/plain");
    assert_eq!(upload.assemble().await?, b"alpha-beta-gamma".to_vec());
    assert_eq!(viewer.pending_uploads(), 0);

    conn.hang_up();
    task.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_previous_session() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = engine();

    let first_grant = engine.page_load(&sample_metadata(), None)?;
    let first = ScriptedConnection::new();
    first.push_text(first_grant.handshake_token.clone());
    let first_task = serve(&engine, &first, &first_grant);
    assert!(matches!(next_event(&mut events).await, HandlerEvent::NewVisitor(_)));
    let old_viewer = engine.registry().viewer(&first_grant.viewer_id).expect("bound viewer");

    // Same browser reloads: the viewer ID survives
    let second_grant = engine.page_load(&sample_metadata(), Some(&first_grant.identity_token))?;
    assert_eq!(second_grant.viewer_id, first_grant.viewer_id);
    let second = ScriptedConnection::new();
    second.push_text(second_grant.handshake_token.clone());
    let second_task = serve(&engine, &second, &second_grant);
    assert!(matches!(next_event(&mut events).await, HandlerEvent::NewVisitor(_)));

    // The old loop notices on its next poll and leaves without unbinding the new one
    assert!(matches!(next_event(&mut events).await, HandlerEvent::VisitorLeft(_)));
    first_task.await?;
    assert!(!old_viewer.is_current());
    assert!(first.is_closed());
    assert!(engine.registry().is_registered(&first_grant.viewer_id));

    second.hang_up();
    assert!(matches!(next_event(&mut events).await, HandlerEvent::VisitorLeft(_)));
    second_task.await?;
    assert!(engine.registry().is_empty());
    Ok(())
}
