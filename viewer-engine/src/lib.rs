// viewer-engine/src/lib.rs
//! Binds browser viewers to live connections and delivers ordered,
//! de-duplicated page updates to them.
pub mod challenge;
pub mod connection;
pub mod engine;
pub mod error;
pub mod forms;
pub mod handler;
pub mod handshake;
pub mod registry;
mod scheduler;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod updates;
pub mod uploads;
pub mod viewer;

pub use challenge::Challenge;
pub use connection::{Connection, ConnectionId};
pub use engine::{EngineStats, LiveEngine, PageGrant};
pub use error::{LiveError, LiveResult, RejectReason, TransportError};
pub use forms::CleanedForm;
pub use handler::ViewerHandler;
pub use handshake::HandshakeCoordinator;
pub use registry::ConnectionRegistry;
pub use settings::EngineSettings;
pub use updates::{EnqueueOptions, Payload, PushOperation};
pub use uploads::UploadHandle;
pub use viewer::Viewer;
