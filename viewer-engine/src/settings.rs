// viewer-engine/src/settings.rs
use common::Config;
use std::time::Duration;

/// Timers and limits the engine runs with
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub handshake_ttl: Duration,
    pub reservation_ttl: Duration,
    pub receive_poll: Duration,
    pub handshake_attempts: u32,
    pub upload_stall: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            handshake_ttl: Duration::from_secs(20),
            reservation_ttl: Duration::from_secs(60),
            receive_poll: Duration::from_secs(5),
            handshake_attempts: 2,
            upload_stall: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        let t = &config.timeouts;
        Self {
            handshake_ttl: Duration::from_secs(t.handshake_ttl_secs),
            reservation_ttl: Duration::from_secs(t.reservation_ttl_secs),
            receive_poll: Duration::from_secs(t.receive_poll_secs),
            handshake_attempts: t.handshake_attempts.max(1),
            upload_stall: Duration::from_secs(t.upload_stall_secs),
        }
    }
}
