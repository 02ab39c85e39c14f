// live-server/src/actors/mod.rs
pub mod client_session_actor;
pub mod housekeeping;
