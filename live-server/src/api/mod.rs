// live-server/src/api/mod.rs
pub mod page;

pub use page::{page_route, IDENTITY_COOKIE};
