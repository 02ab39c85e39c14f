pub mod config;
pub mod messages;
pub mod models;
pub mod seal;
pub mod utils;

pub use config::*;
pub use messages::*;
pub use models::identity::*;
pub use seal::*;
pub use utils::*;
