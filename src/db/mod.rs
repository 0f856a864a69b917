pub mod pool;
pub mod workspaces;

pub use pool::{create_pool, health_check};
