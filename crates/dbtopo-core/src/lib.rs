pub mod config;
pub mod types;

pub use config::TopoConfig;
pub use types::*;
