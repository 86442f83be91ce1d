pub mod manager;
pub mod types;

pub use manager::{ConfigFormat, ConfigManager};
pub use types::*;
