pub mod bridge;
pub mod config;
pub mod voice;

pub use bridge::*;
pub use config::*;
pub use voice::*;
