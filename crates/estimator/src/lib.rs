pub mod config;
pub mod size;

pub use config::*;
pub use size::*;
