#![doc = "Common types shared across the rteval workspace."]

pub mod config;
pub mod error;
pub mod params;
pub mod state;

pub use config::*;
pub use error::*;
pub use params::*;
pub use state::*;
