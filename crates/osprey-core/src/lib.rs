//! Shared error and configuration types for the Osprey relay.

mod error;
mod types;

pub use error::{OspreyError, Result};
pub use types::ServerConfig;
