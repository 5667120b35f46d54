//! # Osprey SFTP
//!
//! SFTP transfer layer for the Osprey relay.
//!
//! Dials an independent SSH connection from cached credentials, speaks SFTP
//! protocol version 3 over the subsystem channel, and paces uploads with a
//! latency-adaptive token bucket.
//!
//! ## Features
//!
//! - Async/await with Tokio over `russh` client channels
//! - Request-id-matched RPC dispatch (concurrent in-flight requests)
//! - File operations (read, write, delete, rename)
//! - Directory operations (list, create with parents, remove)
//! - Concurrent offset-ordered upload writes
//! - AIMD upload rate control driven by an injectable latency probe

pub mod client;
pub mod error;
pub mod protocol;
pub mod rate_limit;

pub use client::{AuthCredential, HostKeyVerifier, SftpRttProbe, SftpSession, SshTarget};
pub use error::{Error, Result};
pub use rate_limit::{AdaptiveRateLimiter, LatencyProbe, ThrottledWriter};
