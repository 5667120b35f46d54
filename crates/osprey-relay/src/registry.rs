//! Credential registries.
//!
//! The session registry maps opaque session ids to the SSH material captured
//! when the interactive session was established, so a transfer channel can
//! re-dial the same host. The reconnect registry maps TTL-bounded tokens to
//! connection parameters; a background sweeper evicts expired entries.
//!
//! Both are dependency-injected services handed around as `Arc`, not process
//! globals, so tests can substitute their own instances.

use dashmap::DashMap;
use osprey_sftp::SshTarget;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cadence of the expired-token sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 128-bit session id as 32 hex characters.
///
/// Panics if the OS entropy source fails; there is no acceptable degraded
/// fallback for session identifiers.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 256-bit reconnect token as 64 hex characters. Same entropy contract as
/// [`generate_session_id`].
pub fn generate_reconnect_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Live SSH credential snapshots, keyed by session id.
///
/// Entries have no TTL; the interactive-session layer removes them when the
/// session ends.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SshTarget>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Store a snapshot; registering an existing id replaces it
    pub fn register(&self, id: impl Into<String>, target: Arc<SshTarget>) {
        self.sessions.insert(id.into(), target);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SshTarget>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a snapshot; absent ids are a no-op
    pub fn unregister(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Connection parameters recoverable through a reconnect token
#[derive(Debug, Clone)]
pub struct ReconnectInfo {
    /// host:port
    pub address: String,
    pub user: String,
    /// Opaque secret sufficient to rebuild authentication
    pub credential: String,
    /// Label naming the credential scheme (e.g. "password")
    pub auth_method: String,
    pub expires_at: Instant,
}

/// TTL-bounded reconnect tokens with lazy and periodic expiry.
pub struct ReconnectRegistry {
    tokens: DashMap<String, ReconnectInfo>,
    sweeper_started: AtomicBool,
}

impl Default for ReconnectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectRegistry {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            sweeper_started: AtomicBool::new(false),
        }
    }

    pub fn register(&self, token: impl Into<String>, info: ReconnectInfo) {
        self.tokens.insert(token.into(), info);
    }

    /// Look up a token. An expired entry is deleted on the spot and reported
    /// as a miss, so expiry is observable even between sweeps.
    pub fn get(&self, token: &str) -> Option<ReconnectInfo> {
        let info = self.tokens.get(token).map(|entry| entry.value().clone())?;
        if Instant::now() > info.expires_at {
            self.tokens.remove(token);
            return None;
        }
        Some(info)
    }

    pub fn unregister(&self, token: &str) {
        self.tokens.remove(token);
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    /// Drop every expired entry
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, info| now <= info.expires_at);
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            debug!("Swept {} expired reconnect tokens", removed);
        }
    }

    /// Launch the periodic sweeper. Only the first call spawns a task;
    /// returns whether this call was the one that started it.
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        });
        info!(
            "Reconnect token sweeper started (interval {:?})",
            SWEEP_INTERVAL
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_sftp::AuthCredential;

    fn target(address: &str) -> Arc<SshTarget> {
        Arc::new(SshTarget {
            address: address.into(),
            user: "deploy".into(),
            auth: vec![AuthCredential::Password("secret".into())],
            host_key: Arc::new(|_| true),
        })
    }

    fn reconnect_info(ttl: Duration) -> ReconnectInfo {
        ReconnectInfo {
            address: "files.example.com:22".into(),
            user: "deploy".into(),
            credential: "secret".into(),
            auth_method: "password".into(),
            expires_at: Instant::now() + ttl,
        }
    }

    #[test]
    fn test_session_register_get_unregister() {
        let registry = SessionRegistry::new();
        let id = generate_session_id();

        registry.register(id.clone(), target("a.example.com:22"));
        let found = registry.get(&id).unwrap();
        assert_eq!(found.address, "a.example.com:22");

        registry.unregister(&id);
        assert!(registry.get(&id).is_none());

        // Removing again is a no-op
        registry.unregister(&id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_session_register_last_write_wins() {
        let registry = SessionRegistry::new();
        registry.register("s1", target("old.example.com:22"));
        registry.register("s1", target("new.example.com:22"));

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("s1").unwrap().address, "new.example.com:22");
    }

    #[test]
    fn test_id_and_token_formats() {
        let id = generate_session_id();
        let token = generate_reconnect_token();

        assert_eq!(id.len(), 32);
        assert_eq!(token.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_session_id(), id);
    }

    #[test]
    fn test_reconnect_live_token_hits() {
        let registry = ReconnectRegistry::new();
        registry.register("t1", reconnect_info(Duration::from_secs(60)));

        let info = registry.get("t1").unwrap();
        assert_eq!(info.user, "deploy");
        assert_eq!(info.auth_method, "password");
    }

    #[test]
    fn test_reconnect_expired_token_misses_and_is_deleted() {
        let registry = ReconnectRegistry::new();
        let mut info = reconnect_info(Duration::from_secs(60));
        info.expires_at = Instant::now() - Duration::from_secs(1);
        registry.register("t1", info);

        assert!(registry.get("t1").is_none());
        // The lookup itself removed the entry
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let registry = ReconnectRegistry::new();
        let mut expired = reconnect_info(Duration::from_secs(60));
        expired.expires_at = Instant::now() - Duration::from_secs(1);
        registry.register("dead", expired);
        registry.register("live", reconnect_info(Duration::from_secs(60)));

        registry.sweep();

        assert_eq!(registry.count(), 1);
        assert!(registry.get("live").is_some());
    }

    #[tokio::test]
    async fn test_start_sweeper_is_first_call_wins() {
        let registry = Arc::new(ReconnectRegistry::new());
        assert!(registry.start_sweeper());
        assert!(!registry.start_sweeper());
        assert!(!registry.start_sweeper());
    }
}
