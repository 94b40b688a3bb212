//! Session store configuration (§4.2).

/// Configuration accepted by the session manager. Defaults match spec §4.2.
#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    /// Idle duration after which a session is considered expired and
    /// unreachable. Default 30 minutes.
    pub session_timeout_ms: u64,
    /// Hard upper bound on concurrently retained sessions. Default 100.
    pub max_sessions: usize,
    /// When true, a background sweeper rotates sessions older than
    /// `key_rotation_interval_ms`.
    pub enable_forward_secrecy: bool,
    /// Max age before a session is rotated. Default 15 minutes.
    pub key_rotation_interval_ms: u64,
    /// Interval of the coarse background sweep that removes idle-expired
    /// sessions regardless of access pattern. Not an §4.2 option in itself,
    /// but the sweep cadence §4.2 requires; exposed so tests can shrink it.
    pub sweep_interval_ms: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 30 * 60 * 1000,
            max_sessions: 100,
            enable_forward_secrecy: false,
            key_rotation_interval_ms: 15 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}
