//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! Every queue, buffer, and resource has an explicit maximum size.
//! This prevents unbounded growth and makes the system predictable.

/// System-wide limits for Starling.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Message limits.
    /// Maximum size of a single command payload in bytes.
    pub max_command_bytes: u32,
    /// Maximum number of entries in a single append request.
    pub max_entries_per_append: u32,

    // Consensus limits.
    /// Maximum number of nodes in a cluster.
    pub max_cluster_size: u32,
    /// Maximum size of the replicated log before the node refuses appends.
    pub max_log_entries: u64,
    /// Maximum number of distinct client sessions in the replay map.
    pub max_client_sessions: u64,

    // Timeout limits (in microseconds).
    /// Heartbeat interval.
    pub heartbeat_interval_us: u64,
    /// Election timeout minimum.
    pub election_timeout_min_us: u64,
    /// Election timeout maximum.
    pub election_timeout_max_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// These defaults are chosen to be conservative and safe for most
    /// deployments. Production systems should tune these based on their
    /// hardware and workload characteristics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Messages: 1MB commands, 1000 entries per append.
            max_command_bytes: 1024 * 1024,
            max_entries_per_append: 1000,

            // Consensus: 7 nodes, 1M log entries, 100k client sessions.
            max_cluster_size: 7,
            max_log_entries: 1_000_000,
            max_client_sessions: 100_000,

            // Timeouts: 50ms heartbeat, 150-300ms election.
            heartbeat_interval_us: 50 * 1000,
            election_timeout_min_us: 150 * 1000,
            election_timeout_max_us: 300 * 1000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_command_bytes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_command_bytes",
                reason: "must be positive",
            });
        }

        if self.max_cluster_size == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_cluster_size",
                reason: "must be positive",
            });
        }

        // Election timeout must be greater than heartbeat.
        if self.election_timeout_min_us <= self.heartbeat_interval_us {
            return Err(crate::Error::InvalidArgument {
                name: "election_timeout_min_us",
                reason: "must be > heartbeat_interval_us",
            });
        }

        // Election timeout range must be valid.
        if self.election_timeout_max_us < self.election_timeout_min_us {
            return Err(crate::Error::InvalidArgument {
                name: "election_timeout_max_us",
                reason: "must be >= election_timeout_min_us",
            });
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
