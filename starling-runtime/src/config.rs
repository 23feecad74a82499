//! Runtime configuration.
//!
//! Configuration for a production consensus server.

use std::time::Duration;

use starling_core::NodeId;
use starling_raft::{byzantine_quorum, RaftConfig};
use thiserror::Error;

/// Configuration for a consensus server node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This node's unique identifier.
    pub node_id: NodeId,
    /// All cluster members, including this node.
    pub cluster: Vec<NodeId>,
    /// Number of votes that constitutes a quorum.
    pub quorum_size: usize,
    /// Timing configuration.
    pub timing: TimingConfig,
}

impl ServerConfig {
    /// Creates a new server configuration with the default Byzantine
    /// quorum and default timing.
    #[must_use]
    pub fn new(node_id: NodeId, cluster: Vec<NodeId>) -> Self {
        let quorum_size = byzantine_quorum(cluster.len());
        Self {
            node_id,
            cluster,
            quorum_size,
            timing: TimingConfig::default(),
        }
    }

    /// Sets an explicit quorum size.
    #[must_use]
    pub fn with_quorum_size(mut self, quorum_size: usize) -> Self {
        self.quorum_size = quorum_size;
        self
    }

    /// Sets the timing configuration.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Builds the consensus-core configuration.
    #[must_use]
    pub fn raft_config(&self) -> RaftConfig {
        RaftConfig::new(self.node_id, self.cluster.clone()).with_quorum_size(self.quorum_size)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cluster.contains(&self.node_id) {
            return Err(ConfigError::InvalidCluster {
                message: "node_id must be in cluster".to_string(),
            });
        }
        if self.quorum_size == 0 || self.quorum_size > self.cluster.len() {
            return Err(ConfigError::InvalidCluster {
                message: format!(
                    "quorum {} out of range for cluster of {}",
                    self.quorum_size,
                    self.cluster.len()
                ),
            });
        }
        self.timing.validate()
    }
}

/// Timing configuration for elections and heartbeats.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Minimum election timeout.
    pub election_timeout_min: Duration,
    /// Maximum election timeout.
    pub election_timeout_max: Duration,
    /// Heartbeat interval; must be strictly less than the minimum
    /// election timeout.
    pub heartbeat_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}

impl TimingConfig {
    /// Creates timing config suitable for testing (faster timeouts).
    #[must_use]
    pub const fn fast_for_testing() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(50),
            election_timeout_max: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(20),
        }
    }

    /// Validates the timing configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_max < self.election_timeout_min {
            return Err(ConfigError::InvalidTiming {
                message: "election_timeout_max must be >= election_timeout_min".to_string(),
            });
        }

        if self.election_timeout_min <= self.heartbeat_interval {
            return Err(ConfigError::InvalidTiming {
                message: "election_timeout_min must be > heartbeat_interval".to_string(),
            });
        }

        Ok(())
    }

    /// Generates a random election timeout within the configured range.
    #[must_use]
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;

        // Safe cast: timeouts are far below u64 milliseconds.
        #[allow(clippy::cast_possible_truncation)]
        let min_ms = self.election_timeout_min.as_millis() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let max_ms = self.election_timeout_max.as_millis() as u64;
        let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid timing configuration.
    #[error("invalid timing: {message}")]
    InvalidTiming {
        /// Error description.
        message: String,
    },
    /// Invalid cluster configuration.
    #[error("invalid cluster: {message}")]
    InvalidCluster {
        /// Error description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_valid() {
        let timing = TimingConfig::default();
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_fast_timing_is_valid() {
        let timing = TimingConfig::fast_for_testing();
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_invalid_election_timeout_range() {
        let timing = TimingConfig {
            election_timeout_min: Duration::from_millis(200),
            election_timeout_max: Duration::from_millis(100),
            ..Default::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_undercut_election_timeout() {
        let timing = TimingConfig {
            heartbeat_interval: Duration::from_millis(200),
            ..Default::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_random_election_timeout_in_range() {
        let timing = TimingConfig::default();
        for _ in 0..100 {
            let timeout = timing.random_election_timeout();
            assert!(timeout >= timing.election_timeout_min);
            assert!(timeout <= timing.election_timeout_max);
        }
    }

    #[test]
    fn test_server_config_builds_raft_config() {
        let cluster = vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)];
        let config = ServerConfig::new(NodeId::new(1), cluster).with_quorum_size(2);
        assert!(config.validate().is_ok());

        let raft = config.raft_config();
        assert_eq!(raft.quorum_size, 2);
        assert_eq!(raft.cluster_size(), 3);
    }

    #[test]
    fn test_server_config_rejects_foreign_node() {
        let cluster = vec![NodeId::new(2), NodeId::new(3)];
        let config = ServerConfig {
            node_id: NodeId::new(1),
            cluster,
            quorum_size: 2,
            timing: TimingConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
