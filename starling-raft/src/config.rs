//! Consensus configuration.

use starling_core::NodeId;

use crate::limits::CLUSTER_SIZE_MAX;

/// Returns the typical Byzantine quorum size for a cluster of `n` nodes,
/// `ceil((2n + 1) / 3) + 1`, clamped to the cluster size.
///
/// Deployments tolerating `f` Byzantine nodes need `n >= 3f + 1`; small
/// test clusters usually pass an explicit quorum instead.
#[must_use]
pub const fn byzantine_quorum(n: usize) -> usize {
    let quorum = (2 * n + 1).div_ceil(3) + 1;
    if quorum > n {
        n
    } else {
        quorum
    }
}

/// Configuration for a consensus node.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's ID.
    pub node_id: NodeId,

    /// IDs of all nodes in the cluster (including this one).
    pub cluster: Vec<NodeId>,

    /// Number of votes that constitutes a quorum.
    ///
    /// Specified directly; `byzantine_quorum` provides the typical value.
    pub quorum_size: usize,
}

impl RaftConfig {
    /// Creates a new configuration with the default Byzantine quorum.
    ///
    /// # Panics
    /// Panics if the cluster is empty or too large, or if this node is not
    /// in the cluster.
    #[must_use]
    pub fn new(node_id: NodeId, cluster: Vec<NodeId>) -> Self {
        assert!(!cluster.is_empty(), "cluster cannot be empty");
        assert!(
            cluster.len() <= CLUSTER_SIZE_MAX,
            "cluster size {} exceeds maximum {}",
            cluster.len(),
            CLUSTER_SIZE_MAX
        );
        assert!(cluster.contains(&node_id), "node_id must be in cluster");

        let quorum_size = byzantine_quorum(cluster.len());
        Self {
            node_id,
            cluster,
            quorum_size,
        }
    }

    /// Sets an explicit quorum size.
    ///
    /// # Panics
    /// Panics if the quorum is zero, exceeds the cluster size, or is not
    /// a majority.
    #[must_use]
    pub fn with_quorum_size(mut self, quorum_size: usize) -> Self {
        assert!(quorum_size > 0, "quorum cannot be zero");
        assert!(
            quorum_size <= self.cluster.len(),
            "quorum {} exceeds cluster size {}",
            quorum_size,
            self.cluster.len()
        );
        assert!(
            quorum_size > self.cluster.len() / 2,
            "quorum {} is not a majority of {}",
            quorum_size,
            self.cluster.len()
        );

        self.quorum_size = quorum_size;
        self
    }

    /// Returns the number of nodes in the cluster.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.cluster.len()
    }

    /// Returns the other nodes in the cluster (excluding this node).
    #[must_use]
    pub fn peers(&self) -> Vec<NodeId> {
        self.cluster
            .iter()
            .copied()
            .filter(|&id| id != self.node_id)
            .collect()
    }

    /// Returns true if `node_id` is a member of the cluster.
    #[must_use]
    pub fn is_member(&self, node_id: NodeId) -> bool {
        self.cluster.contains(&node_id)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.cluster.is_empty() {
            return Err("cluster cannot be empty");
        }
        if self.cluster.len() > CLUSTER_SIZE_MAX {
            return Err("cluster too large");
        }
        if !self.cluster.contains(&self.node_id) {
            return Err("node_id not in cluster");
        }
        if self.quorum_size == 0 || self.quorum_size > self.cluster.len() {
            return Err("quorum size out of range");
        }
        if self.quorum_size <= self.cluster.len() / 2 {
            return Err("quorum size is not a majority");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_basics() {
        let cluster = vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)];
        let config = RaftConfig::new(NodeId::new(1), cluster).with_quorum_size(2);

        assert_eq!(config.cluster_size(), 3);
        assert_eq!(config.quorum_size, 2);
        assert_eq!(config.peers().len(), 2);
        assert!(config.is_member(NodeId::new(3)));
        assert!(!config.is_member(NodeId::new(4)));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "cluster cannot be empty")]
    fn test_empty_cluster_panics() {
        let _ = RaftConfig::new(NodeId::new(1), vec![]);
    }

    #[test]
    #[should_panic(expected = "node_id must be in cluster")]
    fn test_node_not_in_cluster_panics() {
        let cluster = vec![NodeId::new(2), NodeId::new(3)];
        let _ = RaftConfig::new(NodeId::new(1), cluster);
    }

    #[test]
    #[should_panic(expected = "is not a majority")]
    fn test_minority_quorum_panics() {
        let cluster = vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)];
        let _ = RaftConfig::new(NodeId::new(1), cluster).with_quorum_size(1);
    }

    #[test]
    fn test_byzantine_quorum_values() {
        // n = 3f + 1 clusters.
        assert_eq!(byzantine_quorum(4), 4);
        assert_eq!(byzantine_quorum(7), 6);

        // Small clusters clamp to n.
        assert_eq!(byzantine_quorum(1), 1);
        assert_eq!(byzantine_quorum(3), 3);
    }

    #[test]
    fn test_default_quorum_is_valid() {
        let cluster = vec![
            NodeId::new(1),
            NodeId::new(2),
            NodeId::new(3),
            NodeId::new(4),
        ];
        let config = RaftConfig::new(NodeId::new(1), cluster);
        assert_eq!(config.quorum_size, 4);
        assert!(config.validate().is_ok());
    }
}
