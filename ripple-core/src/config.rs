//! Runtime configuration and statistics.

use serde::{Deserialize, Serialize};

/// Tunables for a [`Runtime`](crate::Runtime).
///
/// Every field has a default, so partial documents deserialize:
///
/// ```rust
/// let config: ripple_core::RuntimeConfig =
///     serde_json::from_str(r#"{ "label": "ui" }"#).unwrap();
/// assert_eq!(config.max_flush_iterations, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on flush rounds caused by consumers that keep notifying
    /// each other. Reaching it reports [`ReactiveError::FlushLimit`](crate::ReactiveError::FlushLimit).
    pub max_flush_iterations: usize,

    /// Number of edge slots reserved up front.
    pub edge_capacity: usize,

    /// Name attached to runtime-level log events.
    pub label: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: 100,
            edge_capacity: 256,
            label: "ripple".to_string(),
        }
    }
}

/// Snapshot of graph occupancy, mostly useful for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Nodes currently alive in the arena.
    pub nodes: usize,
    /// Edges currently linked between two nodes.
    pub live_edges: usize,
    /// Unlinked edges waiting in the pool.
    pub pooled_edges: usize,
    /// Edges that had to be freshly allocated.
    pub edges_allocated: u64,
    /// Edges handed out from the pool instead of allocated.
    pub edges_reused: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "max_flush_iterations": 8 }"#).unwrap();
        assert_eq!(config.max_flush_iterations, 8);
        assert_eq!(config.edge_capacity, 256);
        assert_eq!(config.label, "ripple");
    }

    #[test]
    fn stats_serialize() {
        let stats = RuntimeStats {
            nodes: 2,
            live_edges: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["nodes"], 2);
        assert_eq!(json["live_edges"], 1);
        assert_eq!(json["edges_reused"], 0);
    }
}
