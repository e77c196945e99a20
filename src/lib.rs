/*!
 * dfsmon - Namespace and Replication Health Monitor
 *
 * Periodically probes a distributed file namespace and its replication
 * topology, scores health, and publishes point-in-time snapshots:
 * - Bounded-parallelism collectors with per-unit failure isolation
 * - Versioned configuration with optimistic concurrency over a shared path
 * - Durable local persistence with outbox replay to a remote status root
 * - At-least-once "collect now" command intake
 * - Single worker loop woken by timer, signal or command arrival
 *
 * Topology facts come from a `dfsmon_topology::TopologyProvider`.
 */

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod store;
pub mod wake;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, ServiceSettings};
pub use error::{MonitorError, Result, SaveOutcome};
pub use model::{Health, Snapshot};
pub use orchestrator::Orchestrator;
pub use wake::{WakeReason, WakeSignal};
pub use worker::Worker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
