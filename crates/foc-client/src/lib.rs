pub mod control;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod node;
pub mod poll;

pub use control::ControlPlane;
pub use dispatch::{dispatch_bulk, spawn_dispatch, BulkCommand, DispatchSummary};
pub use error::ClientError;
pub use events::{events_url, parse_event_frame, run_event_stream};
pub use node::AgentService;
pub use poll::{
    height_targets, peer_targets, spawn_height_cycle, spawn_peer_refresh, spawn_roster_load,
    HeightTarget, PeerTarget,
};

use std::collections::HashMap;

use foc_core::{Agent, AgentId, CycleId, EnvId, Height, PeerMetricsSample};
use serde_json::Value;

/// Messages delivered from the network tasks to the console's driver loop.
/// All shared state is committed there, one message per scheduler turn, so
/// per-agent results arrive individually rather than as batch commits.
#[derive(Debug)]
pub enum ClientEvent {
    /// A full roster replacing the previous one.
    Roster(Vec<Agent>),
    /// The roster fetch failed; the previous roster stays untouched.
    RosterFailed(String),
    /// The resolved env-id → network-name map for the latest roster load.
    /// Envs whose lookup failed are absent and fall back to the raw id.
    EnvNetworks(HashMap<EnvId, String>),
    /// One agent's height result from the cycle with the given id.
    Height {
        cycle: CycleId,
        agent_id: AgentId,
        height: Height,
    },
    /// One agent's peer-kind breakdown from the refresh with the given
    /// epoch.
    PeerMetrics {
        epoch: u64,
        agent_id: AgentId,
        sample: PeerMetricsSample,
    },
    /// A successfully parsed inbound event-stream frame.
    StreamFrame(Value),
    /// The event channel stopped delivering; no reconnect is attempted.
    StreamClosed,
    /// Outcome of one command within a bulk dispatch.
    CommandResult {
        agent_id: AgentId,
        command: &'static str,
        outcome: Result<String, String>,
    },
    /// The bulk dispatch loop finished (regardless of per-item failures).
    DispatchDone(DispatchSummary),
}
