pub mod agent;
pub mod env;
pub mod row;
pub mod table;
pub mod telemetry;

pub use agent::{distinct_env_ids, Agent, AgentState, NodeState, PeerClass};
pub use env::EnvironmentInfo;
pub use row::{derive_rows, Row};
pub use table::{
    default_columns, sort_rows, Column, ColumnKey, ColumnOrder, Selection, SortDirection, SortSpec,
};
pub use telemetry::{
    parse_height_body, parse_peer_metrics, CycleId, Height, HeightMap, PeerMetricsMap,
    PeerMetricsSample,
};

/// Identifier of an agent as reported by the control plane.
pub type AgentId = String;

/// Identifier of an environment an agent's node belongs to.
pub type EnvId = String;
