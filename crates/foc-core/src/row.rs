use std::collections::HashMap;

use crate::agent::{Agent, PeerClass};
use crate::telemetry::{Height, HeightMap, PeerMetricsMap, PeerMetricsSample};
use crate::{AgentId, EnvId};

/// One display row, derived from the roster and the telemetry maps. Rows
/// are recomputed from their inputs on every render pass and never mutated
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub agent_id: AgentId,
    pub network: String,
    pub node_key: String,
    pub online: bool,
    pub height: Height,
    pub internal_peers: u32,
    pub external_peers: u32,
    pub peer_metrics: PeerMetricsSample,
}

/// Derive the row set from the current roster and telemetry maps.
///
/// The result is 1:1 with the roster: agents without `Node` state still
/// produce a row with default fields. An unresolved environment falls back
/// to displaying the raw env id.
pub fn derive_rows(
    agents: &[Agent],
    networks: &HashMap<EnvId, String>,
    heights: &HeightMap,
    peer_metrics: &PeerMetricsMap,
) -> Vec<Row> {
    agents
        .iter()
        .map(|agent| {
            let mut network = String::new();
            let mut node_key = String::new();
            let mut online = false;
            let mut internal_peers = 0;
            let mut external_peers = 0;

            if let Some((env_id, node)) = agent.node_state() {
                network = networks.get(env_id).cloned().unwrap_or_else(|| env_id.clone());
                node_key = node.node_key.clone();
                online = node.online;
                for peer in &node.peers {
                    match peer {
                        PeerClass::Internal => internal_peers += 1,
                        PeerClass::External => external_peers += 1,
                        PeerClass::Unknown => {}
                    }
                }
            }

            Row {
                agent_id: agent.agent_id.clone(),
                network,
                node_key,
                online,
                height: heights.get(&agent.agent_id),
                internal_peers,
                external_peers,
                peer_metrics: peer_metrics.get(&agent.agent_id).unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roster() -> Vec<Agent> {
        serde_json::from_value(json!([
            {
                "agent_id": "a1",
                "is_connected": true,
                "internal_ip": "10.0.0.4",
                "state": {"Node": ["env1", {
                    "node_key": "k1",
                    "online": true,
                    "peers": ["Internal", "External", "Internal"]
                }]}
            },
            {"agent_id": "a2", "is_connected": false, "state": "Inventory"},
            {"agent_id": "a3", "state": {"Compute": {}}}
        ]))
        .expect("roster")
    }

    #[test]
    fn row_count_matches_roster_including_non_node_agents() {
        let rows = derive_rows(
            &roster(),
            &HashMap::new(),
            &HeightMap::default(),
            &PeerMetricsMap::default(),
        );
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].agent_id, "a2");
        assert_eq!(rows[1].network, "");
        assert_eq!(rows[1].node_key, "");
        assert!(!rows[1].online);
        assert_eq!(rows[1].height, Height::Unknown);
        assert_eq!(rows[2].peer_metrics, PeerMetricsSample::default());
    }

    #[test]
    fn node_row_combines_roster_and_telemetry() {
        let mut heights = HeightMap::default();
        let cycle = heights.begin_cycle();
        heights.commit(cycle, "a1", Height::Known(120));
        let mut peers = PeerMetricsMap::default();
        let epoch = peers.bump_epoch();
        peers.commit(epoch, "a1", PeerMetricsSample::new(5, 2));
        let networks: HashMap<_, _> = [("env1".to_string(), "mainnet".to_string())].into();

        let rows = derive_rows(&roster(), &networks, &heights, &peers);
        let row = &rows[0];
        assert_eq!(row.network, "mainnet");
        assert_eq!(row.node_key, "k1");
        assert!(row.online);
        assert_eq!(row.height, Height::Known(120));
        assert_eq!(row.internal_peers, 2);
        assert_eq!(row.external_peers, 1);
        assert_eq!(row.peer_metrics.total, 7);
    }

    #[test]
    fn unresolved_network_falls_back_to_raw_env_id() {
        let rows = derive_rows(
            &roster(),
            &HashMap::new(),
            &HeightMap::default(),
            &PeerMetricsMap::default(),
        );
        assert_eq!(rows[0].network, "env1");
    }
}
