use std::collections::HashMap;

use foc_core::{distinct_env_ids, Agent, AgentId, CycleId, EnvId, Height};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::control::ControlPlane;
use crate::node::AgentService;
use crate::ClientEvent;

/// One agent's height-poll parameters for a cycle. Derived from the roster
/// snapshot at cycle start so an in-flight cycle is unaffected by roster
/// churn (the cycle-id commit guard handles the rest).
#[derive(Debug, Clone)]
pub struct HeightTarget {
    pub agent_id: AgentId,
    pub internal_ip: Option<String>,
    pub network: String,
    pub online: bool,
}

/// Height-poll targets: every agent in `Node` state. Offline or addressless
/// agents still appear so the cycle assigns them an explicit unknown.
pub fn height_targets(agents: &[Agent], networks: &HashMap<EnvId, String>) -> Vec<HeightTarget> {
    agents
        .iter()
        .filter_map(|agent| {
            let (env_id, node) = agent.node_state()?;
            Some(HeightTarget {
                agent_id: agent.agent_id.clone(),
                internal_ip: agent.internal_ip.clone(),
                network: networks.get(env_id).cloned().unwrap_or_else(|| env_id.clone()),
                online: node.online,
            })
        })
        .collect()
}

/// One agent's peer-metrics parameters for a refresh epoch.
#[derive(Debug, Clone)]
pub struct PeerTarget {
    pub agent_id: AgentId,
    pub internal_ip: String,
    pub network: String,
}

/// Peer-metrics targets: connected `Node` agents with a known internal
/// address. Agents without one keep whatever sample they last produced.
pub fn peer_targets(agents: &[Agent], networks: &HashMap<EnvId, String>) -> Vec<PeerTarget> {
    agents
        .iter()
        .filter_map(|agent| {
            if !agent.is_connected {
                return None;
            }
            let (env_id, _) = agent.node_state()?;
            let internal_ip = agent.internal_ip.clone()?;
            Some(PeerTarget {
                agent_id: agent.agent_id.clone(),
                internal_ip,
                network: networks.get(env_id).cloned().unwrap_or_else(|| env_id.clone()),
            })
        })
        .collect()
}

/// Load the roster and resolve the referenced environments' network names.
///
/// The roster replaces the previous one atomically on the consumer side; a
/// fetch failure only produces `RosterFailed` so the previous state stays
/// rendered. Env lookups run concurrently and fail independently: a failed
/// lookup is logged and omitted from the map, never aborting the others or
/// the load itself.
pub fn spawn_roster_load(control: ControlPlane, tx: mpsc::Sender<ClientEvent>) {
    tokio::spawn(async move {
        let agents = match control.list_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                warn!(event = "roster_fetch_error", error = %err);
                let _ = tx.send(ClientEvent::RosterFailed(err.to_string())).await;
                return;
            }
        };
        let env_ids = distinct_env_ids(&agents);
        if tx.send(ClientEvent::Roster(agents)).await.is_err() {
            return;
        }

        let lookups = env_ids.into_iter().map(|env_id| {
            let control = control.clone();
            async move {
                match control.env_info(&env_id).await {
                    Ok(info) => Some((env_id, info.network)),
                    Err(err) => {
                        warn!(event = "env_info_error", env_id = %env_id, error = %err);
                        None
                    }
                }
            }
        });
        let networks: HashMap<EnvId, String> =
            join_all(lookups).await.into_iter().flatten().collect();
        let _ = tx.send(ClientEvent::EnvNetworks(networks)).await;
    });
}

/// Fan out one height-polling cycle: one concurrent query per target, each
/// result committed individually as it arrives. Failures are quiet —
/// network flakiness toward lagging agents is the normal case — and simply
/// record the height as unknown; nothing is retried within the cycle.
pub fn spawn_height_cycle(
    service: AgentService,
    cycle: CycleId,
    targets: Vec<HeightTarget>,
    tx: mpsc::Sender<ClientEvent>,
) {
    for target in targets {
        let service = service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let height = match (&target.internal_ip, target.online) {
                (Some(ip), true) => match service.latest_height(ip, &target.network).await {
                    Ok(height) => height,
                    Err(err) => {
                        debug!(
                            event = "height_poll_error",
                            agent_id = %target.agent_id,
                            error = %err
                        );
                        Height::Unknown
                    }
                },
                _ => Height::Unknown,
            };
            let _ = tx
                .send(ClientEvent::Height {
                    cycle,
                    agent_id: target.agent_id,
                    height,
                })
                .await;
        });
    }
}

/// Fan out one peer-metrics refresh. A failed query is logged and produces
/// no commit, so the agent's previous sample stays displayed.
pub fn spawn_peer_refresh(
    service: AgentService,
    epoch: u64,
    targets: Vec<PeerTarget>,
    tx: mpsc::Sender<ClientEvent>,
) {
    for target in targets {
        let service = service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match service
                .peer_metrics(&target.internal_ip, &target.network)
                .await
            {
                Ok(sample) => {
                    let _ = tx
                        .send(ClientEvent::PeerMetrics {
                            epoch,
                            agent_id: target.agent_id,
                            sample,
                        })
                        .await;
                }
                Err(err) => {
                    warn!(
                        event = "peer_metrics_error",
                        agent_id = %target.agent_id,
                        error = %err
                    );
                }
            }
        });
    }
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
                "state": {"Node": ["env1", {"node_key": "k1", "online": true}]}
            },
            {
                "agent_id": "a2",
                "is_connected": true,
                "state": {"Node": ["env2", {"node_key": "k2", "online": false}]}
            },
            {"agent_id": "a3", "is_connected": true, "state": "Inventory"},
            {
                "agent_id": "a4",
                "is_connected": false,
                "internal_ip": "10.0.0.7",
                "state": {"Node": ["env1", {"node_key": "k4", "online": true}]}
            }
        ]))
        .expect("roster")
    }

    #[test]
    fn height_targets_cover_every_node_agent() {
        let networks: HashMap<_, _> = [("env1".to_string(), "mainnet".to_string())].into();
        let targets = height_targets(&roster(), &networks);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].agent_id, "a1");
        assert_eq!(targets[0].network, "mainnet");
        assert!(targets[0].online);
        // Unresolved env falls back to the raw id.
        assert_eq!(targets[1].network, "env2");
        assert!(!targets[1].online);
        assert!(targets[1].internal_ip.is_none());
    }

    #[test]
    fn peer_targets_require_connection_node_state_and_address() {
        let targets = peer_targets(&roster(), &HashMap::new());
        // a2 has no address, a3 is not a node, a4 is disconnected.
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].agent_id, "a1");
        assert_eq!(targets[0].network, "env1");
    }
}
