use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::EnvId;

/// One entry of the control-plane roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub external_ip: Option<String>,
    #[serde(default)]
    pub internal_ip: Option<String>,
    #[serde(default)]
    pub state: AgentState,
}

impl Agent {
    /// The env id and node state when this agent is acting as a network node.
    pub fn node_state(&self) -> Option<(&EnvId, &NodeState)> {
        match &self.state {
            AgentState::Node(env_id, node) => Some((env_id, node)),
            _ => None,
        }
    }
}

/// The agent's reported state, an externally-tagged value on the wire.
///
/// The two shapes the control plane is known to emit are the bare tag
/// `"Inventory"` and `{"Node": [env_id, node_state]}`. Anything else is
/// preserved verbatim as [`AgentState::Other`] rather than dropped, so a
/// roster entry with an unrecognized state still produces a row.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Inventory,
    Node(EnvId, Box<NodeState>),
    Other(Value),
}

impl Default for AgentState {
    fn default() -> Self {
        AgentState::Other(Value::Null)
    }
}

impl AgentState {
    pub fn is_node(&self) -> bool {
        matches!(self, AgentState::Node(_, _))
    }
}

impl Serialize for AgentState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            AgentState::Inventory => serializer.serialize_str("Inventory"),
            AgentState::Node(env_id, node) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Node", &(env_id, node))?;
                map.end()
            }
            AgentState::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AgentState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(tag) = &value {
            if tag == "Inventory" {
                return Ok(AgentState::Inventory);
            }
        }
        if let Value::Object(map) = &value {
            if let Some(payload) = map.get("Node") {
                let (env_id, node): (EnvId, NodeState) =
                    serde_json::from_value(payload.clone()).map_err(serde::de::Error::custom)?;
                return Ok(AgentState::Node(env_id, Box::new(node)));
            }
        }
        Ok(AgentState::Other(value))
    }
}

/// Node-specific status reported for agents in `Node` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_key: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub peers: Vec<PeerClass>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// Classification of a peer reference, decided once at deserialization.
///
/// On the wire a peer is either a one-key object (`{"Internal": ...}`) or a
/// bare tag string; the payload carries addressing detail this view never
/// consumes. Shapes with neither known tag classify as `Unknown` and count
/// toward neither peer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClass {
    Internal,
    External,
    Unknown,
}

impl PeerClass {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "Internal" => PeerClass::Internal,
            "External" => PeerClass::External,
            _ => PeerClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerClass::Internal => "Internal",
            PeerClass::External => "External",
            PeerClass::Unknown => "Unknown",
        }
    }
}

impl Serialize for PeerClass {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerClass {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let class = match &value {
            Value::String(tag) => PeerClass::from_tag(tag),
            Value::Object(map) => {
                let mut keys = map.keys();
                match (keys.next(), keys.next()) {
                    (Some(tag), None) => PeerClass::from_tag(tag),
                    _ => PeerClass::Unknown,
                }
            }
            _ => PeerClass::Unknown,
        };
        Ok(class)
    }
}

/// The distinct set of environment ids referenced by `Node` agents, in a
/// stable order.
pub fn distinct_env_ids(agents: &[Agent]) -> Vec<EnvId> {
    let set: BTreeSet<EnvId> = agents
        .iter()
        .filter_map(|agent| agent.node_state().map(|(env_id, _)| env_id.clone()))
        .collect();
    set.into_iter().collect()
}
