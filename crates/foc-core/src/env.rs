use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Environment metadata returned by the control plane's env info route.
///
/// Only `network` is consumed by the row model; the rest of the payload is
/// tolerated so newer control planes don't break deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub network: String,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tolerates_extra_fields() {
        let info: EnvironmentInfo = serde_json::from_value(json!({
            "network": "mainnet",
            "block_height": 42,
            "storage": {"id": "base"}
        }))
        .expect("env info");
        assert_eq!(info.network, "mainnet");
        assert_eq!(info.block_height, Some(42));
        assert!(info.extra.contains_key("storage"));
    }
}
