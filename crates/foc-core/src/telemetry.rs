use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::AgentId;

/// Monotonic id of a telemetry polling cycle.
pub type CycleId = u64;

/// A sampled chain height. `Unknown` is an explicit state distinct from
/// zero: it covers offline agents, missing addresses, timeouts, and
/// non-numeric bodies alike.
///
/// Variant order matters for the derived ordering: unknown sorts below any
/// known height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Height {
    Unknown,
    Known(u64),
}

impl Height {
    pub fn known(&self) -> Option<u64> {
        match self {
            Height::Known(height) => Some(*height),
            Height::Unknown => None,
        }
    }
}

/// Parse the plain-text body of the latest-height route. Anything that is
/// not a bare integer is unknown, not an error.
pub fn parse_height_body(body: &str) -> Height {
    match body.trim().parse::<u64>() {
        Ok(height) => Height::Known(height),
        Err(_) => Height::Unknown,
    }
}

#[derive(Debug, Clone, Copy)]
struct HeightEntry {
    cycle: CycleId,
    height: Height,
}

/// Per-agent chain heights, committed one result at a time as polling tasks
/// resolve. Every entry remembers the cycle that wrote it and a commit from
/// an older cycle is discarded, so overlapping cycles resolve newest-wins
/// by cycle id rather than by arrival time.
#[derive(Debug, Clone, Default)]
pub struct HeightMap {
    entries: HashMap<AgentId, HeightEntry>,
    next_cycle: CycleId,
}

impl HeightMap {
    /// Allocate the id for a new polling cycle.
    pub fn begin_cycle(&mut self) -> CycleId {
        self.next_cycle += 1;
        self.next_cycle
    }

    /// Apply one per-agent result. Returns false when the result belongs to
    /// a cycle older than what is already committed for the agent.
    pub fn commit(&mut self, cycle: CycleId, agent_id: &str, height: Height) -> bool {
        if let Some(entry) = self.entries.get(agent_id) {
            if cycle < entry.cycle {
                return false;
            }
        }
        self.entries
            .insert(agent_id.to_string(), HeightEntry { cycle, height });
        true
    }

    pub fn get(&self, agent_id: &str) -> Height {
        self.entries
            .get(agent_id)
            .map(|entry| entry.height)
            .unwrap_or(Height::Unknown)
    }

    /// Drop entries for agents no longer present in the roster.
    pub fn retain_agents(&mut self, ids: &HashSet<AgentId>) {
        self.entries.retain(|agent_id, _| ids.contains(agent_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Peer-kind breakdown sampled from an agent's peer-metrics route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerMetricsSample {
    pub client_count: u32,
    pub validator_count: u32,
    pub total: u32,
}

impl PeerMetricsSample {
    pub fn new(client_count: u32, validator_count: u32) -> Self {
        Self {
            client_count,
            validator_count,
            total: client_count + validator_count,
        }
    }
}

/// Parse the peer-metrics response: a JSON array of records shaped
/// `[peer_id, kind_tag, ...]`. Tags other than `Client`/`Validator` are
/// ignored, as are records too short to carry a tag. A non-array body
/// yields `None` (a decode failure for the caller to log).
pub fn parse_peer_metrics(value: &Value) -> Option<PeerMetricsSample> {
    let records = value.as_array()?;
    let mut client_count = 0;
    let mut validator_count = 0;
    for record in records {
        let Some(fields) = record.as_array() else {
            continue;
        };
        let Some(kind) = fields.get(1).and_then(Value::as_str) else {
            continue;
        };
        match kind {
            "Client" => client_count += 1,
            "Validator" => validator_count += 1,
            _ => {}
        }
    }
    Some(PeerMetricsSample::new(client_count, validator_count))
}

/// Per-agent peer-metric samples. The poller is not interval-driven: it
/// re-fires whenever the roster or the resolved network map changes, and
/// each re-fire bumps the epoch. Results from a superseded epoch are
/// discarded at commit; samples otherwise persist until overwritten, so a
/// failed refresh leaves the previous sample displayed.
#[derive(Debug, Clone, Default)]
pub struct PeerMetricsMap {
    epoch: u64,
    samples: HashMap<AgentId, PeerMetricsSample>,
}

impl PeerMetricsMap {
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Apply one sample. Returns false when the sample belongs to a
    /// superseded epoch.
    pub fn commit(&mut self, epoch: u64, agent_id: &str, sample: PeerMetricsSample) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.samples.insert(agent_id.to_string(), sample);
        true
    }

    pub fn get(&self, agent_id: &str) -> Option<PeerMetricsSample> {
        self.samples.get(agent_id).copied()
    }

    pub fn retain_agents(&mut self, ids: &HashSet<AgentId>) {
        self.samples.retain(|agent_id, _| ids.contains(agent_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn height_body_parses_integer_or_unknown() {
        assert_eq!(parse_height_body("120"), Height::Known(120));
        assert_eq!(parse_height_body("  98\n"), Height::Known(98));
        assert_eq!(parse_height_body("syncing"), Height::Unknown);
        assert_eq!(parse_height_body(""), Height::Unknown);
        assert_eq!(parse_height_body("-4"), Height::Unknown);
    }

    #[test]
    fn unknown_height_sorts_below_known() {
        assert!(Height::Unknown < Height::Known(0));
        assert!(Height::Known(3) < Height::Known(10));
    }

    #[test]
    fn stale_cycle_commit_is_discarded() {
        let mut heights = HeightMap::default();
        let first = heights.begin_cycle();
        let second = heights.begin_cycle();
        assert!(heights.commit(second, "a1", Height::Known(200)));
        assert!(!heights.commit(first, "a1", Height::Known(150)));
        assert_eq!(heights.get("a1"), Height::Known(200));
    }

    #[test]
    fn same_cycle_commits_last_write_wins() {
        let mut heights = HeightMap::default();
        let cycle = heights.begin_cycle();
        assert!(heights.commit(cycle, "a1", Height::Unknown));
        assert!(heights.commit(cycle, "a1", Height::Known(7)));
        assert_eq!(heights.get("a1"), Height::Known(7));
    }

    #[test]
    fn commits_are_isolated_per_agent() {
        let mut heights = HeightMap::default();
        let cycle = heights.begin_cycle();
        heights.commit(cycle, "a1", Height::Known(5));
        heights.commit(cycle, "a2", Height::Unknown);
        assert_eq!(heights.get("a1"), Height::Known(5));
        assert_eq!(heights.get("a2"), Height::Unknown);
        assert_eq!(heights.get("a3"), Height::Unknown);
    }

    #[test]
    fn retain_drops_vanished_agents() {
        let mut heights = HeightMap::default();
        let cycle = heights.begin_cycle();
        heights.commit(cycle, "a1", Height::Known(1));
        heights.commit(cycle, "a2", Height::Known(2));
        let keep: HashSet<AgentId> = ["a2".to_string()].into_iter().collect();
        heights.retain_agents(&keep);
        assert_eq!(heights.get("a1"), Height::Unknown);
        assert_eq!(heights.get("a2"), Height::Known(2));
    }

    #[test]
    fn peer_metrics_counts_known_kinds_only() {
        let body = json!([
            ["peer-1", "Client", "10.0.0.1:4130"],
            ["peer-2", "Validator"],
            ["peer-3", "Prover"],
            ["peer-4", "Client"],
            ["peer-5"],
            "not-a-record"
        ]);
        let sample = parse_peer_metrics(&body).expect("sample");
        assert_eq!(sample.client_count, 2);
        assert_eq!(sample.validator_count, 1);
        assert_eq!(sample.total, 3);
    }

    #[test]
    fn peer_metrics_rejects_non_array_body() {
        assert!(parse_peer_metrics(&json!({"peers": []})).is_none());
    }

    #[test]
    fn stale_epoch_sample_is_discarded() {
        let mut map = PeerMetricsMap::default();
        let old = map.bump_epoch();
        let current = map.bump_epoch();
        assert!(!map.commit(old, "a1", PeerMetricsSample::new(1, 1)));
        assert!(map.commit(current, "a1", PeerMetricsSample::new(2, 3)));
        assert_eq!(map.get("a1"), Some(PeerMetricsSample::new(2, 3)));
    }

    #[test]
    fn failed_refresh_leaves_previous_sample() {
        let mut map = PeerMetricsMap::default();
        let epoch = map.bump_epoch();
        map.commit(epoch, "a1", PeerMetricsSample::new(4, 1));
        // A refresh that produced nothing for a1 bumps the epoch and never
        // commits; the previous sample must still read back.
        map.bump_epoch();
        assert_eq!(map.get("a1"), Some(PeerMetricsSample::new(4, 1)));
    }
}
