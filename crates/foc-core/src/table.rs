use std::cmp::Ordering;
use std::collections::HashSet;

use crate::row::Row;
use crate::AgentId;

/// Keys of the fixed column set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Select,
    AgentId,
    Network,
    NodeKey,
    Online,
    Height,
    InternalPeers,
    ExternalPeers,
    PeerMetrics,
}

impl ColumnKey {
    pub fn is_sortable(&self) -> bool {
        !matches!(self, ColumnKey::Select | ColumnKey::PeerMetrics)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub key: ColumnKey,
    pub label: &'static str,
    pub sortable: bool,
}

const fn column(key: ColumnKey, label: &'static str, sortable: bool) -> Column {
    Column {
        key,
        label,
        sortable,
    }
}

/// The fixed column set in its default order.
pub fn default_columns() -> Vec<Column> {
    vec![
        column(ColumnKey::Select, "SELECT", false),
        column(ColumnKey::AgentId, "AGENT ID", true),
        column(ColumnKey::Network, "NETWORK", true),
        column(ColumnKey::NodeKey, "NODE KEY", true),
        column(ColumnKey::Online, "ONLINE", true),
        column(ColumnKey::Height, "HEIGHT", true),
        column(ColumnKey::InternalPeers, "INTERNAL PEERS", true),
        column(ColumnKey::ExternalPeers, "EXTERNAL PEERS", true),
        column(ColumnKey::PeerMetrics, "PEERS (C,V,T)", false),
    ]
}

/// A permutation of the fixed column set. Reordering removes the dragged
/// column and reinserts it at the drop index; columns are never duplicated
/// or dropped.
#[derive(Debug, Clone)]
pub struct ColumnOrder {
    columns: Vec<Column>,
}

impl Default for ColumnOrder {
    fn default() -> Self {
        Self {
            columns: default_columns(),
        }
    }
}

impl ColumnOrder {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Move the column at `from` to `to`. Out-of-range indexes and
    /// `from == to` are no-ops.
    pub fn move_column(&mut self, from: usize, to: usize) {
        if from == to || from >= self.columns.len() || to >= self.columns.len() {
            return;
        }
        let moved = self.columns.remove(from);
        self.columns.insert(to, moved);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// The active sort. Activating the current key flips direction; activating
/// a different sortable key makes it active ascending. Non-sortable keys
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: ColumnKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: ColumnKey::AgentId,
            direction: SortDirection::Ascending,
        }
    }
}

impl SortSpec {
    pub fn activate(&mut self, key: ColumnKey) {
        if !key.is_sortable() {
            return;
        }
        if self.key == key {
            self.direction = self.direction.flipped();
        } else {
            self.key = key;
            self.direction = SortDirection::Ascending;
        }
    }
}

fn compare_rows(a: &Row, b: &Row, key: ColumnKey) -> Ordering {
    match key {
        ColumnKey::AgentId => a.agent_id.cmp(&b.agent_id),
        ColumnKey::Network => a.network.cmp(&b.network),
        ColumnKey::NodeKey => a.node_key.cmp(&b.node_key),
        ColumnKey::Online => a.online.cmp(&b.online),
        ColumnKey::Height => a.height.cmp(&b.height),
        ColumnKey::InternalPeers => a.internal_peers.cmp(&b.internal_peers),
        ColumnKey::ExternalPeers => a.external_peers.cmp(&b.external_peers),
        ColumnKey::Select | ColumnKey::PeerMetrics => Ordering::Equal,
    }
}

/// Order rows per the sort spec. The comparator is total, so flipping the
/// direction is a true inverse; ties keep their derivation order (stable
/// sort).
pub fn sort_rows(rows: &mut [Row], spec: SortSpec) {
    rows.sort_by(|a, b| {
        let ordering = compare_rows(a, b, spec.key);
        match spec.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

/// The interactive multi-selection, always a subset of the current roster.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ids: HashSet<AgentId>,
}

impl Selection {
    pub fn contains(&self, agent_id: &str) -> bool {
        self.ids.contains(agent_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn toggle(&mut self, agent_id: &str) {
        if !self.ids.remove(agent_id) {
            self.ids.insert(agent_id.to_string());
        }
    }

    /// Select every visible row unless all of them already are, in which
    /// case clear the selection entirely.
    pub fn toggle_all(&mut self, rows: &[Row]) {
        let all_selected =
            !rows.is_empty() && rows.iter().all(|row| self.ids.contains(&row.agent_id));
        if all_selected {
            self.ids.clear();
        } else {
            self.ids = rows.iter().map(|row| row.agent_id.clone()).collect();
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop ids no longer present in the roster.
    pub fn retain_roster(&mut self, roster_ids: &HashSet<AgentId>) {
        self.ids.retain(|id| roster_ids.contains(id));
    }

    /// The selection in dispatch order (sorted by id, deterministic).
    pub fn ordered(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}
