//! Train → anchor ownership.
//!
//! [`OwnershipStore`] is the durable record of which anchors each train
//! owns. [`ReverseLinks`] is its in-memory inverse (anchor → train), never
//! persisted and always derivable from the store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use trainbase_shared::host::EntityKey;

/// Anchors owned by one train, in creation order, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRecord {
    pub train_key: EntityKey,
    #[serde(default)]
    pub anchor_keys: Vec<EntityKey>,
}

impl TrainRecord {
    pub fn new(train_key: EntityKey) -> Self {
        Self {
            train_key,
            anchor_keys: Vec::new(),
        }
    }

    /// Appends an anchor unless it is already listed.
    pub fn push_anchor(&mut self, anchor: EntityKey) -> bool {
        if self.anchor_keys.contains(&anchor) {
            return false;
        }
        self.anchor_keys.push(anchor);
        true
    }

    pub fn remove_anchor(&mut self, anchor: EntityKey) -> bool {
        let before = self.anchor_keys.len();
        self.anchor_keys.retain(|k| *k != anchor);
        self.anchor_keys.len() != before
    }
}

/// Serialized form of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOwnership {
    #[serde(default)]
    pub trains: Vec<TrainRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StoredOwnership {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Authoritative train → record mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipStore {
    trains: BTreeMap<EntityKey, TrainRecord>,
}

impl OwnershipStore {
    /// Loads a stored snapshot.
    ///
    /// Records with a sentinel key or no anchors are dropped, duplicate anchor
    /// keys are collapsed, and a train listed twice has its anchors merged.
    /// An anchor listed under several trains stays with the first one.
    pub fn from_stored(stored: StoredOwnership) -> Self {
        let mut store = Self::default();
        let mut owner: HashMap<EntityKey, EntityKey> = HashMap::new();
        for record in stored.trains {
            if record.train_key.is_none() {
                continue;
            }
            let entry = store
                .trains
                .entry(record.train_key)
                .or_insert_with(|| TrainRecord::new(record.train_key));
            for anchor in record.anchor_keys {
                if anchor.is_none() {
                    continue;
                }
                match owner.get(&anchor) {
                    Some(first) if *first != record.train_key => {
                        warn!(
                            anchor = %anchor,
                            kept = %first,
                            dropped = %record.train_key,
                            "Anchor listed under two trains"
                        );
                    }
                    _ => {
                        owner.insert(anchor, record.train_key);
                        entry.push_anchor(anchor);
                    }
                }
            }
        }
        store.trains.retain(|_, r| !r.anchor_keys.is_empty());
        store
    }

    pub fn to_stored(&self) -> StoredOwnership {
        StoredOwnership {
            trains: self.trains.values().cloned().collect(),
            saved_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, train: EntityKey) -> Option<&TrainRecord> {
        self.trains.get(&train)
    }

    pub fn get_mut(&mut self, train: EntityKey) -> Option<&mut TrainRecord> {
        self.trains.get_mut(&train)
    }

    /// Record for `train`, created empty if absent.
    pub fn entry(&mut self, train: EntityKey) -> &mut TrainRecord {
        self.trains
            .entry(train)
            .or_insert_with(|| TrainRecord::new(train))
    }

    pub fn remove(&mut self, train: EntityKey) -> Option<TrainRecord> {
        self.trains.remove(&train)
    }

    /// Train keys in ascending order.
    pub fn train_keys(&self) -> Vec<EntityKey> {
        self.trains.keys().copied().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &TrainRecord> {
        self.trains.values()
    }

    pub fn len(&self) -> usize {
        self.trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    pub fn anchor_count(&self) -> usize {
        self.trains.values().map(|r| r.anchor_keys.len()).sum()
    }

    pub fn clear(&mut self) {
        self.trains.clear();
    }
}

/// Anchor → owning train.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseLinks {
    owner: HashMap<EntityKey, EntityKey>,
}

impl ReverseLinks {
    pub fn get(&self, anchor: EntityKey) -> Option<EntityKey> {
        self.owner.get(&anchor).copied()
    }

    pub fn set(&mut self, anchor: EntityKey, train: EntityKey) {
        self.owner.insert(anchor, train);
    }

    pub fn remove(&mut self, anchor: EntityKey) -> Option<EntityKey> {
        self.owner.remove(&anchor)
    }

    pub fn len(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    pub fn clear(&mut self) {
        self.owner.clear();
    }

    /// Anchors linked to `train`.
    pub fn anchors_of(&self, train: EntityKey) -> Vec<EntityKey> {
        let mut anchors: Vec<EntityKey> = self
            .owner
            .iter()
            .filter(|(_, t)| **t == train)
            .map(|(a, _)| *a)
            .collect();
        anchors.sort();
        anchors
    }

    /// Whether the links are exactly the inverse of the store: every link
    /// points at a record that lists the anchor, and every stored anchor
    /// links back to its own train.
    pub fn is_consistent_with(&self, store: &OwnershipStore) -> bool {
        let forward = self.owner.iter().all(|(anchor, train)| {
            store
                .get(*train)
                .is_some_and(|r| r.anchor_keys.contains(anchor))
        });
        forward
            && store.records().all(|r| {
                r.anchor_keys
                    .iter()
                    .all(|a| self.get(*a) == Some(r.train_key))
            })
    }
}
