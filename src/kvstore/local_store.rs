use crate::clock::Timestamp;
use crate::ring::ReplicaRole;
use std::collections::BTreeMap;
use std::fmt;

/// StoredEntry is what a replica keeps for one key. A deleted key keeps its entry with no value,
/// so an older copy pushed by another replica can't bring it back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredEntry {
    pub value: Option<String>,
    // Stamp of the write that produced this entry. Stabilization keeps the newer of two copies.
    pub write_timestamp: Timestamp,
    pub role: ReplicaRole,
}

impl StoredEntry {
    pub fn new(value: String, write_timestamp: Timestamp, role: ReplicaRole) -> Self {
        StoredEntry {
            value: Some(value),
            write_timestamp,
            role,
        }
    }

    pub fn deleted(write_timestamp: Timestamp, role: ReplicaRole) -> Self {
        StoredEntry {
            value: None,
            write_timestamp,
            role,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

impl fmt::Display for StoredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}:{}:{}", value, self.write_timestamp.as_i64(), self.role),
            None => write!(f, "<deleted>:{}:{}", self.write_timestamp.as_i64(), self.role),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Key {0:?} already exists")]
    KeyConflict(String),
    #[error("Key {0:?} not found")]
    KeyNotFound(String),
}

/// LocalStore is a replica's own key-value table. It knows nothing about rings or quorums.
///
/// Deleted keys stay behind as delete markers. `create`, `read`, `update` and `delete` treat a
/// marker as absent; `get`, `put` and `entries` see it.
pub trait LocalStore {
    /// Fails with KeyConflict if `key` is present.
    fn create(&mut self, key: String, entry: StoredEntry) -> Result<(), StoreError>;

    fn read(&self, key: &str) -> Result<&StoredEntry, StoreError>;

    /// Fails with KeyNotFound if `key` is absent.
    fn update(&mut self, key: &str, entry: StoredEntry) -> Result<(), StoreError>;

    /// Replace the entry with a delete marker stamped `write_timestamp`. Returns the entry it
    /// replaced.
    fn delete(&mut self, key: &str, write_timestamp: Timestamp) -> Result<StoredEntry, StoreError>;

    /// The entry for `key`, delete marker or not.
    fn get(&self, key: &str) -> Option<&StoredEntry>;

    /// Insert or overwrite, no questions asked. Used for re-replication.
    fn put(&mut self, key: String, entry: StoredEntry);

    /// Returns false if `key` has no entry.
    fn set_role(&mut self, key: &str, role: ReplicaRole) -> bool;

    /// Copy of every entry including delete markers, ordered by key.
    fn entries(&self) -> Vec<(String, StoredEntry)>;

    /// Number of keys that aren't deleted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: BTreeMap<String, StoredEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    fn live(&self, key: &str) -> Option<&StoredEntry> {
        self.entries.get(key).filter(|entry| !entry.is_deleted())
    }
}

impl LocalStore for InMemoryStore {
    fn create(&mut self, key: String, entry: StoredEntry) -> Result<(), StoreError> {
        if self.live(&key).is_some() {
            return Err(StoreError::KeyConflict(key));
        }

        self.entries.insert(key, entry);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<&StoredEntry, StoreError> {
        self.live(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    fn update(&mut self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        match self.entries.get_mut(key) {
            Some(existing) if !existing.is_deleted() => {
                *existing = entry;
                Ok(())
            }
            _ => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    fn delete(&mut self, key: &str, write_timestamp: Timestamp) -> Result<StoredEntry, StoreError> {
        match self.entries.get_mut(key) {
            Some(existing) if !existing.is_deleted() => {
                let marker = StoredEntry::deleted(write_timestamp, existing.role);
                Ok(std::mem::replace(existing, marker))
            }
            _ => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    fn get(&self, key: &str) -> Option<&StoredEntry> {
        self.entries.get(key)
    }

    fn put(&mut self, key: String, entry: StoredEntry) {
        self.entries.insert(key, entry);
    }

    fn set_role(&mut self, key: &str, role: ReplicaRole) -> bool {
        match self.entries.get_mut(key) {
            Some(existing) => {
                existing.role = role;
                true
            }
            None => false,
        }
    }

    fn entries(&self) -> Vec<(String, StoredEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.is_deleted()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, ts: i64) -> StoredEntry {
        StoredEntry::new(value.to_string(), Timestamp::new(ts), ReplicaRole::Primary)
    }

    #[test]
    fn crud() {
        let mut store = InMemoryStore::new();
        assert!(store.is_empty());

        store.create("foo".into(), entry("bar", 1)).unwrap();
        assert_eq!(
            store.create("foo".into(), entry("baz", 2)),
            Err(StoreError::KeyConflict("foo".into()))
        );
        assert_eq!(store.read("foo").unwrap().value.as_deref(), Some("bar"));

        store.update("foo", entry("baz", 3)).unwrap();
        assert_eq!(store.read("foo").unwrap(), &entry("baz", 3));
        assert_eq!(
            store.update("nope", entry("x", 3)),
            Err(StoreError::KeyNotFound("nope".into()))
        );

        assert_eq!(store.delete("foo", Timestamp::new(4)), Ok(entry("baz", 3)));
        assert_eq!(store.read("foo"), Err(StoreError::KeyNotFound("foo".into())));
        assert_eq!(
            store.delete("foo", Timestamp::new(5)),
            Err(StoreError::KeyNotFound("foo".into()))
        );
        assert_eq!(
            store.update("foo", entry("x", 5)),
            Err(StoreError::KeyNotFound("foo".into()))
        );
    }

    #[test]
    fn delete_leaves_a_marker_that_create_replaces() {
        let mut store = InMemoryStore::new();
        store.create("foo".into(), entry("bar", 1)).unwrap();
        store.delete("foo", Timestamp::new(2)).unwrap();

        assert!(store.is_empty());
        assert_eq!(
            store.get("foo"),
            Some(&StoredEntry::deleted(Timestamp::new(2), ReplicaRole::Primary))
        );
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.get("foo").unwrap().to_string(), "<deleted>:2:PRIMARY");

        store.create("foo".into(), entry("again", 3)).unwrap();
        assert_eq!(store.read("foo").unwrap(), &entry("again", 3));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_overwrites_and_set_role_needs_the_key() {
        let mut store = InMemoryStore::new();
        store.put("k".into(), entry("a", 1));
        store.put("k".into(), entry("b", 2));
        assert_eq!(store.len(), 1);

        assert!(store.set_role("k", ReplicaRole::Tertiary));
        assert!(!store.set_role("missing", ReplicaRole::Tertiary));
        assert_eq!(store.entries(), vec![(
            "k".to_string(),
            StoredEntry::new("b".into(), Timestamp::new(2), ReplicaRole::Tertiary)
        )]);
    }

    #[test]
    fn display_form() {
        assert_eq!(entry("bar", 12).to_string(), "bar:12:PRIMARY");
    }
}
