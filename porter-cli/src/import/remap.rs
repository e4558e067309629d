//! Identifier remap store
//!
//! Maps `(entity type, source id)` to the destination id for one import run.
//! Records are staged per entity batch and only become visible once the
//! batch's transaction has committed.

use std::collections::HashMap;

use serde::Serialize;

/// How a destination id was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapKind {
    /// A new row was inserted
    Inserted,
    /// An existing static row was reused
    Matched,
    /// The row maps onto an existing target (the destination tenant)
    Substituted,
}

/// One old-id to new-id mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemapRecord {
    pub entity_type: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RemapKind,
}

/// Normalize a source identifier for lookup
///
/// Identifiers are compared trimmed and case-insensitively (UUID text).
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Live old-identifier to new-identifier lookup for one run
#[derive(Debug, Default)]
pub struct RemapStore {
    /// Lookup tables: entity_type -> (normalized source id -> target id)
    tables: HashMap<String, HashMap<String, String>>,
    /// Every record in commit order
    records: Vec<RemapRecord>,
}

impl RemapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a source identifier of the given type
    pub fn resolve(&self, entity_type: &str, source_id: &str) -> Option<&str> {
        self.tables
            .get(entity_type)?
            .get(&normalize_id(source_id))
            .map(String::as_str)
    }

    /// Make a batch of staged records visible
    ///
    /// The store is append-only: a source id that is already mapped keeps
    /// its first mapping.
    pub fn commit(&mut self, batch: StagedBatch) {
        for record in batch.records {
            let table = self.tables.entry(record.entity_type.clone()).or_default();
            let key = normalize_id(&record.source_id);
            if let Some(existing) = table.get(&key) {
                if existing != &record.target_id {
                    log::warn!(
                        "Ignoring second mapping for {} '{}' -> '{}' (already maps to '{}')",
                        record.entity_type,
                        record.source_id,
                        record.target_id,
                        existing
                    );
                }
                continue;
            }
            table.insert(key, record.target_id.clone());
            self.records.push(record);
        }
    }

    /// All committed records in commit order
    pub fn records(&self) -> &[RemapRecord] {
        &self.records
    }

    /// Number of mappings for one entity type
    pub fn count_for(&self, entity_type: &str) -> usize {
        self.tables.get(entity_type).map(HashMap::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Records produced by one entity batch, not yet visible to lookups
#[derive(Debug, Default)]
pub struct StagedBatch {
    records: Vec<RemapRecord>,
    /// normalized source id -> index in `records`
    index: HashMap<String, usize>,
}

impl StagedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a mapping; returns the already staged target when the source id
    /// occurs twice in one batch
    pub fn stage(
        &mut self,
        entity_type: &str,
        source_id: &str,
        target_id: &str,
        kind: RemapKind,
    ) -> Option<&str> {
        let key = normalize_id(source_id);
        if let Some(&idx) = self.index.get(&key) {
            return Some(&self.records[idx].target_id);
        }
        self.index.insert(key, self.records.len());
        self.records.push(RemapRecord {
            entity_type: entity_type.to_string(),
            source_id: source_id.trim().to_string(),
            target_id: target_id.to_string(),
            kind,
        });
        None
    }

    /// Already staged target for a source id
    pub fn staged(&self, source_id: &str) -> Option<&str> {
        self.index
            .get(&normalize_id(source_id))
            .map(|&idx| self.records[idx].target_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of staged records of one kind
    pub fn count(&self, kind: RemapKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_records_invisible_until_commit() {
        let mut store = RemapStore::new();
        let mut batch = StagedBatch::new();
        batch.stage("employee", "E1", "new-1", RemapKind::Inserted);

        assert_eq!(store.resolve("employee", "E1"), None);
        store.commit(batch);
        assert_eq!(store.resolve("employee", "E1"), Some("new-1"));
    }

    #[test]
    fn test_lookup_is_case_and_whitespace_insensitive() {
        let mut store = RemapStore::new();
        let mut batch = StagedBatch::new();
        batch.stage("tag", "ABC-1", "x", RemapKind::Inserted);
        store.commit(batch);

        assert_eq!(store.resolve("tag", " abc-1 "), Some("x"));
        assert_eq!(store.resolve("skill", "abc-1"), None);
    }

    #[test]
    fn test_first_mapping_wins() {
        let mut store = RemapStore::new();

        let mut first = StagedBatch::new();
        first.stage("currency", "C1", "dest-1", RemapKind::Matched);
        store.commit(first);

        let mut second = StagedBatch::new();
        second.stage("currency", "C1", "dest-2", RemapKind::Inserted);
        store.commit(second);

        assert_eq!(store.resolve("currency", "C1"), Some("dest-1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.count_for("currency"), 1);
    }

    #[test]
    fn test_duplicate_source_in_batch() {
        let mut batch = StagedBatch::new();
        assert_eq!(batch.stage("tag", "T1", "a", RemapKind::Inserted), None);
        assert_eq!(batch.stage("tag", "t1", "b", RemapKind::Inserted), Some("a"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.count(RemapKind::Inserted), 1);
    }

    #[test]
    fn test_dropped_batch_leaves_store_untouched() {
        let store = RemapStore::new();
        {
            let mut batch = StagedBatch::new();
            batch.stage("tag", "T1", "a", RemapKind::Inserted);
        }
        assert!(store.is_empty());
    }
}
