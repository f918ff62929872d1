//! Structured memory store.
//!
//! A small `(entity, attribute) → value` map with monotonic per-key
//! versioning. The composite key joins entity and attribute with a
//! non-printable unit separator and is never exposed. Staging mirrors the
//! other engines: staged mutations are invisible until `commit_staged`.
//!
//! Persistence is a little-endian entry list (sorted by entity, attribute,
//! id) published as a memory-kind segment in the committing TOC.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaxError};
use crate::format::cursor::{BinaryBuilder, BinaryCursor};
use crate::format::MAX_ARRAY_COUNT;
use crate::store::Metadata;

const KEY_SEPARATOR: char = '\u{1F}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMemoryEntry {
    pub id: u64,
    pub entity: String,
    pub attribute: String,
    pub value: String,
    pub metadata: Metadata,
    /// Starts at 1 and increments on each upsert of the same key.
    pub version: u64,
}

fn entry_order(lhs: &StructuredMemoryEntry, rhs: &StructuredMemoryEntry) -> std::cmp::Ordering {
    lhs.entity
        .cmp(&rhs.entity)
        .then_with(|| lhs.attribute.cmp(&rhs.attribute))
        .then_with(|| lhs.id.cmp(&rhs.id))
}

#[derive(Debug, Default)]
pub struct StructuredMemoryStore {
    next_id: u64,
    entries: HashMap<String, StructuredMemoryEntry>,
    staged_entries: HashMap<String, StructuredMemoryEntry>,
    staged_next_id: u64,
    pending_mutations: usize,
}

impl StructuredMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(entity: &str, attribute: &str) -> String {
        let mut key = String::with_capacity(entity.len() + attribute.len() + 1);
        key.push_str(entity);
        key.push(KEY_SEPARATOR);
        key.push_str(attribute);
        key
    }

    fn ensure_staging_state(&mut self) {
        if self.pending_mutations > 0 {
            return;
        }
        self.staged_entries = self.entries.clone();
        self.staged_next_id = self.next_id;
    }

    /// Stage an insert-or-update. Returns the entry id.
    pub fn stage_upsert(
        &mut self,
        entity: &str,
        attribute: &str,
        value: &str,
        metadata: &Metadata,
    ) -> Result<u64> {
        if entity.is_empty() {
            return Err(WaxError::policy("upsert entity must be non-empty"));
        }
        if attribute.is_empty() {
            return Err(WaxError::policy("upsert attribute must be non-empty"));
        }

        self.ensure_staging_state();
        let key = Self::composite_key(entity, attribute);
        let id = match self.staged_entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value.to_string();
                entry.metadata = metadata.clone();
                entry.version += 1;
                entry.id
            }
            None => {
                let id = self.staged_next_id;
                self.staged_next_id += 1;
                self.staged_entries.insert(
                    key.clone(),
                    StructuredMemoryEntry {
                        id,
                        entity: entity.to_string(),
                        attribute: attribute.to_string(),
                        value: value.to_string(),
                        metadata: metadata.clone(),
                        version: 1,
                    },
                );
                id
            }
        };
        self.pending_mutations += 1;
        Ok(id)
    }

    /// Stage a removal. Returns the removed entry's id if the key exists
    /// in the staged view.
    pub fn stage_remove(&mut self, entity: &str, attribute: &str) -> Option<u64> {
        self.ensure_staging_state();
        let key = Self::composite_key(entity, attribute);
        let removed_id = self.staged_entries.remove(&key).map(|entry| entry.id);
        self.pending_mutations += 1;
        removed_id
    }

    pub fn commit_staged(&mut self) {
        if self.pending_mutations == 0 {
            return;
        }
        self.entries = std::mem::take(&mut self.staged_entries);
        self.next_id = self.staged_next_id;
        self.pending_mutations = 0;
    }

    pub fn rollback_staged(&mut self) {
        self.pending_mutations = 0;
        self.staged_entries.clear();
        self.staged_next_id = self.next_id;
    }

    pub fn pending_mutation_count(&self) -> usize {
        self.pending_mutations
    }

    /// Immediate insert-or-update. Returns the entry id.
    pub fn upsert(
        &mut self,
        entity: &str,
        attribute: &str,
        value: &str,
        metadata: &Metadata,
    ) -> Result<u64> {
        let id = self.stage_upsert(entity, attribute, value, metadata)?;
        self.commit_staged();
        Ok(id)
    }

    /// Immediate removal. Returns whether the key existed.
    pub fn remove(&mut self, entity: &str, attribute: &str) -> bool {
        let removed = self.stage_remove(entity, attribute);
        self.commit_staged();
        removed.is_some()
    }

    pub fn get(&self, entity: &str, attribute: &str) -> Option<&StructuredMemoryEntry> {
        self.entries.get(&Self::composite_key(entity, attribute))
    }

    /// Entries whose entity starts with `prefix`, sorted by (entity,
    /// attribute, id). Negative `limit` = unlimited, zero = empty.
    pub fn query_by_entity_prefix(&self, prefix: &str, limit: i64) -> Vec<StructuredMemoryEntry> {
        if limit == 0 {
            return Vec::new();
        }
        let mut out: Vec<StructuredMemoryEntry> = self
            .entries
            .values()
            .filter(|entry| prefix.is_empty() || entry.entity.starts_with(prefix))
            .cloned()
            .collect();
        out.sort_by(entry_order);
        if limit > 0 && out.len() > limit as usize {
            out.truncate(limit as usize);
        }
        out
    }

    pub fn all(&self, limit: i64) -> Vec<StructuredMemoryEntry> {
        self.query_by_entity_prefix("", limit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The view a commit would publish: committed entries, or the staged
    /// map when mutations are pending. Sorted by (entity, attribute, id).
    pub fn staged_view(&self) -> (u64, Vec<StructuredMemoryEntry>) {
        let (next_id, map) = if self.pending_mutations == 0 {
            (self.next_id, &self.entries)
        } else {
            (self.staged_next_id, &self.staged_entries)
        };
        let mut entries: Vec<StructuredMemoryEntry> = map.values().cloned().collect();
        entries.sort_by(entry_order);
        (next_id, entries)
    }

    /// Rebuild from segment bytes produced by [`encode_memory_segment`].
    pub fn from_segment_bytes(bytes: &[u8]) -> Result<Self> {
        let (next_id, entries) = decode_memory_segment(bytes)?;
        let mut store = Self {
            next_id,
            ..Self::default()
        };
        for entry in entries {
            let key = Self::composite_key(&entry.entity, &entry.attribute);
            store.entries.insert(key, entry);
        }
        Ok(store)
    }
}

/// Encode entries as the little-endian memory segment payload.
pub fn encode_memory_segment(next_id: u64, entries: &[StructuredMemoryEntry]) -> Vec<u8> {
    let mut builder = BinaryBuilder::with_capacity(16 + entries.len() * 64);
    builder.append_u64(next_id);
    builder.append_u32(entries.len() as u32);
    for entry in entries {
        builder.append_u64(entry.id);
        builder.append_string(&entry.entity);
        builder.append_string(&entry.attribute);
        builder.append_string(&entry.value);
        let mut keys: Vec<&String> = entry.metadata.keys().collect();
        keys.sort();
        builder.append_u32(keys.len() as u32);
        for key in keys {
            builder.append_string(key);
            builder.append_string(&entry.metadata[key]);
        }
        builder.append_u64(entry.version);
    }
    builder.build()
}

/// Decode a memory segment payload.
pub fn decode_memory_segment(bytes: &[u8]) -> Result<(u64, Vec<StructuredMemoryEntry>)> {
    let mut cursor = BinaryCursor::new(bytes, "memory segment");
    let next_id = cursor.read_u64("memory.next_id")?;
    let count = cursor.read_u32("memory.count")? as usize;
    if count > MAX_ARRAY_COUNT {
        return Err(WaxError::format("memory entry count exceeds limit"));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let id = cursor.read_u64("memory.id")?;
        let entity = cursor.read_string("memory.entity")?;
        let attribute = cursor.read_string("memory.attribute")?;
        let value = cursor.read_string("memory.value")?;
        let metadata_count = cursor.read_u32("memory.metadata_count")? as usize;
        if metadata_count > MAX_ARRAY_COUNT {
            return Err(WaxError::format("memory metadata count exceeds limit"));
        }
        let mut metadata = Metadata::with_capacity(metadata_count);
        for _ in 0..metadata_count {
            let key = cursor.read_string("memory.metadata.key")?;
            let value = cursor.read_string("memory.metadata.value")?;
            if metadata.insert(key, value).is_some() {
                return Err(WaxError::format("duplicate memory metadata key"));
            }
        }
        let version = cursor.read_u64("memory.version")?;
        entries.push(StructuredMemoryEntry {
            id,
            entity,
            attribute,
            value,
            metadata,
            version,
        });
    }
    cursor.finish()?;
    Ok((next_id, entries))
}
