use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::models::file::FileMetadata;

#[derive(Default)]
struct IndexInner {
    entries: HashMap<String, FileMetadata>,
    by_hash: HashMap<String, BTreeSet<String>>,
    by_path: HashMap<String, BTreeSet<String>>,
    by_name: HashMap<String, BTreeSet<String>>,
}

fn add_key(map: &mut HashMap<String, BTreeSet<String>>, key: &str, id: &str) {
    map.entry(key.to_string()).or_default().insert(id.to_string());
}

fn drop_key(map: &mut HashMap<String, BTreeSet<String>>, key: &str, id: &str) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

impl IndexInner {
    fn link(&mut self, meta: &FileMetadata) {
        add_key(&mut self.by_hash, &meta.hash, &meta.id);
        add_key(&mut self.by_path, &meta.stored_path, &meta.id);
        add_key(&mut self.by_name, &meta.original_name.to_lowercase(), &meta.id);
    }

    fn unlink(&mut self, meta: &FileMetadata) {
        drop_key(&mut self.by_hash, &meta.hash, &meta.id);
        drop_key(&mut self.by_path, &meta.stored_path, &meta.id);
        drop_key(&mut self.by_name, &meta.original_name.to_lowercase(), &meta.id);
    }

    fn collect(&self, ids: Option<&BTreeSet<String>>) -> Vec<FileMetadata> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.entries.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    /// The entry that represents `hash`: active before deleted, the
    /// original upload before copies, oldest first.
    fn canonical(&self, hash: &str) -> Option<&FileMetadata> {
        self.by_hash
            .get(hash)?
            .iter()
            .filter_map(|id| self.entries.get(id))
            .min_by_key(|m| (m.is_deleted(), m.id != m.hash, m.is_hard_link, m.uploaded_at))
    }
}

/// In-memory metadata index. Primary map plus hash, stored-path and
/// lowercase-name secondary keys, all updated under one lock.
#[derive(Default)]
pub struct MetadataIndex {
    inner: RwLock<IndexInner>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = FileMetadata>>(entries: I) -> Self {
        let index = Self::new();
        {
            let mut inner = index.inner.write();
            for meta in entries {
                inner.link(&meta);
                inner.entries.insert(meta.id.clone(), meta);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<FileMetadata> {
        self.inner.read().entries.get(id).cloned()
    }

    /// Resolve an identifier as an entry id first, then as a content hash.
    pub fn resolve(&self, identifier: &str) -> Option<FileMetadata> {
        let inner = self.inner.read();
        inner
            .entries
            .get(identifier)
            .or_else(|| inner.canonical(identifier))
            .cloned()
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<FileMetadata> {
        self.inner.read().canonical(hash).cloned()
    }

    #[cfg(test)]
    pub fn all_with_hash(&self, hash: &str) -> Vec<FileMetadata> {
        let inner = self.inner.read();
        inner.collect(inner.by_hash.get(hash))
    }

    pub fn path_refcount(&self, stored_path: &str) -> usize {
        self.inner
            .read()
            .by_path
            .get(stored_path)
            .map(BTreeSet::len)
            .unwrap_or(0)
    }

    pub fn find_by_name(&self, name: &str) -> Vec<FileMetadata> {
        let inner = self.inner.read();
        let mut found = inner.collect(inner.by_name.get(&name.trim().to_lowercase()));
        found.sort_by_key(|m| m.uploaded_at);
        found
    }

    /// Insert or replace an entry, re-keying secondary indexes. Returns
    /// the previous record.
    pub fn upsert(&self, meta: FileMetadata) -> Option<FileMetadata> {
        let mut inner = self.inner.write();
        let previous = inner.entries.remove(&meta.id);
        if let Some(ref old) = previous {
            inner.unlink(old);
        }
        inner.link(&meta);
        inner.entries.insert(meta.id.clone(), meta);
        previous
    }

    /// Remove an entry. The second value is how many entries still
    /// reference its stored path, computed under the same lock.
    pub fn remove(&self, id: &str) -> Option<(FileMetadata, usize)> {
        let mut inner = self.inner.write();
        let meta = inner.entries.remove(id)?;
        inner.unlink(&meta);
        let remaining = inner
            .by_path
            .get(&meta.stored_path)
            .map(BTreeSet::len)
            .unwrap_or(0);
        Some((meta, remaining))
    }

    pub fn all(&self) -> Vec<FileMetadata> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn to_map(&self) -> HashMap<String, FileMetadata> {
        self.inner.read().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::MediaType;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn meta(id: &str, hash: &str, path: &str, name: &str) -> FileMetadata {
        FileMetadata {
            id: id.into(),
            hash: hash.into(),
            stored_path: path.into(),
            original_name: name.into(),
            category: "other".into(),
            mime_type: "application/octet-stream".into(),
            media_type: MediaType::Other,
            size: 10,
            uploaded_at: Utc::now(),
            deleted_at: None,
            metadata: BTreeMap::new(),
            is_hard_link: false,
            linked_to: None,
        }
    }

    #[test]
    fn test_resolve_by_id_then_hash() {
        let index = MetadataIndex::new();
        index.upsert(meta("h1", "h1", "other/a", "A.txt"));
        let mut copy = meta("c1", "h1", "other/a", "B.txt");
        copy.is_hard_link = true;
        copy.uploaded_at = Utc::now() - Duration::hours(1);
        index.upsert(copy);

        assert_eq!(index.resolve("c1").unwrap().id, "c1");
        // The original upload is canonical even though the copy is older.
        assert_eq!(index.resolve("h1").unwrap().id, "h1");
        assert_eq!(index.all_with_hash("h1").len(), 2);
        assert!(index.resolve("nope").is_none());
    }

    #[test]
    fn test_remove_reports_remaining_refs() {
        let index = MetadataIndex::new();
        index.upsert(meta("h1", "h1", "other/a", "a"));
        index.upsert(meta("l1", "h1", "other/a", "b"));
        index.upsert(meta("l2", "h1", "other/a", "c"));

        assert_eq!(index.path_refcount("other/a"), 3);
        assert_eq!(index.remove("l1").unwrap().1, 2);
        assert_eq!(index.remove("h1").unwrap().1, 1);
        assert_eq!(index.remove("l2").unwrap().1, 0);
        assert!(index.remove("l2").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_upsert_rekeys_secondary_indexes() {
        let index = MetadataIndex::new();
        index.upsert(meta("h1", "h1", "other/a", "Old.txt"));
        let mut renamed = index.get("h1").unwrap();
        renamed.original_name = "New.txt".into();
        renamed.stored_path = "docs/a".into();
        index.upsert(renamed);

        assert!(index.find_by_name("old.txt").is_empty());
        assert_eq!(index.find_by_name("NEW.TXT").len(), 1);
        assert_eq!(index.path_refcount("other/a"), 0);
        assert_eq!(index.path_refcount("docs/a"), 1);
    }

    #[test]
    fn test_concurrent_removals_of_shared_path_leave_one_zero() {
        let index = std::sync::Arc::new(MetadataIndex::new());
        for i in 0..16 {
            index.upsert(meta(&format!("id{i}"), "h", "other/shared", "f"));
        }
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || index.remove(&format!("id{i}")).unwrap().1)
            })
            .collect();
        let zeros = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == 0)
            .count();
        assert_eq!(zeros, 1);
    }
}
