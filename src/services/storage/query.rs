use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::StorageManager;
use crate::error::StorageError;
use crate::models::file::{CategoryStats, DuplicateGroup, FileMetadata, StorageStats};
use crate::models::query::FileQuery;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey {
    Name,
    Size,
    Date,
}

/// A `FileQuery` with its strings parsed and normalized once.
struct Filter {
    name: Option<String>,
    extension: Option<String>,
    category: Option<String>,
    mime_type: Option<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    include_deleted: bool,
    sort_key: SortKey,
    descending: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

/// RFC 3339, or a bare date. A bare upper bound covers that whole day.
fn parse_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>, StorageError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        StorageError::InvalidQuery(format!("'{}' is not RFC 3339 or YYYY-MM-DD", raw))
    })?;
    let time = if upper {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| StorageError::InvalidQuery(format!("'{}' is out of range", raw)))
}

impl Filter {
    fn compile(query: &FileQuery) -> Result<Self, StorageError> {
        let date_from = non_empty(&query.date_from)
            .map(|d| parse_bound(&d, false))
            .transpose()?;
        let date_to = non_empty(&query.date_to)
            .map(|d| parse_bound(&d, true))
            .transpose()?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(StorageError::InvalidQuery("date_from is after date_to".into()));
            }
        }
        if let (Some(min), Some(max)) = (query.min_size, query.max_size) {
            if min > max {
                return Err(StorageError::InvalidQuery("min_size is larger than max_size".into()));
            }
        }

        let sort_key = match non_empty(&query.sort_by).as_deref() {
            None | Some("date") => SortKey::Date,
            Some("name") => SortKey::Name,
            Some("size") => SortKey::Size,
            Some(other) => {
                return Err(StorageError::InvalidQuery(format!(
                    "unknown sort key '{}' (expected name, size or date)",
                    other
                )))
            }
        };
        let descending = match non_empty(&query.sort_order).as_deref() {
            None => sort_key == SortKey::Date,
            Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(StorageError::InvalidQuery(format!(
                    "unknown sort order '{}' (expected asc or desc)",
                    other
                )))
            }
        };

        Ok(Self {
            name: non_empty(&query.name),
            extension: non_empty(&query.extension).map(|e| e.trim_start_matches('.').to_string()),
            category: non_empty(&query.category).map(|c| c.trim_matches('/').to_string()),
            mime_type: non_empty(&query.mime_type),
            min_size: query.min_size,
            max_size: query.max_size,
            date_from,
            date_to,
            include_deleted: query.include_deleted.unwrap_or(false),
            sort_key,
            descending,
        })
    }

    fn matches(&self, meta: &FileMetadata) -> bool {
        if meta.is_deleted() && !self.include_deleted {
            return false;
        }
        if let Some(ref name) = self.name {
            if !meta.original_name.to_lowercase().contains(name) {
                return false;
            }
        }
        if let Some(ref ext) = self.extension {
            if meta.extension().as_deref() != Some(ext.as_str()) {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            let own = meta.category.to_lowercase();
            let nested = own.len() > category.len()
                && own.starts_with(category.as_str())
                && own.as_bytes()[category.len()] == b'/';
            if own != *category && !nested {
                return false;
            }
        }
        if let Some(ref mime) = self.mime_type {
            if !meta.mime_type.eq_ignore_ascii_case(mime) {
                return false;
            }
        }
        if self.min_size.is_some_and(|min| meta.size < min)
            || self.max_size.is_some_and(|max| meta.size > max)
        {
            return false;
        }
        if self.date_from.is_some_and(|from| meta.uploaded_at < from)
            || self.date_to.is_some_and(|to| meta.uploaded_at > to)
        {
            return false;
        }
        true
    }

    fn compare(&self, a: &FileMetadata, b: &FileMetadata) -> Ordering {
        let ord = match self.sort_key {
            SortKey::Name => a
                .original_name
                .to_lowercase()
                .cmp(&b.original_name.to_lowercase()),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Date => a.uploaded_at.cmp(&b.uploaded_at),
        }
        .then_with(|| a.id.cmp(&b.id));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// `(skip, take)` from page/offset/limit. Without any of them everything is returned.
fn window(query: &FileQuery) -> (usize, Option<usize>) {
    if query.page.is_none() && query.offset.is_none() && query.limit.is_none() {
        return (0, None);
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let skip = match (query.offset, query.page) {
        (Some(offset), _) => offset,
        (None, Some(page)) => page.max(1).saturating_sub(1).saturating_mul(limit),
        (None, None) => 0,
    };
    (skip, Some(limit))
}

impl StorageManager {
    pub fn query_files(&self, query: &FileQuery) -> Result<Vec<FileMetadata>, StorageError> {
        let filter = Filter::compile(query)?;
        let mut found: Vec<FileMetadata> = self
            .index
            .all()
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        found.sort_by(|a, b| filter.compare(a, b));

        let (skip, take) = window(query);
        let page = found.into_iter().skip(skip);
        Ok(match take {
            Some(n) => page.take(n).collect(),
            None => page.collect(),
        })
    }

    /// Number of entries matching `query`, ignoring pagination.
    pub fn count_files(&self, query: &FileQuery) -> Result<usize, StorageError> {
        let filter = Filter::compile(query)?;
        Ok(self.index.all().iter().filter(|m| filter.matches(m)).count())
    }

    /// Exact, case-insensitive match on the original name, oldest first.
    pub fn find_by_original_name(&self, name: &str) -> Vec<FileMetadata> {
        self.index.find_by_name(name)
    }

    /// Active content stored more than once on disk. Hard links share
    /// bytes and do not count.
    pub fn find_duplicates(&self) -> Vec<DuplicateGroup> {
        let mut by_hash: HashMap<String, Vec<FileMetadata>> = HashMap::new();
        for meta in self.index.all() {
            if !meta.is_deleted() {
                by_hash.entry(meta.hash.clone()).or_default().push(meta);
            }
        }

        let mut groups: Vec<DuplicateGroup> = by_hash
            .into_iter()
            .filter_map(|(hash, entries)| {
                let mut paths = HashSet::new();
                let mut files: Vec<FileMetadata> = entries
                    .into_iter()
                    .filter(|m| paths.insert(m.stored_path.clone()))
                    .collect();
                if files.len() < 2 {
                    return None;
                }
                files.sort_by_key(|m| m.uploaded_at);
                let count = files.len();
                Some(DuplicateGroup {
                    total_wasted: files[0].size * (count as u64 - 1),
                    hash,
                    count,
                    files,
                })
            })
            .collect();
        groups.sort_by(|a, b| b.total_wasted.cmp(&a.total_wasted).then(a.hash.cmp(&b.hash)));
        groups
    }

    /// File count and bytes per category, active entries only.
    pub fn get_categories(&self) -> BTreeMap<String, CategoryStats> {
        let mut categories: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for meta in self.index.all() {
            if meta.is_deleted() {
                continue;
            }
            let stats = categories.entry(meta.category.clone()).or_default();
            stats.files += 1;
            stats.bytes += meta.size;
        }
        categories
    }

    pub fn get_stats(&self) -> StorageStats {
        let all = self.index.all();
        let mut stats = StorageStats {
            total_files: all.len(),
            categories: self.get_categories(),
            ..Default::default()
        };
        let mut hashes = HashSet::new();
        let mut paths = HashSet::new();
        for meta in &all {
            if meta.is_deleted() {
                stats.deleted_files += 1;
            } else {
                stats.active_files += 1;
            }
            if meta.is_hard_link {
                stats.hard_links += 1;
            }
            stats.logical_bytes += meta.size;
            hashes.insert(meta.hash.as_str());
            if paths.insert(meta.stored_path.as_str()) {
                stats.physical_bytes += meta.size;
            }
        }
        stats.unique_hashes = hashes.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::file::CopyRequest;

    fn query() -> FileQuery {
        FileQuery::default()
    }

    #[test]
    fn test_filters_combine() {
        let (manager, _tmp) = manager();
        store(&manager, "Report.PDF", b"%PDF-1.4 report");
        store(&manager, "notes.txt", b"some notes here");
        store(&manager, "photo.png", b"\x89PNG\r\n\x1a\nxxxx");

        let by_name = manager
            .query_files(&FileQuery {
                name: Some("REP".into()),
                ..query()
            })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].original_name, "Report.PDF");

        let by_ext = manager
            .query_files(&FileQuery {
                extension: Some(".pdf".into()),
                ..query()
            })
            .unwrap();
        assert_eq!(by_ext.len(), 1);

        let by_category = manager
            .query_files(&FileQuery {
                category: Some("Documents".into()),
                ..query()
            })
            .unwrap();
        assert_eq!(by_category.len(), 2);

        let by_mime = manager
            .query_files(&FileQuery {
                mime_type: Some("IMAGE/PNG".into()),
                ..query()
            })
            .unwrap();
        assert_eq!(by_mime.len(), 1);

        let by_size = manager
            .count_files(&FileQuery {
                min_size: Some(15),
                max_size: Some(15),
                ..query()
            })
            .unwrap();
        assert_eq!(by_size, 2);
    }

    #[test]
    fn test_date_only_upper_bound_includes_the_day() {
        let (manager, _tmp) = manager();
        store(&manager, "a.txt", b"alpha");
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let found = manager
            .query_files(&FileQuery {
                date_from: Some(today.clone()),
                date_to: Some(today),
                ..query()
            })
            .unwrap();
        assert_eq!(found.len(), 1);

        assert!(matches!(
            manager.query_files(&FileQuery {
                date_from: Some("yesterday".into()),
                ..query()
            }),
            Err(StorageError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_deleted_hidden_unless_requested() {
        let (manager, _tmp) = manager();
        let a = store(&manager, "a.txt", b"alpha").file;
        store(&manager, "b.txt", b"beta");
        manager.soft_delete_file(&a.id).unwrap();

        assert_eq!(manager.count_files(&query()).unwrap(), 1);
        let all = FileQuery {
            include_deleted: Some(true),
            ..query()
        };
        assert_eq!(manager.count_files(&all).unwrap(), 2);
    }

    #[test]
    fn test_sort_and_paginate() {
        let (manager, _tmp) = manager();
        for (name, body) in [("c.txt", "ccc"), ("a.txt", "a"), ("b.txt", "bb")] {
            store(&manager, name, body.as_bytes());
        }
        let names = |q: FileQuery| -> Vec<String> {
            manager
                .query_files(&q)
                .unwrap()
                .into_iter()
                .map(|m| m.original_name)
                .collect()
        };

        assert_eq!(
            names(FileQuery {
                sort_by: Some("name".into()),
                ..query()
            }),
            vec!["a.txt", "b.txt", "c.txt"]
        );
        assert_eq!(
            names(FileQuery {
                sort_by: Some("size".into()),
                sort_order: Some("desc".into()),
                page: Some(2),
                limit: Some(2),
                ..query()
            }),
            vec!["a.txt"]
        );
        assert_eq!(
            names(FileQuery {
                sort_by: Some("name".into()),
                offset: Some(1),
                limit: Some(1),
                ..query()
            }),
            vec!["b.txt"]
        );
        assert!(manager
            .query_files(&FileQuery {
                sort_by: Some("colour".into()),
                ..query()
            })
            .is_err());
    }

    #[test]
    fn test_duplicates_ignore_hard_links() {
        let (manager, _tmp) = manager();
        let f = store(&manager, "a.txt", b"alpha").file;
        manager
            .copy_file(
                &f.id,
                CopyRequest {
                    hard_link: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(manager.find_duplicates().is_empty());

        manager
            .copy_file(
                &f.id,
                CopyRequest {
                    new_name: Some("b.txt".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let groups = manager.find_duplicates();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].total_wasted, 5);
    }

    #[test]
    fn test_stats_and_categories() {
        let (manager, _tmp) = manager();
        let f = store(&manager, "a.txt", b"alpha").file;
        store(&manager, "b.png", b"\x89PNG\r\n\x1a\n");
        manager
            .copy_file(
                &f.id,
                CopyRequest {
                    hard_link: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.hard_links, 1);
        assert_eq!(stats.unique_hashes, 2);
        assert_eq!(stats.logical_bytes, 5 + 8 + 5);
        assert_eq!(stats.physical_bytes, 5 + 8);
        assert_eq!(stats.categories["documents"].files, 2);
        assert_eq!(stats.categories["images"].bytes, 8);
    }

    #[test]
    fn test_find_by_original_name() {
        let (manager, _tmp) = manager();
        store(&manager, "Budget.xlsx", b"numbers");
        assert_eq!(manager.find_by_original_name("budget.XLSX").len(), 1);
        assert!(manager.find_by_original_name("budget").is_empty());
    }
}
