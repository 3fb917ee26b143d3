use serde::Deserialize;

/// Search and list filter. Every field is optional; an all-`None` filter
/// matches every active file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileQuery {
    pub name: Option<String>,
    pub extension: Option<String>,
    pub category: Option<String>,
    pub mime_type: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    /// `name`, `size` or `date`.
    pub sort_by: Option<String>,
    /// `asc` or `desc`.
    pub sort_order: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include_deleted: Option<bool>,
}

impl FileQuery {
    /// Whether any filtering criterion (as opposed to sorting or paging) is set.
    pub fn has_criteria(&self) -> bool {
        let set = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        set(&self.name)
            || set(&self.extension)
            || set(&self.category)
            || set(&self.mime_type)
            || set(&self.date_from)
            || set(&self.date_to)
            || self.min_size.is_some()
            || self.max_size.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct NameLookupQuery {
    pub name: String,
}
