use chrono::Utc;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::models::rule::{CreateRuleRequest, RoutingRule, RuleMatch};
use crate::services::naming::normalize_category;
use crate::services::sniff::essence;

/// User-defined routing rules, persisted as a JSON array.
pub struct RoutingRules {
    path: PathBuf,
    rules: RwLock<Vec<RoutingRule>>,
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl RoutingRules {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let rules = if path.exists() {
            let data = std::fs::read(path)?;
            serde_json::from_slice::<Vec<RoutingRule>>(&data).map_err(anyhow::Error::from)?
        } else {
            Vec::new()
        };
        tracing::debug!(count = rules.len(), "Loaded routing rules");
        Ok(Self {
            path: path.to_path_buf(),
            rules: RwLock::new(rules),
        })
    }

    pub fn list(&self) -> Vec<RoutingRule> {
        self.rules.read().clone()
    }

    /// Exact MIME matches win over extension matches.
    pub fn find_rule(&self, mime: &str, ext: Option<&str>) -> Option<RoutingRule> {
        let mime = essence(mime);
        let ext = ext.map(normalize_extension);
        let rules = self.rules.read();
        rules
            .iter()
            .find(|r| matches!(&r.matcher, RuleMatch::MimeType(m) if *m == mime))
            .or_else(|| {
                let ext = ext.as_deref()?;
                rules
                    .iter()
                    .find(|r| matches!(&r.matcher, RuleMatch::Extension(e) if e == ext))
            })
            .cloned()
    }

    /// The in-memory list only changes once the new list is on disk.
    pub fn add_rule(&self, req: CreateRuleRequest) -> Result<RoutingRule, StorageError> {
        let matcher = match req.matcher {
            RuleMatch::MimeType(m) => {
                let m = essence(&m);
                if !m.contains('/') {
                    return Err(StorageError::InvalidRule(format!("'{}' is not a MIME type", m)));
                }
                RuleMatch::MimeType(m)
            }
            RuleMatch::Extension(e) => {
                let e = normalize_extension(&e);
                if e.is_empty() || e.contains(['/', '\\', '.']) {
                    return Err(StorageError::InvalidRule(format!("'{}' is not an extension", e)));
                }
                RuleMatch::Extension(e)
            }
        };
        let destination = normalize_category(&req.destination.join("/"))
            .map_err(|e| StorageError::InvalidRule(e.to_string()))?;

        let rule = RoutingRule {
            id: uuid::Uuid::new_v4().to_string(),
            matcher,
            destination: destination.split('/').map(str::to_string).collect(),
            created_at: Utc::now(),
        };

        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.matcher == rule.matcher) {
            return Err(StorageError::InvalidRule("a rule for this match already exists".into()));
        }
        let mut next = rules.clone();
        next.push(rule.clone());
        self.save(&next)?;
        *rules = next;
        tracing::info!(rule_id = %rule.id, destination = %rule.destination_path(), "Routing rule added");
        Ok(rule)
    }

    pub fn remove_rule(&self, id: &str) -> Result<RoutingRule, StorageError> {
        let mut rules = self.rules.write();
        let pos = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("Routing rule {} not found", id)))?;
        let mut next = rules.clone();
        let removed = next.remove(pos);
        self.save(&next)?;
        *rules = next;
        tracing::info!(rule_id = %id, "Routing rule removed");
        Ok(removed)
    }

    fn save(&self, rules: &[RoutingRule]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(rules).map_err(anyhow::Error::from)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
