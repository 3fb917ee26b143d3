use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleMatch {
    MimeType(String),
    Extension(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub matcher: RuleMatch,
    /// Category path segments, e.g. `["media", "raw"]`.
    pub destination: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RoutingRule {
    pub fn destination_path(&self) -> String {
        self.destination.join("/")
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub matcher: RuleMatch,
    pub destination: Vec<String>,
}
