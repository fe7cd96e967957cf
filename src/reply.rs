//! Reply entries and normalization of the legacy stored shapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Category given to entries stored without one.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

static CATEGORY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\[(.*?)\]\s*(.*)$").expect("category prefix pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyEntry {
    pub category: String,
    pub text: String,
}

impl ReplyEntry {
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
        }
    }
}

/// A stored entry as found on disk, in any of the shapes older versions
/// wrote: a bare string, a `"[Category] text"` string, or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawReply {
    Text(String),
    Record {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
    },
    Other(Value),
}

impl From<ReplyEntry> for RawReply {
    fn from(entry: ReplyEntry) -> Self {
        RawReply::Record {
            category: Some(Value::String(entry.category)),
            text: Some(Value::String(entry.text)),
            message: None,
        }
    }
}

impl From<&str> for RawReply {
    fn from(text: &str) -> Self {
        RawReply::Text(text.to_string())
    }
}

impl RawReply {
    /// Whether the entry is already a well-formed `{category, text}` object.
    pub fn is_canonical(&self) -> bool {
        matches!(
            self,
            RawReply::Record {
                category: Some(Value::String(_)),
                text: Some(Value::String(_)),
                message: None,
            }
        )
    }
}

fn coerce(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn category_or_default(category: Option<String>) -> String {
    match category.map(|c| c.trim().to_string()) {
        Some(c) if !c.is_empty() => c,
        _ => DEFAULT_CATEGORY.to_string(),
    }
}

/// Normalizes one stored entry. Returns `None` for malformed entries and for
/// entries whose text is blank.
pub fn normalize_one(raw: &RawReply) -> Option<ReplyEntry> {
    let entry = match raw {
        RawReply::Text(s) => match CATEGORY_PREFIX.captures(s) {
            Some(caps) => ReplyEntry {
                category: category_or_default(caps.get(1).map(|m| m.as_str().to_string())),
                text: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            },
            None => ReplyEntry::new(DEFAULT_CATEGORY, s.clone()),
        },
        RawReply::Record {
            category,
            text,
            message,
        } => ReplyEntry {
            category: category_or_default(coerce(category.as_ref())),
            text: coerce(text.as_ref())
                .or_else(|| coerce(message.as_ref()))
                .unwrap_or_default(),
        },
        RawReply::Other(value) => {
            warn!("dropping malformed reply entry: {}", value);
            return None;
        }
    };
    if entry.text.trim().is_empty() {
        debug!("dropping reply entry with empty text in category '{}'", entry.category);
        return None;
    }
    Some(entry)
}

/// Normalizes a stored list. Malformed entries are dropped; this never fails.
pub fn normalize(raw: &[RawReply]) -> Vec<ReplyEntry> {
    raw.iter().filter_map(normalize_one).collect()
}

pub fn needs_normalization(raw: &[RawReply]) -> bool {
    raw.iter().any(|r| !r.is_canonical())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub name: String,
    pub entries: Vec<ReplyEntry>,
}

/// Groups entries by category, keeping categories in first-seen order and
/// entries in stored order.
pub fn group_by_category(entries: &[ReplyEntry]) -> Vec<CategoryGroup> {
    let mut groups: Vec<CategoryGroup> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|g| g.name == entry.category) {
            Some(group) => group.entries.push(entry.clone()),
            None => groups.push(CategoryGroup {
                name: entry.category.clone(),
                entries: vec![entry.clone()],
            }),
        }
    }
    groups
}
