//! Long-term memory record: distilled user profile with JSON persistence.
//!
//! The record is rewritten atomically (temp file + rename) on every
//! update. Merging favors accumulated knowledge: profile fields only fill
//! in when previously empty, preference lists union, and the metadata
//! counters advance monotonically.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Record metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LongTermMetadata {
    /// Epoch seconds of the last rewrite.
    pub last_update: u64,
    /// Number of rewrites since the record was created.
    pub update_count: u64,
}

/// The distilled long-term record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LongTermRecord {
    /// Running summary of the user's conversations.
    pub summary: String,
    /// Identity facts: name, occupation, location, ...
    pub profile: BTreeMap<String, serde_json::Value>,
    /// Interest lists keyed by topic: music, food, travel, ...
    pub preferences: BTreeMap<String, Vec<String>>,
    pub metadata: LongTermMetadata,
}

impl LongTermRecord {
    /// Load from `path`; a missing file yields the empty record, a corrupt
    /// one logs and yields the empty record (in-memory state continues).
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => {
                    info!(path = %path.display(), "long-term memory loaded");
                    record
                }
                Err(e) => {
                    warn!(path = %path.display(), "long-term memory unreadable, starting empty: {e}");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), "long-term memory unreadable, starting empty: {e}");
                Self::default()
            }
        }
    }

    /// Atomic rewrite: serialize to a sibling temp file, then rename over
    /// the target.
    ///
    /// # Errors
    ///
    /// Returns a persistence error; callers log and continue in memory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| AssistantError::Persistence(format!("encode long-term record: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Merge newly extracted data into the record.
    pub fn merge(&mut self, extracted: &serde_json::Value) {
        if let Some(summary) = extracted.get("summary").and_then(|s| s.as_str()) {
            if !summary.is_empty() {
                self.summary = summary.to_owned();
            }
        }

        if let Some(profile) = extracted.get("profile").and_then(|p| p.as_object()) {
            for (key, value) in profile {
                if value.is_null() {
                    continue;
                }
                if value.as_str().is_some_and(str::is_empty) {
                    continue;
                }
                if value.as_array().is_some_and(Vec::is_empty) {
                    continue;
                }
                let existing_empty = match self.profile.get(key) {
                    None => true,
                    Some(v) => v.is_null() || v.as_str().is_some_and(str::is_empty),
                };
                if existing_empty {
                    self.profile.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(preferences) = extracted.get("preferences").and_then(|p| p.as_object()) {
            for (key, value) in preferences {
                let Some(items) = value.as_array() else {
                    continue;
                };
                let list = self.preferences.entry(key.clone()).or_default();
                for item in items {
                    if let Some(text) = item.as_str() {
                        if !text.is_empty() && !list.iter().any(|x| x == text) {
                            list.push(text.to_owned());
                        }
                    }
                }
            }
            self.preferences.retain(|_, list| !list.is_empty());
        }

        self.metadata.last_update = now_epoch_secs();
        self.metadata.update_count += 1;
    }

    /// Flat `(field, rendered value)` pairs for vector upserts, one per
    /// profile and preference field.
    pub fn vector_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        if !self.summary.is_empty() {
            fields.push(("summary".to_owned(), self.summary.clone()));
        }
        for (key, value) in &self.profile {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.push((key.clone(), rendered));
        }
        for (key, list) in &self.preferences {
            fields.push((key.clone(), list.join(", ")));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fills_empty_profile_fields_only() {
        let mut record = LongTermRecord::default();
        record.merge(&serde_json::json!({
            "profile": {"name": "小明", "occupation": ""},
        }));
        assert_eq!(record.profile["name"], "小明");
        assert!(!record.profile.contains_key("occupation"));

        // A later extraction must not overwrite the established name.
        record.merge(&serde_json::json!({
            "profile": {"name": "小红", "occupation": "工程师"},
        }));
        assert_eq!(record.profile["name"], "小明");
        assert_eq!(record.profile["occupation"], "工程师");
        assert_eq!(record.metadata.update_count, 2);
    }

    #[test]
    fn merge_unions_preference_lists() {
        let mut record = LongTermRecord::default();
        record.merge(&serde_json::json!({
            "preferences": {"music": ["周杰伦", "古典"]},
        }));
        record.merge(&serde_json::json!({
            "preferences": {"music": ["周杰伦", "爵士"], "food": ["川菜"]},
        }));
        assert_eq!(record.preferences["music"], vec!["周杰伦", "古典", "爵士"]);
        assert_eq!(record.preferences["food"], vec!["川菜"]);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("long_term.json");
        let mut record = LongTermRecord::default();
        record.merge(&serde_json::json!({
            "summary": "用户常开车通勤",
            "profile": {"name": "小明"},
            "preferences": {"music": ["周杰伦"]},
        }));
        record.save(&path).expect("save");

        let loaded = LongTermRecord::load_or_default(&path);
        assert_eq!(loaded.summary, "用户常开车通勤");
        assert_eq!(loaded.profile["name"], "小明");
        assert_eq!(loaded.metadata.update_count, 1);
        // No stray temp file left behind.
        assert!(!dir.path().join("long_term.json.tmp").exists());
    }

    #[test]
    fn missing_file_yields_default() {
        let record = LongTermRecord::load_or_default(Path::new("/nonexistent/ltm.json"));
        assert!(record.summary.is_empty());
        assert_eq!(record.metadata.update_count, 0);
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("long_term.json");
        std::fs::write(&path, "{broken").expect("write");
        let record = LongTermRecord::load_or_default(&path);
        assert_eq!(record.metadata.update_count, 0);
    }

    #[test]
    fn vector_fields_cover_profile_and_preferences() {
        let mut record = LongTermRecord::default();
        record.merge(&serde_json::json!({
            "summary": "通勤用户",
            "profile": {"name": "小明"},
            "preferences": {"music": ["周杰伦"]},
        }));
        let fields = record.vector_fields();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"summary"));
        assert!(keys.contains(&"name"));
        assert!(keys.contains(&"music"));
    }
}
