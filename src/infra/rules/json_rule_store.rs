// Rule document stored as a pretty-printed JSON file on disk.

use crate::core::rules::{RuleDocument, RuleError, RuleStore};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleStore for JsonRuleStore {
    async fn load(&self) -> Result<RuleDocument, RuleError> {
        if !self.path.exists() {
            return Err(RuleError::NotFound(self.path.display().to_string()));
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|e| RuleError::Io(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| RuleError::Malformed(e.to_string()))
    }

    async fn save(&self, document: &RuleDocument) -> Result<(), RuleError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RuleError::Io(e.to_string()))?;
            }
        }

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| RuleError::Malformed(e.to_string()))?;

        // Write next to the target and rename, so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| RuleError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| RuleError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::{RuleSet, Severity};
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "stop_words": {
            "gambling": {
                "words": ["casino", "jackpot"],
                "severity": "high",
                "description": "Gambling promotion"
            }
        },
        "word_combinations": [
            { "words": ["free", "money"], "category": "scam", "severity": "critical" }
        ],
        "spam_patterns": [
            { "pattern": "https?://\\S+", "description": "link" }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let document = JsonRuleStore::new(&path).load().await.unwrap();

        assert_eq!(document.stop_words["gambling"].severity, Severity::High);
        assert_eq!(document.word_combinations.len(), 1);
        assert_eq!(document.spam_patterns[0].description, "link");
    }

    #[tokio::test]
    async fn test_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        let missing = JsonRuleStore::new(dir.path().join("absent.json"));
        assert!(matches!(missing.load().await, Err(RuleError::NotFound(_))));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonRuleStore::new(&path).load().await,
            Err(RuleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_added_word_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.json");

        let rules = RuleSet::load(JsonRuleStore::new(&path)).await;
        assert!(rules
            .add_stop_word("Lottery", "gambling", Severity::Medium)
            .await
            .unwrap());

        let reopened = RuleSet::load(JsonRuleStore::new(&path)).await;
        assert_eq!(reopened.snapshot().lookup_word("lottery"), Some("gambling"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        // Trailing comma after the last category
        let broken = r#"{"stop_words": {"insults": {"words": ["idiot", "moron"], "severity": "high", "description": ""},}}"#;
        std::fs::write(&path, broken).unwrap();

        let rules = RuleSet::load(JsonRuleStore::new(&path)).await;
        let result = rules
            .add_stop_word("casino", "gambling", Severity::Medium)
            .await;
        assert!(matches!(result, Err(RuleError::NotLoaded)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);

        // Once the operator fixes the file, reload brings editing back
        std::fs::write(&path, broken.replace("},}}", "}}}")).unwrap();
        rules.reload().await.unwrap();
        assert!(rules
            .add_stop_word("casino", "gambling", Severity::Medium)
            .await
            .unwrap());

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("moron"));
        assert!(saved.contains("casino"));
    }
}
