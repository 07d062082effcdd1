// Rule set service - owns the editable rule document and the compiled
// snapshot the filter reads.
//
// Readers never block on I/O: they clone an `Arc<RuleBook>` out of a short
// read lock. Writers (reload, add word, add combination) are serialized on the
// document mutex, build a fresh RuleBook, persist, and only then swap it in.
//
// A document that exists but could not be read is never overwritten: edits
// are refused until a reload succeeds.

use super::rule_models::{
    RuleBook, RuleDocument, Severity, StopWordCategory, WordCombination,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule document not found: {0}")]
    NotFound(String),

    #[error("Malformed rule document: {0}")]
    Malformed(String),

    #[error("Rule storage I/O error: {0}")]
    Io(String),

    #[error("Invalid spam pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule document failed to load, fix it and reload before editing")]
    NotLoaded,
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Where the declarative rule document lives.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Read the full document.
    async fn load(&self) -> Result<RuleDocument, RuleError>;

    /// Replace the stored document with `document`.
    async fn save(&self, document: &RuleDocument) -> Result<(), RuleError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct RuleSet<S: RuleStore> {
    store: S,
    /// `None` while the stored document is unreadable
    document: Mutex<Option<RuleDocument>>,
    compiled: RwLock<Arc<RuleBook>>,
}

impl<S: RuleStore> RuleSet<S> {
    /// Load the rules from `store`.
    ///
    /// A missing or malformed document does not stop the process: the rule
    /// set starts empty and local moderation is effectively disabled until a
    /// successful reload. A missing document can be built up with edits; a
    /// malformed one is left alone.
    pub async fn load(store: S) -> Self {
        let (document, book) = match Self::read_document(&store).await {
            Ok((document, book)) => (Some(document), book),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to load moderation rules, continuing with an EMPTY rule set"
                );
                let document = match e {
                    RuleError::NotFound(_) => Some(RuleDocument::default()),
                    _ => None,
                };
                (document, RuleBook::empty())
            }
        };

        if book.is_empty() {
            tracing::warn!("No moderation rules active, only heuristic triggers apply");
        }

        tracing::info!(
            categories = book.category_count(),
            combinations = book.combination_count(),
            spam_patterns = book.spam_patterns().len(),
            "Moderation rules loaded"
        );

        Self {
            store,
            document: Mutex::new(document),
            compiled: RwLock::new(Arc::new(book)),
        }
    }

    async fn read_document(store: &S) -> Result<(RuleDocument, RuleBook), RuleError> {
        let document = store.load().await?;
        let book = RuleBook::compile(&document)?;
        Ok((document, book))
    }

    /// Re-read the document from the store and replace the active rules.
    ///
    /// On failure the previous rules stay active untouched.
    pub async fn reload(&self) -> Result<(), RuleError> {
        let mut document = self.document.lock().await;
        let (fresh, book) = Self::read_document(&self.store).await.map_err(|e| {
            tracing::error!(error = %e, "Rule reload failed, keeping previous rules");
            e
        })?;

        *document = Some(fresh);
        *self.compiled.write() = Arc::new(book);
        tracing::info!("Moderation rules reloaded");
        Ok(())
    }

    /// The currently active compiled rules.
    pub fn snapshot(&self) -> Arc<RuleBook> {
        Arc::clone(&self.compiled.read())
    }

    /// Add a stop word to `category`, creating the category if needed.
    ///
    /// Returns `Ok(false)` without touching storage when the word is already
    /// present in that category.
    pub async fn add_stop_word(
        &self,
        word: &str,
        category: &str,
        severity: Severity,
    ) -> Result<bool, RuleError> {
        let word = word.trim().to_lowercase();
        let category = category.trim();
        if word.is_empty() || category.is_empty() {
            return Err(RuleError::InvalidRule(
                "stop word and category must not be empty".to_string(),
            ));
        }

        let mut guard = self.document.lock().await;
        let document = guard.as_mut().ok_or(RuleError::NotLoaded)?;
        if document
            .stop_words
            .get(category)
            .is_some_and(|c| c.words.iter().any(|w| w.trim().to_lowercase() == word))
        {
            return Ok(false);
        }

        let mut updated = document.clone();
        updated
            .stop_words
            .entry(category.to_string())
            .or_insert_with(|| StopWordCategory {
                words: Vec::new(),
                severity,
                description: format!("Category {}", category),
            })
            .words
            .push(word.clone());

        self.commit(document, updated).await?;
        tracing::info!(word = %word, category = %category, "Added stop word");
        Ok(true)
    }

    /// Add a forbidden word pair. Returns `Ok(false)` if an identical entry
    /// (same words, category and severity) already exists.
    pub async fn add_combination(
        &self,
        word_a: &str,
        word_b: &str,
        category: &str,
        severity: Severity,
    ) -> Result<bool, RuleError> {
        let word_a = word_a.trim().to_lowercase();
        let word_b = word_b.trim().to_lowercase();
        if word_a.is_empty() || word_b.is_empty() || category.trim().is_empty() {
            return Err(RuleError::InvalidRule(
                "combination words and category must not be empty".to_string(),
            ));
        }

        let combo = WordCombination::new(word_a, word_b, category.trim(), severity);

        let mut guard = self.document.lock().await;
        let document = guard.as_mut().ok_or(RuleError::NotLoaded)?;
        if document.word_combinations.contains(&combo) {
            return Ok(false);
        }

        let mut updated = document.clone();
        updated.word_combinations.push(combo.clone());

        self.commit(document, updated).await?;
        tracing::info!(
            word_a = %combo.word_a(),
            word_b = %combo.word_b(),
            category = %combo.category,
            "Added word combination"
        );
        Ok(true)
    }

    /// Persist `updated`, then make it the active document and snapshot.
    /// Nothing in memory changes if compiling or saving fails.
    async fn commit(
        &self,
        document: &mut RuleDocument,
        updated: RuleDocument,
    ) -> Result<(), RuleError> {
        let book = RuleBook::compile(&updated)?;
        self.store.save(&updated).await?;
        *document = updated;
        *self.compiled.write() = Arc::new(book);
        Ok(())
    }
}
