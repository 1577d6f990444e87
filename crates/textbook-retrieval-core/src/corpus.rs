//! Corpus store and title index.
//!
//! The [`CorpusStore`] maps a [`CorpusKey`] to the passage body. The
//! [`TitleIndex`] is the flat, ordered list of `(unit_id, title)` rows used
//! both as the exact-match search space and as the row-to-content mapping for
//! the embedding index: row `i` of the title index is row `i` of the
//! embedding index.
//!
//! Both are built once and never mutated afterwards. [`CorpusBuilder`] is the
//! only way to populate a store.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashMap;

use crate::normalize::{normalize_title, CorpusKey};

/// A retrievable passage of curricular text.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    /// Enclosing curricular unit (chapter).
    pub unit_id: String,
    /// Heading text as it appears in the source.
    pub title: String,
    /// Case-folded, trimmed title used for lookup.
    pub normalized_title: String,
    /// The passage text.
    pub body: String,
}

/// Accumulates passages and rejects duplicate keys.
#[derive(Debug, Default)]
pub struct CorpusBuilder {
    passages: HashMap<CorpusKey, Passage>,
}

impl CorpusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one titled passage to a unit.
    ///
    /// # Errors
    ///
    /// Fails if another passage in the same unit normalizes to the same title.
    pub fn add(
        &mut self,
        unit_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<&mut Self> {
        let unit_id = unit_id.into();
        let title = title.into();
        let key = CorpusKey::new(unit_id.clone(), &title);
        if let Some(existing) = self.passages.get(&key) {
            bail!(
                "duplicate passage key {}: titles {:?} and {:?} normalize to the same value",
                key,
                existing.title,
                title
            );
        }
        let passage = Passage {
            normalized_title: key.normalized_title().to_string(),
            unit_id,
            title,
            body: body.into(),
        };
        self.passages.insert(key, passage);
        Ok(self)
    }

    pub fn build(self) -> CorpusStore {
        CorpusStore {
            passages: self.passages,
        }
    }
}

/// Immutable mapping from `(unit_id, normalized_title)` to passage text.
#[derive(Debug, Default)]
pub struct CorpusStore {
    passages: HashMap<CorpusKey, Passage>,
}

impl CorpusStore {
    /// Build a store from `(unit_id, [(title, body)])` groups.
    ///
    /// # Example
    ///
    /// ```rust
    /// use textbook_retrieval_core::corpus::CorpusStore;
    ///
    /// let store = CorpusStore::from_units([(
    ///     "7".to_string(),
    ///     vec![("Photosynthesis Basics".to_string(), "Plants make sugar.".to_string())],
    /// )])
    /// .unwrap();
    /// assert_eq!(store.lookup("7", "photosynthesis basics"), Some("Plants make sugar."));
    /// ```
    pub fn from_units<U, E>(units: U) -> Result<Self>
    where
        U: IntoIterator<Item = (String, E)>,
        E: IntoIterator<Item = (String, String)>,
    {
        let mut builder = CorpusBuilder::new();
        for (unit_id, entries) in units {
            for (title, body) in entries {
                builder.add(unit_id.clone(), title, body)?;
            }
        }
        Ok(builder.build())
    }

    /// Content for a unit and title, or `None` when the corpus has no such
    /// passage. The title is normalized again, which is a no-op for an
    /// already-normalized title.
    pub fn lookup(&self, unit_id: &str, normalized_title: &str) -> Option<&str> {
        self.content(&CorpusKey::new(unit_id, normalized_title))
    }

    /// Passage body for `key`. An empty body counts as no content.
    pub fn content(&self, key: &CorpusKey) -> Option<&str> {
        self.passages
            .get(key)
            .map(|p| p.body.as_str())
            .filter(|body| !body.is_empty())
    }

    pub fn get(&self, key: &CorpusKey) -> Option<&Passage> {
        self.passages.get(key)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// All passages, in no particular order.
    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.passages.values()
    }
}

/// One row of the title index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleEntry {
    pub unit_id: String,
    pub title: String,
}

impl TitleEntry {
    pub fn new(unit_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            title: title.into(),
        }
    }

    pub fn key(&self) -> CorpusKey {
        CorpusKey::new(self.unit_id.clone(), &self.title)
    }
}

/// Ordered `(unit_id, title)` rows. Row position is the row id shared with
/// the embedding index.
#[derive(Debug, Clone, Default)]
pub struct TitleIndex {
    rows: Vec<TitleEntry>,
    normalized: Vec<String>,
}

impl TitleIndex {
    /// Build an index preserving the given row order.
    pub fn new(rows: Vec<TitleEntry>) -> Self {
        let normalized = rows.iter().map(|r| normalize_title(&r.title)).collect();
        Self { rows, normalized }
    }

    /// Derive rows from the corpus itself, ordered by `(unit_id, title)`.
    ///
    /// Used when no separate metadata list is supplied.
    pub fn from_corpus(corpus: &CorpusStore) -> Self {
        let mut rows: Vec<TitleEntry> = corpus
            .passages()
            .map(|p| TitleEntry::new(p.unit_id.clone(), p.title.clone()))
            .collect();
        rows.sort_by(|a, b| {
            a.unit_id
                .cmp(&b.unit_id)
                .then_with(|| a.title.cmp(&b.title))
        });
        Self::new(rows)
    }

    pub fn rows(&self) -> &[TitleEntry] {
        &self.rows
    }

    pub fn row(&self, id: usize) -> Option<&TitleEntry> {
        self.rows.get(id)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Original title texts in row order, as fed to the embedder.
    pub fn titles(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.title.clone()).collect()
    }

    /// First row (in row order) whose normalized title contains
    /// `normalized_query`.
    ///
    /// This is first-match, not best-match: a query matching several titles
    /// resolves to the lowest row id regardless of how closely the others
    /// match. The empty query is contained in every title and so resolves to
    /// row 0.
    pub fn first_containing(&self, normalized_query: &str) -> Option<(usize, &TitleEntry)> {
        self.normalized
            .iter()
            .position(|t| t.contains(normalized_query))
            .map(|id| (id, &self.rows[id]))
    }
}
