//! Title normalization and the composite corpus key.
//!
//! Every content lookup goes through [`normalize_title`]. Corpus construction,
//! title index construction, and query handling all share this one function;
//! if two of them ever normalized differently the exact-match pass would stop
//! matching without any error.

use serde::Serialize;
use std::fmt;

/// Case-fold and trim a title or query string.
///
/// Idempotent: `normalize_title(&normalize_title(x)) == normalize_title(x)`.
///
/// # Example
///
/// ```rust
/// use textbook_retrieval_core::normalize::normalize_title;
///
/// assert_eq!(normalize_title("  Photosynthesis Basics\n"), "photosynthesis basics");
/// ```
pub fn normalize_title(title: &str) -> String {
    title.to_lowercase().trim().to_string()
}

/// Lookup key for a passage: the enclosing unit plus the normalized title.
///
/// The only constructor normalizes the title, so a key holding a
/// non-normalized title cannot be built. Equality and hashing are over both
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CorpusKey {
    unit_id: String,
    normalized_title: String,
}

impl CorpusKey {
    /// Build a key, normalizing `title`.
    ///
    /// Passing an already-normalized title is fine; normalization is
    /// idempotent.
    pub fn new(unit_id: impl Into<String>, title: &str) -> Self {
        Self {
            unit_id: unit_id.into(),
            normalized_title: normalize_title(title),
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn normalized_title(&self) -> &str {
        &self.normalized_title
    }
}

impl fmt::Display for CorpusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.unit_id, self.normalized_title)
    }
}
