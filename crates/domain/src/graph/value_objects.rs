//! Value objects and field rules for the knowledge-graph domain.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Longest accepted node content, in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Most keywords a node may carry.
pub const MAX_KEYWORDS: usize = 20;

/// Longest accepted keyword, in characters.
pub const MAX_KEYWORD_CHARS: usize = 64;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "from", "have", "into", "just", "more", "only", "over",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "very", "were", "what", "when", "where", "which", "while", "with", "would", "your",
];

/// Identifier of the user who owns graphs and nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Validation("user id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trims content and checks it is non-empty and within bounds.
pub fn validate_content(content: &str) -> Result<String, DomainError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(DomainError::Validation("content must not be empty".to_string()));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(DomainError::Validation(format!(
            "content has {chars} characters, at most {MAX_CONTENT_CHARS} allowed"
        )));
    }
    Ok(content.to_string())
}

/// Lowercases, trims and deduplicates keywords, keeping first-seen order.
///
/// Blank keywords are dropped. Fails if a keyword is too long or more than
/// [`MAX_KEYWORDS`] distinct keywords remain.
pub fn normalize_keywords<I, K>(keywords: I) -> Result<Vec<String>, DomainError>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::new();

    for keyword in keywords {
        let keyword = keyword.as_ref().trim().to_lowercase();
        if keyword.is_empty() {
            continue;
        }
        if keyword.chars().count() > MAX_KEYWORD_CHARS {
            return Err(DomainError::Validation(format!(
                "keyword '{keyword}' is longer than {MAX_KEYWORD_CHARS} characters"
            )));
        }
        if seen.insert(keyword.clone()) {
            normalized.push(keyword);
        }
    }

    if normalized.len() > MAX_KEYWORDS {
        return Err(DomainError::Validation(format!(
            "{} keywords given, at most {MAX_KEYWORDS} allowed",
            normalized.len()
        )));
    }

    Ok(normalized)
}

/// Picks the most frequent meaningful words of `content` as keywords.
///
/// Words shorter than four characters and common stopwords are skipped.
/// Ties are broken alphabetically so the result is deterministic.
pub fn extract_keywords(content: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in content
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(&w.as_str()))
    {
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    ranked
        .into_iter()
        .take(limit.min(MAX_KEYWORDS))
        .map(|(word, _)| word)
        .collect()
}
