//! Issue-key extraction.
//!
//! The pattern is built from the tracker's live project list, so it cannot
//! be a static regex. Compiled patterns are memoised per distinct prefix
//! list; a changed project list simply hashes to a new entry.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Ordered, duplicate-free set of project short names (`PROJ`, `WEB`, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectPrefixSet {
    prefixes: Vec<String>,
}

impl ProjectPrefixSet {
    /// Blank names are dropped; repeats keep their first position.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut prefixes = Vec::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim();
            if name.is_empty() || !seen.insert(name.to_ascii_uppercase()) {
                continue;
            }
            prefixes.push(name.to_string());
        }
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }
}

/// An issue key such as `PROJ-123`, always upper case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueKey(String);

impl IssueKey {
    pub fn new(raw: &str) -> Self {
        IssueKey(raw.to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IssueKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Distinct project lists kept compiled at once. Past this the cache starts
/// over; project lists change rarely, so it only fills up on churn.
const MAX_CACHED_PATTERNS: usize = 32;

static PATTERN_CACHE: Lazy<DashMap<u64, Arc<Regex>>> = Lazy::new(DashMap::new);

fn cache_pattern(cache: &DashMap<u64, Arc<Regex>>, key: u64, pattern: Arc<Regex>, cap: usize) {
    if cache.len() >= cap && !cache.contains_key(&key) {
        cache.clear();
    }
    cache.insert(key, pattern);
}

/// Return the compiled `(p1|p2|...)-[0-9]+` pattern for a prefix set,
/// building and caching it on first use. `None` for an empty set.
pub fn key_pattern_for(prefixes: &ProjectPrefixSet) -> Option<Arc<Regex>> {
    if prefixes.is_empty() {
        return None;
    }
    let mut hasher = AHasher::default();
    for prefix in prefixes.iter() {
        prefix.hash(&mut hasher);
    }
    let cache_key = hasher.finish();
    if let Some(existing) = PATTERN_CACHE.get(&cache_key) {
        return Some(existing.clone());
    }

    let alternation = prefixes
        .iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    let pattern = match RegexBuilder::new(&format!(r"({})-[0-9]+", alternation))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Arc::new(re),
        Err(err) => {
            // Escaped literals only; reachable solely through the size limit.
            tracing::error!(error = %err, prefix_count = prefixes.len(), "failed to compile issue key pattern");
            return None;
        }
    };
    cache_pattern(&PATTERN_CACHE, cache_key, pattern.clone(), MAX_CACHED_PATTERNS);
    Some(pattern)
}

/// Cheap check for a `-` followed by an ASCII digit. Text failing it cannot
/// contain an issue key, whatever the project list.
pub fn might_mention_issue(text: &str) -> bool {
    let bytes = text.as_bytes();
    memchr::memchr_iter(b'-', bytes).any(|idx| {
        bytes
            .get(idx + 1)
            .is_some_and(|next| next.is_ascii_digit())
    })
}

/// Extract issue keys from `text`, upper-cased and deduplicated in
/// first-seen order.
pub fn extract_issue_keys(text: &str, prefixes: &ProjectPrefixSet) -> Vec<IssueKey> {
    let Some(pattern) = key_pattern_for(prefixes) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for m in pattern.find_iter(text) {
        let key = IssueKey::new(m.as_str());
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}
