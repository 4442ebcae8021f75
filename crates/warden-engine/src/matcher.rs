use std::sync::LazyLock;

use dashmap::DashMap;
use globset::{Glob, GlobMatcher};

/// Process-wide compiled-glob cache keyed by pattern text. Patterns are
/// value-typed, so entries are never invalidated. Patterns that fail to
/// compile are memoized as non-matching.
static GLOBS: LazyLock<DashMap<String, Option<GlobMatcher>>> = LazyLock::new(DashMap::new);

/// Whether a policy's resource pattern covers a concrete resource string.
///
/// Patterns are shell-style globs; the empty pattern and `*` match any
/// resource. `*` matches across separators, so `aws:s3:bucket/*` covers
/// `aws:s3:bucket/b/x`.
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if let Some(hit) = GLOBS.get(pattern) {
        return hit.value().as_ref().is_some_and(|g| g.is_match(resource));
    }
    let compiled = match Glob::new(pattern) {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(err) => {
            tracing::warn!(
                pattern,
                error = %err,
                "failed to compile resource glob; treating as non-match"
            );
            None
        }
    };
    let matched = compiled.as_ref().is_some_and(|g| g.is_match(resource));
    GLOBS.insert(pattern.to_string(), compiled);
    matched
}

/// Tie-breaking score: more literal characters and fewer wildcards rank
/// higher. The exact formula, `len(p) - 10 * count('*' | '?')`, is part of
/// the engine contract.
pub fn specificity(pattern: &str) -> i64 {
    let wildcards = pattern.chars().filter(|c| matches!(c, '*' | '?')).count() as i64;
    pattern.len() as i64 - wildcards * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_star_match_everything() {
        assert!(resource_matches("", "aws:s3:bucket/b/x"));
        assert!(resource_matches("*", "aws:s3:bucket/b/x"));
        assert!(resource_matches("*", ""));
    }

    #[test]
    fn star_crosses_separators() {
        assert!(resource_matches("aws:s3:bucket/*", "aws:s3:bucket/b/x"));
        assert!(resource_matches("ssh:unix:host/*", "ssh:unix:host/h1"));
        assert!(!resource_matches("aws:s3:bucket/*", "gcp:gcs:bucket/b"));
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(resource_matches("db:pg/orders", "db:pg/orders"));
        assert!(!resource_matches("db:pg/orders", "db:pg/orders2"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        assert!(resource_matches("rdp:host/h?", "rdp:host/h1"));
        assert!(!resource_matches("rdp:host/h?", "rdp:host/h12"));
    }

    #[test]
    fn invalid_pattern_is_a_non_match() {
        assert!(!resource_matches("a{b", "a{b"));
        // Memoized: the second call goes through the cache.
        assert!(!resource_matches("a{b", "a{b"));
    }

    #[test]
    fn specificity_contract_values() {
        assert_eq!(specificity(""), 0);
        assert_eq!(specificity("*"), -9);
        assert_eq!(specificity("aws:*"), -5);
        assert_eq!(specificity("aws:s3:bucket/*"), 5);
        assert_eq!(specificity("aws:s3:bucket/b/*"), 7);
        assert_eq!(specificity("aws:s3:bucket/b/x"), 17);
        assert_eq!(specificity("h?"), -8);
    }

    #[test]
    fn longer_literal_prefix_outranks_shorter_glob() {
        assert!(specificity("aws:s3:bucket/b/*") > specificity("aws:s3:bucket/*"));
        assert!(specificity("aws:s3:bucket/*") > specificity("*"));
    }
}
