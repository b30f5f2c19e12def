//! Tamper-diagnostic text comparison (spec.md §4 "out-of-ledger-scope
//! similarity diagnostic"), grounded in `original_source/kmp.py` and
//! `original_source/text_matcher.py::find_text_matches`.
//!
//! The Python original runs Knuth-Morris-Pratt over the original text to
//! locate every occurrence of each word from the modified text, then
//! folds adjacent word-level matches into phrase-level matches before
//! scoring with `difflib.SequenceMatcher.ratio()`. We keep the KMP
//! substring primitive (it is the one piece of the original worth
//! carrying over verbatim) but score the overall similarity with a
//! word-multiset overlap ratio rather than `SequenceMatcher`'s O(n*m)
//! longest-matching-block search, which is unaffordable on full page
//! text. The classification thresholds are the original's.

use std::collections::HashMap;

use ledgerpdf_core::{MatchKind, TextMatch, TextMatcher};

/// Longest proper prefix which is also a suffix, for every prefix of
/// `pattern` (`original_source/kmp.py::calculate_lps`).
fn longest_prefix_suffix(pattern: &[char]) -> Vec<usize> {
    let mut lps = vec![0usize; pattern.len()];
    let mut len = 0;
    let mut i = 1;
    while i < pattern.len() {
        if pattern[i] == pattern[len] {
            len += 1;
            lps[i] = len;
            i += 1;
        } else if len != 0 {
            len = lps[len - 1];
        } else {
            lps[i] = 0;
            i += 1;
        }
    }
    lps
}

/// Every starting index in `text` at which `pattern` occurs
/// (`original_source/kmp.py::kmp_search`).
fn kmp_search(text: &[char], pattern: &[char]) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > text.len() {
        return Vec::new();
    }
    let lps = longest_prefix_suffix(pattern);
    let mut matches = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < text.len() {
        if text[i] == pattern[j] {
            i += 1;
            j += 1;
            if j == pattern.len() {
                matches.push(i - j);
                j = lps[j - 1];
            }
        } else if j != 0 {
            j = lps[j - 1];
        } else {
            i += 1;
        }
    }
    matches
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Word-multiset overlap ratio in `[0, 100]`; each word in `original` is
/// matched against `modified` at most once via [`kmp_search`] over the
/// modified text's characters, mirroring the original's per-word KMP scan.
fn similarity_percent(original: &str, modified: &str) -> f64 {
    let original_words = words(original);
    if original_words.is_empty() {
        return if words(modified).is_empty() { 100.0 } else { 0.0 };
    }
    let modified_chars: Vec<char> = modified.chars().collect();
    let mut consumed: HashMap<usize, bool> = HashMap::new();
    let mut matched = 0usize;

    for word in &original_words {
        let pattern: Vec<char> = word.chars().collect();
        let occurrences = kmp_search(&modified_chars, &pattern);
        if let Some(&start) = occurrences.iter().find(|start| !consumed.contains_key(start)) {
            consumed.insert(start, true);
            matched += 1;
        }
    }

    (matched as f64 / original_words.len() as f64) * 100.0
}

/// KMP-backed [`TextMatcher`], classifying by the original's thresholds:
/// exact when normalized text is identical, then >=99.5 exact, >=75
/// modified, >=40 similar, otherwise different.
#[derive(Debug, Default, Clone, Copy)]
pub struct KmpTextMatcher;

impl TextMatcher for KmpTextMatcher {
    fn compare(&self, original: &str, modified: &str) -> TextMatch {
        let normalized_original = normalize(original);
        let normalized_modified = normalize(modified);

        if normalized_original == normalized_modified {
            return TextMatch { kind: MatchKind::Exact, similarity: 100.0 };
        }

        let similarity = similarity_percent(&normalized_original, &normalized_modified);
        let kind = if similarity >= 99.5 {
            MatchKind::Exact
        } else if similarity >= 75.0 {
            MatchKind::Modified
        } else if similarity >= 40.0 {
            MatchKind::Similar
        } else {
            MatchKind::Different
        };
        TextMatch { kind, similarity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_an_exact_match() {
        let result = KmpTextMatcher.compare("the quick brown fox", "the quick brown fox");
        assert_eq!(result.kind, MatchKind::Exact);
        assert_eq!(result.similarity, 100.0);
    }

    #[test]
    fn whitespace_only_differences_are_still_exact() {
        let result = KmpTextMatcher.compare("the  quick\nbrown fox", "the quick brown fox");
        assert_eq!(result.kind, MatchKind::Exact);
    }

    #[test]
    fn a_handful_of_word_changes_is_modified() {
        let original = "the quick brown fox jumps over the lazy dog today";
        let modified = "the quick brown fox leaps over the lazy dog today";
        let result = KmpTextMatcher.compare(original, modified);
        assert_eq!(result.kind, MatchKind::Modified);
    }

    #[test]
    fn completely_unrelated_text_is_different() {
        let result = KmpTextMatcher.compare(
            "the quick brown fox jumps over the lazy dog",
            "lorem ipsum dolor sit amet consectetur adipiscing elit",
        );
        assert_eq!(result.kind, MatchKind::Different);
    }

    #[test]
    fn kmp_search_finds_every_occurrence() {
        let text: Vec<char> = "abababab".chars().collect();
        let pattern: Vec<char> = "aba".chars().collect();
        assert_eq!(kmp_search(&text, &pattern), vec![0, 2, 4]);
    }

    #[test]
    fn kmp_search_on_missing_pattern_is_empty() {
        let text: Vec<char> = "hello world".chars().collect();
        let pattern: Vec<char> = "xyz".chars().collect();
        assert!(kmp_search(&text, &pattern).is_empty());
    }
}
