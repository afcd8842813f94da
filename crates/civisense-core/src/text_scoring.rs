//! Keyword-weighted text scoring (C6): the first term in the priority score.
//!
//! Title and description are concatenated, case-folded, tokenized to
//! `[a-z0-9]+` runs, and stop words stripped. The filtered text is then
//! matched word-boundary-exact against three weighted keyword groups; the
//! base score is `min(6, 3*high + 2*medium + 1*normal)`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

const HIGH_RISK: &[&str] = &[
    "accident",
    "injury",
    "emergency",
    "collapsed",
    "fire",
    "exposed wire",
    "flooding main road",
];

const MEDIUM_RISK: &[&str] = &[
    "dangerous",
    "deep",
    "overflow",
    "blocking traffic",
    "severe",
    "heavy leakage",
];

const NORMAL_RISK: &[&str] = &[
    "pothole",
    "garbage",
    "drainage",
    "leak",
    "broken",
    "damaged",
    "streetlight",
];

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "our", "she",
    "that", "the", "their", "them", "there", "they", "this", "to", "was", "we", "were", "with",
    "you", "your",
];

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("static token regex is valid"));

/// Outcome of scoring a complaint's title and description.
#[derive(Debug, Clone, PartialEq)]
pub struct TextScoreResult {
    /// The stop-word-stripped, tokenized text actually matched against.
    pub filtered_text: String,
    /// Number of high-risk keyword occurrences.
    pub high_count: usize,
    /// Number of medium-risk keyword occurrences.
    pub medium_count: usize,
    /// Number of normal-risk keyword occurrences.
    pub normal_count: usize,
    /// `min(6, 3*high_count + 2*medium_count + normal_count)`.
    pub base_score: f64,
    /// High-risk keywords that matched at least once.
    pub matched_high: Vec<&'static str>,
    /// Medium-risk keywords that matched at least once.
    pub matched_medium: Vec<&'static str>,
    /// Normal-risk keywords that matched at least once.
    pub matched_normal: Vec<&'static str>,
}

/// Stateless scorer over the three built-in keyword groups.
///
/// Compiles its keyword patterns once at construction; cheap to keep a
/// single long-lived instance per process.
pub struct TextScoringEngine {
    stop_words: HashSet<&'static str>,
    high_patterns: Vec<(&'static str, Regex)>,
    medium_patterns: Vec<(&'static str, Regex)>,
    normal_patterns: Vec<(&'static str, Regex)>,
}

impl Default for TextScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextScoringEngine {
    /// Builds a scoring engine with the default stop-word list.
    #[must_use]
    pub fn new() -> Self {
        let stop_words: HashSet<&'static str> = DEFAULT_STOP_WORDS.iter().copied().collect();
        Self {
            high_patterns: compile_patterns(HIGH_RISK, &stop_words),
            medium_patterns: compile_patterns(MEDIUM_RISK, &stop_words),
            normal_patterns: compile_patterns(NORMAL_RISK, &stop_words),
            stop_words,
        }
    }

    /// Scores a complaint's title and description.
    #[must_use]
    pub fn score(&self, title: Option<&str>, description: Option<&str>) -> TextScoreResult {
        let combined = format!(
            "{} {}",
            title.unwrap_or_default(),
            description.unwrap_or_default()
        )
        .trim()
        .to_lowercase();
        let filtered_text = normalize(&combined, &self.stop_words);

        let (high_count, matched_high) = count_group_matches(&filtered_text, &self.high_patterns);
        let (medium_count, matched_medium) =
            count_group_matches(&filtered_text, &self.medium_patterns);
        let (normal_count, matched_normal) =
            count_group_matches(&filtered_text, &self.normal_patterns);

        #[allow(clippy::cast_precision_loss)]
        let base_score = (3 * high_count + 2 * medium_count + normal_count).min(6) as f64;

        TextScoreResult {
            filtered_text,
            high_count,
            medium_count,
            normal_count,
            base_score,
            matched_high,
            matched_medium,
            matched_normal,
        }
    }
}

fn compile_patterns(
    keywords: &[&'static str],
    stop_words: &HashSet<&'static str>,
) -> Vec<(&'static str, Regex)> {
    keywords
        .iter()
        .filter_map(|&keyword| {
            let normalized = normalize(keyword, stop_words);
            if normalized.is_empty() {
                return None;
            }
            let pattern = format!(r"(?:^|\s){}(?:$|\s)", regex::escape(&normalized));
            Regex::new(&pattern)
                .ok()
                .map(|compiled| (keyword, compiled))
        })
        .collect()
}

fn normalize(text: &str, stop_words: &HashSet<&'static str>) -> String {
    let lowered = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| !stop_words.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn count_group_matches(
    text: &str,
    patterns: &[(&'static str, Regex)],
) -> (usize, Vec<&'static str>) {
    let padded = format!(" {text} ");
    let mut count = 0;
    let mut matched = Vec::new();

    for (keyword, pattern) in patterns {
        let matches = pattern.find_iter(&padded).count();
        if matches > 0 {
            count += matches;
            matched.push(*keyword);
        }
    }

    (count, matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pothole_report_scores_as_normal() {
        let engine = TextScoringEngine::new();
        let result = engine.score(Some("Pothole on Main St"), Some("There is a pothole here"));
        assert_eq!(result.normal_count, 2);
        assert_eq!(result.high_count, 0);
        assert!((result.base_score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn high_risk_keyword_dominates_score() {
        let engine = TextScoringEngine::new();
        let result = engine.score(Some("Fire near transformer"), None);
        assert_eq!(result.high_count, 1);
        assert!((result.base_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_capped_at_six() {
        let engine = TextScoringEngine::new();
        let result = engine.score(
            Some("accident injury emergency collapsed fire"),
            Some("dangerous deep overflow severe pothole garbage"),
        );
        assert!((result.base_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn stop_words_are_stripped_before_matching() {
        let engine = TextScoringEngine::new();
        let result = engine.score(Some("the pothole is very deep"), None);
        assert!(!result.filtered_text.contains("the"));
        assert!(!result.filtered_text.contains(" is "));
        assert_eq!(result.normal_count, 1);
        assert_eq!(result.medium_count, 1);
    }

    #[test]
    fn absent_title_and_description_score_zero() {
        let engine = TextScoringEngine::new();
        let result = engine.score(None, None);
        assert!((result.base_score - 0.0).abs() < 1e-9);
        assert!(result.filtered_text.is_empty());
    }

    #[test]
    fn multi_word_keyword_matches_as_a_phrase() {
        let engine = TextScoringEngine::new();
        let result = engine.score(Some("Car accident blocking traffic on the bridge"), None);
        assert!(result.matched_high.contains(&"accident"));
        assert!(result.matched_medium.contains(&"blocking traffic"));
    }

    #[test]
    fn partial_word_does_not_match_keyword() {
        let engine = TextScoringEngine::new();
        // "leaking" must not match the "leak" keyword as a substring.
        let result = engine.score(Some("leaking faucet"), None);
        assert_eq!(result.normal_count, 0);
    }
}
