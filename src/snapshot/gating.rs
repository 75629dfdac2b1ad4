//! Page-type gating for snapshot readiness waits
//!
//! Some page types render their interesting content late; a small table
//! maps `page_name` patterns to a readiness selector. Only captures whose
//! page name matches a rule run the readiness wait, which keeps pages
//! where the signal cannot apply free of spurious timeout warnings.

use serde::{Deserialize, Serialize};

/// One gating rule. The pattern matches as a literal substring unless it
/// carries a `regex:` prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingRule {
    pub pattern: String,
    /// Semantic selector that signals the page is ready.
    pub readiness_semantic_name: String,
    pub timeout_ms: u64,
}

/// Lookup table consulted per capture.
#[derive(Debug, Clone, Default)]
pub struct GatingTable {
    rules: Vec<GatingRule>,
}

impl GatingTable {
    #[must_use]
    pub fn new(rules: Vec<GatingRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: GatingRule) {
        self.rules.push(rule);
    }

    /// First rule matching the page name, if any.
    #[must_use]
    pub fn matching(&self, page_name: &str) -> Option<&GatingRule> {
        self.rules.iter().find(|rule| {
            match rule.pattern.strip_prefix("regex:") {
                Some(pattern) => regex::Regex::new(pattern)
                    .map(|re| re.is_match(page_name))
                    .unwrap_or(false),
                None => page_name.contains(&rule.pattern),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> GatingTable {
        GatingTable::new(vec![
            GatingRule {
                pattern: "match_detail".into(),
                readiness_semantic_name: "match.header.home_team".into(),
                timeout_ms: 1500,
            },
            GatingRule {
                pattern: "regex:^live_.*_feed$".into(),
                readiness_semantic_name: "feed.first_row".into(),
                timeout_ms: 2000,
            },
        ])
    }

    #[test]
    fn substring_patterns_match_anywhere() {
        let table = table();
        assert!(table.matching("pre_match_detail_v2").is_some());
        assert!(table.matching("search_results").is_none());
    }

    #[test]
    fn regex_patterns_are_anchored_as_written() {
        let table = table();
        assert_eq!(
            table.matching("live_scores_feed").map(|r| r.timeout_ms),
            Some(2000)
        );
        assert!(table.matching("live_scores_feed_x").is_none());
    }
}
