//! Shared strategy-kernel helpers
//!
//! One kernel function per strategy kind, shared between the live and stub
//! drivers: CSS building for attribute/role strategies, a constrained XPath
//! → CSS translation for the offline driver, and the text-similarity
//! predicate used by `text_anchor` and named `role` strategies.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum normalized similarity for a text-anchor candidate to qualify.
pub const TEXT_MATCH_FLOOR: f64 = 0.5;

/// Normalized Levenshtein similarity on trimmed text.
#[must_use]
pub fn text_similarity(candidate: &str, wanted: &str) -> f64 {
    strsim::normalized_levenshtein(candidate.trim(), wanted.trim())
}

/// Whether candidate text qualifies for a text-anchored strategy:
/// containment counts as a full match, otherwise similarity must clear
/// [`TEXT_MATCH_FLOOR`].
#[must_use]
pub fn text_qualifies(candidate: &str, wanted: &str) -> bool {
    let candidate = candidate.trim();
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return false;
    }
    candidate.contains(wanted) || text_similarity(candidate, wanted) >= TEXT_MATCH_FLOOR
}

/// Escape a value for embedding inside a double-quoted CSS attribute selector.
#[must_use]
pub fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// CSS selector for an attribute-match strategy.
#[must_use]
pub fn attribute_css(tag: Option<&str>, name: &str, value: &str) -> String {
    format!(
        "{}[{}=\"{}\"]",
        tag.unwrap_or(""),
        name,
        css_escape(value)
    )
}

/// CSS selector matching both explicit `role=` attributes and the elements
/// that carry the role implicitly.
#[must_use]
pub fn role_css(role: &str) -> String {
    let implicit: &str = match role {
        "button" => "button, input[type=\"button\"], input[type=\"submit\"]",
        "link" => "a[href]",
        "heading" => "h1, h2, h3, h4, h5, h6",
        "textbox" => "input[type=\"text\"], input:not([type]), textarea",
        "checkbox" => "input[type=\"checkbox\"]",
        "radio" => "input[type=\"radio\"]",
        "combobox" => "select",
        "img" => "img",
        "list" => "ul, ol",
        "listitem" => "li",
        "table" => "table",
        "navigation" => "nav",
        "main" => "main",
        _ => "",
    };
    if implicit.is_empty() {
        format!("[role=\"{}\"]", css_escape(role))
    } else {
        format!("[role=\"{}\"], {}", css_escape(role), implicit)
    }
}

static XPATH_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^//([a-zA-Z][a-zA-Z0-9]*|\*)$").expect("static regex"));
static XPATH_TAG_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^//([a-zA-Z][a-zA-Z0-9]*|\*)\[@([a-zA-Z][a-zA-Z0-9_-]*)=(?:'([^']*)'|"([^"]*)")\]$"#)
        .expect("static regex")
});

/// Translate the supported XPath subset to CSS for backends without a
/// native XPath engine. Covers `//tag`, `//*`, and `//tag[@attr='value']`;
/// anything else is rejected so the caller can record a no-match rather
/// than silently mis-matching.
#[must_use]
pub fn xpath_to_css(expression: &str) -> Option<String> {
    let expression = expression.trim();
    if let Some(caps) = XPATH_TAG.captures(expression) {
        let tag = &caps[1];
        return Some(if tag == "*" { "*".into() } else { tag.to_string() });
    }
    if let Some(caps) = XPATH_TAG_ATTR.captures(expression) {
        let tag = &caps[1];
        let attr = &caps[2];
        let value = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
        let tag = if tag == "*" { "" } else { tag };
        return Some(format!("{}[{}=\"{}\"]", tag, attr, css_escape(value)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_subset_translates() {
        assert_eq!(xpath_to_css("//h1"), Some("h1".to_string()));
        assert_eq!(xpath_to_css("//*"), Some("*".to_string()));
        assert_eq!(
            xpath_to_css("//h1[@id='firstHeading']"),
            Some("h1[id=\"firstHeading\"]".to_string())
        );
        assert_eq!(
            xpath_to_css("//div[@class=\"team\"]"),
            Some("div[class=\"team\"]".to_string())
        );
        assert_eq!(xpath_to_css("//a/b"), None);
        assert_eq!(xpath_to_css("//h1[contains(text(),'x')]"), None);
    }

    #[test]
    fn text_qualification_uses_containment_then_similarity() {
        assert!(text_qualifies("  Alpha  ", "Alpha"));
        assert!(text_qualifies("Alpha Centauri", "Alpha"));
        assert!(text_qualifies("Alphq", "Alpha"));
        assert!(!text_qualifies("completely different", "Alpha"));
    }

    #[test]
    fn role_css_includes_implicit_elements() {
        let css = role_css("button");
        assert!(css.contains("[role=\"button\"]"));
        assert!(css.contains("input[type=\"submit\"]"));
        assert_eq!(role_css("tab"), "[role=\"tab\"]");
    }
}
