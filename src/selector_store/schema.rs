//! Resolved selector descriptor schema
//!
//! These are the immutable types handed out by the configuration store after
//! inheritance resolution and template expansion. Raw on-disk forms live in
//! the parser; everything here is fully validated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Segments that may not appear in semantic names.
pub const RESERVED_SEGMENTS: &[&str] = &["_context", "_global"];

/// Default confidence threshold when a descriptor does not set one.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
/// Default resolution timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default retry count for the full strategy loop.
pub const DEFAULT_RETRY_COUNT: u32 = 2;

/// How long to wait after navigation before the page is considered ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    #[default]
    Load,
    DomContent,
    NetworkIdle,
}

/// One way of locating an element, tagged by kind.
///
/// Adding a strategy kind means adding a variant here, a validator arm in
/// [`StrategySpec::validate`], and one kernel function per driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    /// CSS selector match.
    Css { selector: String },
    /// XPath expression match.
    Xpath { expression: String },
    /// Match by visible text, optionally narrowed to a tag name.
    TextAnchor {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// Element carrying a specific attribute name/value pair.
    AttributeMatch {
        name: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// ARIA role, optionally with an accessible name to match.
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl StrategySpec {
    /// Stable kind tag, as recorded in attempt telemetry.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Css { .. } => "css",
            Self::Xpath { .. } => "xpath",
            Self::TextAnchor { .. } => "text_anchor",
            Self::AttributeMatch { .. } => "attribute_match",
            Self::Role { .. } => "role",
        }
    }

    /// Check the params are valid for the kind.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Css { selector } => {
                if selector.trim().is_empty() {
                    return Err("css strategy requires a non-empty selector".into());
                }
                scraper::Selector::parse(selector)
                    .map_err(|e| format!("invalid css selector {selector:?}: {e}"))?;
                Ok(())
            }
            Self::Xpath { expression } => {
                if expression.trim().is_empty() {
                    return Err("xpath strategy requires a non-empty expression".into());
                }
                Ok(())
            }
            Self::TextAnchor { text, .. } => {
                if text.trim().is_empty() {
                    return Err("text_anchor strategy requires non-empty text".into());
                }
                Ok(())
            }
            Self::AttributeMatch { name, .. } => {
                if name.trim().is_empty() {
                    return Err("attribute_match strategy requires an attribute name".into());
                }
                Ok(())
            }
            Self::Role { role, .. } => {
                if role.trim().is_empty() {
                    return Err("role strategy requires a role".into());
                }
                Ok(())
            }
        }
    }
}

/// A strategy with its position in the fallback chain and static weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(flatten)]
    pub spec: StrategySpec,
    /// Position in the fallback order; lower tries first.
    pub priority: u32,
    /// Static credibility score in `[0, 1]`, multiplied into confidence.
    pub weight: f64,
}

/// Expected value shape for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Number,
    Url,
}

/// Validation rules applied to a matched candidate's text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl ValidationRules {
    /// True when no rule is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fully resolved, immutable definition of a semantic selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorDescriptor {
    /// Fully qualified dotted semantic name (`match.header.home_team`).
    pub semantic_name: String,
    pub description: String,
    /// Dotted context scope the descriptor belongs to.
    pub context: String,
    /// Strategies in fallback order (sorted by priority at load).
    pub strategies: Vec<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
    pub confidence_threshold: f64,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
}

/// Per-scope defaults applied to descriptors via dotted-path inheritance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_strategy: Option<WaitStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

/// Check a single semantic-name segment: lowercase ASCII `[a-z0-9_]+`, not
/// reserved. `.` never appears inside a segment; it is the structural
/// separator between scope levels.
#[must_use]
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !RESERVED_SEGMENTS.contains(&segment)
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Check a full dotted semantic name or scope path.
#[must_use]
pub fn is_valid_dotted_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_valid_segment)
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_validation_rejects_reserved_and_uppercase() {
        assert!(is_valid_segment("home_team"));
        assert!(is_valid_segment("h1"));
        assert!(!is_valid_segment("_context"));
        assert!(!is_valid_segment("Home"));
        assert!(!is_valid_segment(""));
        assert!(is_valid_dotted_name("match.header.home_team"));
        assert!(!is_valid_dotted_name("match..header"));
    }

    #[test]
    fn css_params_are_checked() {
        let bad = StrategySpec::Css {
            selector: "div[".into(),
        };
        assert!(bad.validate().is_err());
        let good = StrategySpec::Css {
            selector: "input[name=\"q\"]".into(),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn strategy_spec_round_trips_through_json() {
        let s = Strategy {
            spec: StrategySpec::TextAnchor {
                text: "Heading".into(),
                tag: Some("h1".into()),
            },
            priority: 2,
            weight: 0.8,
        };
        let json = serde_json::to_string(&s).expect("serialize");
        assert!(json.contains("\"kind\":\"text_anchor\""));
        let back: Strategy = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, s);
    }
}
