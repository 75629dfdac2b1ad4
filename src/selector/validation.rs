//! Descriptor validation rules applied to candidate text

use crate::selector_store::schema::{ValidationRules, ValueType};

/// Apply the descriptor's validation rules to a candidate's text.
///
/// Length rules count characters on the trimmed text; numeric rules parse
/// the trimmed text as `f64`.
#[must_use]
pub fn validate_text(text: &str, rules: &ValidationRules) -> bool {
    let trimmed = text.trim();

    if rules.required && trimmed.is_empty() {
        return false;
    }
    if trimmed.is_empty() && !rules.required {
        // Nothing further to check against an absent value.
        return true;
    }

    if let Some(value_type) = rules.value_type {
        let type_ok = match value_type {
            ValueType::Text => true,
            ValueType::Number => trimmed.parse::<f64>().is_ok(),
            ValueType::Url => url::Url::parse(trimmed).is_ok(),
        };
        if !type_ok {
            return false;
        }
    }

    if let Some(pattern) = &rules.pattern {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(trimmed) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    let len = trimmed.chars().count();
    if rules.min_length.is_some_and(|min| len < min) {
        return false;
    }
    if rules.max_length.is_some_and(|max| len > max) {
        return false;
    }

    if rules.min_value.is_some() || rules.max_value.is_some() {
        let Ok(value) = trimmed.parse::<f64>() else {
            return false;
        };
        if rules.min_value.is_some_and(|min| value < min) {
            return false;
        }
        if rules.max_value.is_some_and(|max| value > max) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_blank_text() {
        let rules = ValidationRules {
            required: true,
            ..ValidationRules::default()
        };
        assert!(!validate_text("   ", &rules));
        assert!(validate_text("Arsenal", &rules));
    }

    #[test]
    fn numeric_bounds_apply() {
        let rules = ValidationRules {
            required: true,
            value_type: Some(ValueType::Number),
            min_value: Some(0.0),
            max_value: Some(10.0),
            ..ValidationRules::default()
        };
        assert!(validate_text("3", &rules));
        assert!(!validate_text("11", &rules));
        assert!(!validate_text("abc", &rules));
    }

    #[test]
    fn pattern_and_length_apply_to_trimmed_text() {
        let rules = ValidationRules {
            pattern: Some(r"^[A-Z][a-z]+$".to_string()),
            min_length: Some(3),
            max_length: Some(12),
            ..ValidationRules::default()
        };
        assert!(validate_text("  Arsenal  ", &rules));
        assert!(!validate_text("AB", &rules));
        assert!(!validate_text("lowercase", &rules));
    }
}
