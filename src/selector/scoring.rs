//! Candidate confidence scoring
//!
//! Confidence is the product of the strategy's static weight, a specificity
//! bonus (1/match-count), a validation gate, a visibility bonus, and (for
//! text-anchored strategies) the normalized text similarity. Rounded to
//! three decimals; ties between strategies break by fallback order.

/// Similarity floor below which a text-anchored candidate is disqualified.
pub const SIMILARITY_FLOOR: f64 = 0.5;
/// Score multiplier for a present-but-hidden candidate.
pub const HIDDEN_PENALTY: f64 = 0.7;

/// Raw signals observed for one candidate element.
#[derive(Debug, Clone, Copy)]
pub struct CandidateSignals {
    /// Static strategy weight in `[0, 1]`.
    pub weight: f64,
    /// Total elements the strategy matched.
    pub match_count: usize,
    pub visible: bool,
    /// `None` when the descriptor carries no validation rules.
    pub validation_passed: Option<bool>,
    /// `None` for strategies without a text component.
    pub text_similarity: Option<f64>,
}

/// Compute the confidence for one candidate. Returns zero for any
/// disqualified candidate (failed validation, similarity under the floor).
#[must_use]
pub fn score(signals: CandidateSignals) -> f64 {
    if signals.validation_passed == Some(false) {
        return 0.0;
    }
    if signals
        .text_similarity
        .is_some_and(|s| s < SIMILARITY_FLOOR)
    {
        return 0.0;
    }
    let specificity = if signals.match_count <= 1 {
        1.0
    } else {
        1.0 / signals.match_count as f64
    };
    let visibility = if signals.visible { 1.0 } else { HIDDEN_PENALTY };
    let text = signals.text_similarity.unwrap_or(1.0);
    round3((signals.weight * specificity * visibility * text).clamp(0.0, 1.0))
}

/// Round to three decimal places, as recorded in results and telemetry.
#[must_use]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CandidateSignals {
        CandidateSignals {
            weight: 1.0,
            match_count: 1,
            visible: true,
            validation_passed: None,
            text_similarity: None,
        }
    }

    #[test]
    fn unique_visible_match_scores_full_weight() {
        assert_eq!(score(base()), 1.0);
        assert_eq!(
            score(CandidateSignals {
                weight: 0.8,
                ..base()
            }),
            0.8
        );
    }

    #[test]
    fn multiple_matches_divide_specificity() {
        assert_eq!(
            score(CandidateSignals {
                match_count: 4,
                ..base()
            }),
            0.25
        );
    }

    #[test]
    fn hidden_candidates_are_penalized() {
        assert_eq!(
            score(CandidateSignals {
                visible: false,
                ..base()
            }),
            HIDDEN_PENALTY
        );
    }

    #[test]
    fn failed_validation_short_circuits_to_zero() {
        assert_eq!(
            score(CandidateSignals {
                validation_passed: Some(false),
                ..base()
            }),
            0.0
        );
    }

    #[test]
    fn similarity_below_floor_disqualifies() {
        assert_eq!(
            score(CandidateSignals {
                text_similarity: Some(0.4),
                ..base()
            }),
            0.0
        );
        assert_eq!(
            score(CandidateSignals {
                text_similarity: Some(0.9),
                ..base()
            }),
            0.9
        );
    }

    #[test]
    fn rounding_is_three_decimals() {
        assert_eq!(
            score(CandidateSignals {
                match_count: 3,
                ..base()
            }),
            0.333
        );
    }
}
