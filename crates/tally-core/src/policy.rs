//! Confidence and review policy
//!
//! Maps the tier that produced a category to a confidence score and a
//! review flag.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{CategorizationMethod, Category};

/// Default threshold below which a categorization is flagged for review
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.75;

/// Confidence reported for user-confirmed (learned) results
pub const LEARNED_CONFIDENCE: f64 = 1.0;

/// Result of applying the policy to one categorization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub category: Category,
    pub method: Option<CategorizationMethod>,
    pub confidence: f64,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewPolicy {
    review_threshold: f64,
}

impl ReviewPolicy {
    pub fn new(review_threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&review_threshold) {
            return Err(Error::Config(format!(
                "review_threshold must be within [0, 1], got {}",
                review_threshold
            )));
        }
        Ok(Self { review_threshold })
    }

    pub fn review_threshold(&self) -> f64 {
        self.review_threshold
    }

    /// Apply the policy to a tier outcome
    ///
    /// `outcome` is `None` when no tier produced a category.
    pub fn apply(&self, outcome: Option<(Category, CategorizationMethod, f64)>) -> Verdict {
        match outcome {
            Some((category, CategorizationMethod::LearnedPattern, _)) => Verdict {
                category,
                method: Some(CategorizationMethod::LearnedPattern),
                confidence: LEARNED_CONFIDENCE,
                needs_review: false,
            },
            Some((category, method, raw)) => {
                let confidence = clamp_confidence(raw);
                Verdict {
                    category,
                    method: Some(method),
                    confidence,
                    needs_review: confidence < self.review_threshold,
                }
            }
            None => Verdict {
                category: Category::Other,
                method: None,
                confidence: 0.0,
                needs_review: true,
            },
        }
    }
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
        }
    }
}

/// Clamp a score to [0, 1]; NaN becomes 0
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learned_never_flagged() {
        let policy = ReviewPolicy::new(1.0).unwrap();
        let v = policy.apply(Some((
            Category::Travel,
            CategorizationMethod::LearnedPattern,
            0.2,
        )));
        assert_eq!(v.confidence, 1.0);
        assert!(!v.needs_review);
        assert_eq!(v.method, Some(CategorizationMethod::LearnedPattern));
    }

    #[test]
    fn test_rule_threshold() {
        let policy = ReviewPolicy::default();
        let high = policy.apply(Some((Category::Payroll, CategorizationMethod::RuleBased, 0.9)));
        assert!(!high.needs_review);

        let at = policy.apply(Some((Category::Rent, CategorizationMethod::RuleBased, 0.75)));
        assert!(!at.needs_review);

        let low = policy.apply(Some((Category::Rent, CategorizationMethod::RuleBased, 0.6)));
        assert!(low.needs_review);
    }

    #[test]
    fn test_ai_scores_clamped() {
        let policy = ReviewPolicy::default();
        let over = policy.apply(Some((Category::Travel, CategorizationMethod::AiFallback, 7.0)));
        assert_eq!(over.confidence, 1.0);
        assert!(!over.needs_review);

        let nan = policy.apply(Some((
            Category::Travel,
            CategorizationMethod::AiFallback,
            f64::NAN,
        )));
        assert_eq!(nan.confidence, 0.0);
        assert!(nan.needs_review);

        let negative = policy.apply(Some((Category::Travel, CategorizationMethod::AiFallback, -1.0)));
        assert_eq!(negative.confidence, 0.0);
    }

    #[test]
    fn test_default_path() {
        let v = ReviewPolicy::default().apply(None);
        assert_eq!(v.category, Category::Other);
        assert_eq!(v.method, None);
        assert_eq!(v.confidence, 0.0);
        assert!(v.needs_review);
    }

    #[test]
    fn test_threshold_validated() {
        assert!(ReviewPolicy::new(1.01).is_err());
        assert!(ReviewPolicy::new(-0.1).is_err());
        assert!(ReviewPolicy::new(f64::NAN).is_err());
        assert!(ReviewPolicy::new(0.0).is_ok());
    }
}
