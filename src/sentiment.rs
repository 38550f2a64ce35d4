//! Heuristic sentiment classification of free-text feedback.
//!
//! Classification combines a negative-keyword scan with a continuous polarity
//! estimate. The polarity estimator is pluggable; [`LexiconPolarity`] is the
//! built-in bag-of-words estimator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{SentimentLabel, SentimentResult};

/// Substring-matched against the lower-cased text, not tokenized.
pub const NEGATIVE_KEYWORDS: [&str; 17] = [
    "not",
    "no",
    "bad",
    "poor",
    "worst",
    "terrible",
    "awful",
    "useless",
    "waste",
    "boring",
    "confusing",
    "difficult",
    "never",
    "late",
    "absent",
    "rude",
    "unprofessional",
];

/// Named classification policies. Both exist in stored data, so neither is
/// folded into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SentimentPolicy {
    /// Keyword override, then +/-0.05 polarity bands. Used for submissions.
    #[default]
    Standard,
    /// +/-0.1 polarity bands, no keyword override. Used by bulk tooling.
    Bulk,
}

impl SentimentPolicy {
    pub fn threshold(&self) -> f64 {
        match self {
            SentimentPolicy::Standard => 0.05,
            SentimentPolicy::Bulk => 0.1,
        }
    }

    pub fn uses_keyword_override(&self) -> bool {
        matches!(self, SentimentPolicy::Standard)
    }
}

/// Maps punctuation-free text to a polarity in `[-1, 1]`.
pub trait PolarityEstimator {
    fn polarity(&self, text: &str) -> f64;
}

impl<F> PolarityEstimator for F
where
    F: Fn(&str) -> f64,
{
    fn polarity(&self, text: &str) -> f64 {
        self(text)
    }
}

/// Averages lexicon scores of sentiment-bearing words. An intensifier directly
/// before a word scales it; a negator within the previous three tokens flips
/// and halves it.
#[derive(Debug, Clone)]
pub struct LexiconPolarity {
    lexicon: HashMap<&'static str, f64>,
    intensifiers: HashMap<&'static str, f64>,
    negators: Vec<&'static str>,
}

const NEGATION_WINDOW: usize = 3;

impl Default for LexiconPolarity {
    fn default() -> Self {
        let lexicon = [
            ("excellent", 1.0),
            ("outstanding", 0.8),
            ("wonderful", 1.0),
            ("perfect", 1.0),
            ("best", 1.0),
            ("awesome", 1.0),
            ("brilliant", 0.9),
            ("amazing", 0.6),
            ("great", 0.8),
            ("good", 0.7),
            ("nice", 0.6),
            ("effective", 0.6),
            ("helpful", 0.5),
            ("knowledgeable", 0.5),
            ("interesting", 0.5),
            ("better", 0.5),
            ("love", 0.5),
            ("enjoyed", 0.4),
            ("engaging", 0.4),
            ("friendly", 0.4),
            ("supportive", 0.4),
            ("informative", 0.4),
            ("easy", 0.43),
            ("patient", 0.3),
            ("useful", 0.3),
            ("clear", 0.1),
            ("clearly", 0.1),
            ("bad", -0.7),
            ("poor", -0.4),
            ("worst", -1.0),
            ("terrible", -1.0),
            ("awful", -1.0),
            ("boring", -1.0),
            ("disappointing", -0.6),
            ("difficult", -0.5),
            ("useless", -0.5),
            ("unprofessional", -0.5),
            ("unorganized", -0.5),
            ("monotonous", -0.4),
            ("confusing", -0.3),
            ("lacking", -0.3),
            ("rude", -0.3),
            ("slow", -0.3),
            ("late", -0.3),
            ("hard", -0.29),
            ("waste", -0.2),
            ("unclear", -0.1),
            ("absent", -0.1),
        ]
        .into_iter()
        .collect();

        let intensifiers = [
            ("very", 1.3),
            ("really", 1.3),
            ("extremely", 1.5),
            ("highly", 1.3),
            ("so", 1.2),
            ("quite", 1.1),
        ]
        .into_iter()
        .collect();

        LexiconPolarity {
            lexicon,
            intensifiers,
            negators: vec![
                "not", "no", "never", "dont", "doesnt", "didnt", "isnt", "wasnt", "cant",
                "cannot",
            ],
        }
    }
}

impl PolarityEstimator for LexiconPolarity {
    fn polarity(&self, text: &str) -> f64 {
        let mut scores = Vec::new();
        let mut multiplier = 1.0;
        let mut since_negation: Option<usize> = None;

        for token in text.split_whitespace().map(str::to_lowercase) {
            if self.negators.contains(&token.as_str()) {
                since_negation = Some(0);
                multiplier = 1.0;
                continue;
            }
            if let Some(boost) = self.intensifiers.get(token.as_str()) {
                multiplier = *boost;
                continue;
            }

            if let Some(value) = self.lexicon.get(token.as_str()) {
                let mut score = value * multiplier;
                if since_negation.is_some_and(|distance| distance < NEGATION_WINDOW) {
                    score *= -0.5;
                }
                scores.push(score);
                since_negation = None;
            } else if let Some(distance) = since_negation.as_mut() {
                *distance += 1;
            }
            multiplier = 1.0;
        }

        if scores.is_empty() {
            return 0.0;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        mean.clamp(-1.0, 1.0)
    }
}

/// Drops everything that is not a word character or whitespace.
pub fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

pub fn has_negative_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    NEGATIVE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

#[derive(Debug, Clone)]
pub struct SentimentClassifier<E = LexiconPolarity> {
    policy: SentimentPolicy,
    estimator: E,
}

impl SentimentClassifier<LexiconPolarity> {
    pub fn new(policy: SentimentPolicy) -> Self {
        SentimentClassifier::with_estimator(policy, LexiconPolarity::default())
    }
}

impl Default for SentimentClassifier<LexiconPolarity> {
    fn default() -> Self {
        SentimentClassifier::new(SentimentPolicy::Standard)
    }
}

impl<E: PolarityEstimator> SentimentClassifier<E> {
    pub fn with_estimator(policy: SentimentPolicy, estimator: E) -> Self {
        SentimentClassifier { policy, estimator }
    }

    pub fn policy(&self) -> SentimentPolicy {
        self.policy
    }

    /// Never fails; blank text yields label `none` with score 0.
    pub fn classify(&self, text: &str) -> SentimentResult {
        if text.trim().is_empty() {
            return SentimentResult::none();
        }

        let cleaned = strip_punctuation(&text.to_lowercase());
        let polarity = self.estimator.polarity(&cleaned).clamp(-1.0, 1.0);
        let threshold = self.policy.threshold();

        let label = if self.policy.uses_keyword_override()
            && has_negative_keyword(text)
            && polarity <= 0.0
        {
            SentimentLabel::Negative
        } else if polarity > threshold {
            SentimentLabel::Positive
        } else if polarity < -threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };

        SentimentResult {
            label,
            score: polarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed(value: f64) -> impl Fn(&str) -> f64 {
        move |_: &str| value
    }

    #[test]
    fn blank_text_is_unlabelled() {
        let classifier = SentimentClassifier::new(SentimentPolicy::Standard);
        for text in ["", "   ", "\n\t"] {
            let result = classifier.classify(text);
            assert_eq!(result.label, SentimentLabel::None);
            assert_eq!(result.score, 0.0);
        }
        let bulk = SentimentClassifier::new(SentimentPolicy::Bulk);
        assert_eq!(bulk.classify("  ").label, SentimentLabel::None);
    }

    #[test]
    fn praise_is_positive() {
        let classifier = SentimentClassifier::new(SentimentPolicy::Standard);
        let result = classifier.classify("Excellent teacher, very clear explanations");
        assert_eq!(result.label, SentimentLabel::Positive);
        assert!(result.score > 0.05);
    }

    #[test]
    fn negated_praise_with_keyword_is_negative() {
        let classifier = SentimentClassifier::new(SentimentPolicy::Standard);
        let text = "Teaching could be improved, concepts are not explained clearly enough";
        assert!(has_negative_keyword(text));
        let result = classifier.classify(text);
        assert!(result.score <= 0.0);
        assert_eq!(result.label, SentimentLabel::Negative);
    }

    #[test]
    fn keyword_override_wins_over_neutral_band() {
        let classifier = SentimentClassifier::with_estimator(SentimentPolicy::Standard, fixed(0.0));
        assert_eq!(classifier.classify("no homework this week").label, SentimentLabel::Negative);
        assert_eq!(
            classifier.classify("homework this week").label,
            SentimentLabel::Neutral
        );
    }

    #[test]
    fn keyword_override_needs_non_positive_polarity() {
        let classifier = SentimentClassifier::with_estimator(SentimentPolicy::Standard, fixed(0.3));
        assert_eq!(classifier.classify("not bad at all").label, SentimentLabel::Positive);
    }

    #[test]
    fn policies_use_different_bands() {
        let standard = SentimentClassifier::with_estimator(SentimentPolicy::Standard, fixed(0.08));
        let bulk = SentimentClassifier::with_estimator(SentimentPolicy::Bulk, fixed(0.08));
        assert_eq!(standard.classify("fine lectures").label, SentimentLabel::Positive);
        assert_eq!(bulk.classify("fine lectures").label, SentimentLabel::Neutral);

        let standard = SentimentClassifier::with_estimator(SentimentPolicy::Standard, fixed(-0.08));
        let bulk = SentimentClassifier::with_estimator(SentimentPolicy::Bulk, fixed(-0.08));
        assert_eq!(standard.classify("lectures").label, SentimentLabel::Negative);
        assert_eq!(bulk.classify("lectures").label, SentimentLabel::Neutral);
    }

    #[test]
    fn bulk_policy_ignores_keywords() {
        let bulk = SentimentClassifier::with_estimator(SentimentPolicy::Bulk, fixed(0.0));
        assert_eq!(bulk.classify("never late").label, SentimentLabel::Neutral);
    }

    #[test]
    fn score_is_raw_polarity() {
        let classifier = SentimentClassifier::with_estimator(SentimentPolicy::Standard, fixed(0.42));
        assert_eq!(classifier.classify("anything").score, 0.42);
    }

    #[test]
    fn estimator_sees_stripped_lowercase_text() {
        let classifier = SentimentClassifier::with_estimator(SentimentPolicy::Standard, |text: &str| {
            assert_eq!(text, "great really");
            0.5
        });
        classifier.classify("Great!! Really?");
    }

    #[test]
    fn lexicon_handles_intensifiers_and_negation() {
        let lexicon = LexiconPolarity::default();
        assert!((lexicon.polarity("good") - 0.7).abs() < 1e-9);
        assert!((lexicon.polarity("very good") - 0.91).abs() < 1e-9);
        assert!((lexicon.polarity("not good") + 0.35).abs() < 1e-9);
        assert!((lexicon.polarity("not at all good") + 0.35).abs() < 1e-9);
        assert!((lexicon.polarity("not that we ever thought it good") - 0.7).abs() < 1e-9);
        assert_eq!(lexicon.polarity("lectures happen on tuesday"), 0.0);
    }

    #[test]
    fn neutral_text_stays_neutral() {
        let classifier = SentimentClassifier::new(SentimentPolicy::Standard);
        let result = classifier.classify("Lectures happen on Tuesday");
        assert_eq!(result.label, SentimentLabel::Neutral);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn keyword_match_is_substring_based() {
        assert!(has_negative_keyword("Please share NOTES earlier"));
        assert!(!has_negative_keyword("Great pace"));
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(text in ".{0,80}") {
            let classifier = SentimentClassifier::new(SentimentPolicy::Standard);
            prop_assert_eq!(classifier.classify(&text), classifier.classify(&text));
        }

        #[test]
        fn score_stays_in_range(text in "[a-zA-Z ,.!]{0,120}") {
            for policy in [SentimentPolicy::Standard, SentimentPolicy::Bulk] {
                let result = SentimentClassifier::new(policy).classify(&text);
                prop_assert!((-1.0..=1.0).contains(&result.score));
                if text.trim().is_empty() {
                    prop_assert_eq!(result.label, SentimentLabel::None);
                } else {
                    prop_assert!(result.label != SentimentLabel::None);
                }
            }
        }
    }
}
