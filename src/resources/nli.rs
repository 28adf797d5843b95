//! Natural-language inference classifiers
//!
//! The contradiction engine asks an `NliClassifier` for entailment, neutral
//! and contradiction probabilities of a passage pair. The lexical classifier
//! here is a fixed, deterministic model: no training, only inference.

use crate::corpus::text;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NliLabel {
    Entailment,
    Neutral,
    Contradiction,
}

/// Probability distribution over the three NLI labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NliPrediction {
    pub entailment: f64,
    pub neutral: f64,
    pub contradiction: f64,
}

impl NliPrediction {
    /// Softmax over raw logits.
    pub fn from_logits(entailment: f64, neutral: f64, contradiction: f64) -> Self {
        let max = entailment.max(neutral).max(contradiction);
        let e = (entailment - max).exp();
        let n = (neutral - max).exp();
        let c = (contradiction - max).exp();
        let sum = e + n + c;
        Self {
            entailment: e / sum,
            neutral: n / sum,
            contradiction: c / sum,
        }
    }

    /// Most probable label; ties favor neutral.
    pub fn label(&self) -> NliLabel {
        if self.contradiction > self.neutral && self.contradiction >= self.entailment {
            NliLabel::Contradiction
        } else if self.entailment > self.neutral && self.entailment > self.contradiction {
            NliLabel::Entailment
        } else {
            NliLabel::Neutral
        }
    }
}

/// Classifier producing NLI probabilities for a premise/hypothesis pair.
pub trait NliClassifier: Send + Sync {
    fn classify(&self, premise: &str, hypothesis: &str) -> NliPrediction;
}

const ANTONYMS: &[(&str, &str)] = &[
    ("increase", "decrease"),
    ("increased", "decreased"),
    ("increases", "decreases"),
    ("rise", "fall"),
    ("rose", "fell"),
    ("true", "false"),
    ("safe", "unsafe"),
    ("safe", "dangerous"),
    ("always", "never"),
    ("before", "after"),
    ("earlier", "later"),
    ("more", "less"),
    ("higher", "lower"),
    ("support", "oppose"),
    ("supported", "opposed"),
    ("supports", "opposes"),
    ("accept", "reject"),
    ("accepted", "rejected"),
    ("allow", "forbid"),
    ("allowed", "forbidden"),
    ("permitted", "prohibited"),
    ("win", "lose"),
    ("won", "lost"),
    ("alive", "dead"),
    ("present", "absent"),
    ("legal", "illegal"),
    ("effective", "ineffective"),
    ("possible", "impossible"),
    ("agree", "disagree"),
    ("confirmed", "denied"),
    ("first", "last"),
    ("male", "female"),
];

/// Lexical NLI: content overlap decides whether the passages talk about the
/// same thing; negation polarity, antonym pairs and numeric mismatch decide
/// whether they disagree about it.
#[derive(Debug, Clone)]
pub struct LexicalNliClassifier {
    /// Logit scale applied to overlap-weighted signals
    pub sharpness: f64,
}

impl Default for LexicalNliClassifier {
    fn default() -> Self {
        Self { sharpness: 4.0 }
    }
}

impl LexicalNliClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn antonym_clash(a: &HashSet<String>, b: &HashSet<String>) -> bool {
        ANTONYMS.iter().any(|(x, y)| {
            (a.contains(*x) && b.contains(*y) && !a.contains(*y) && !b.contains(*x))
                || (a.contains(*y) && b.contains(*x) && !a.contains(*x) && !b.contains(*y))
        })
    }

    fn numeric_clash(premise: &str, hypothesis: &str) -> bool {
        let a: HashSet<String> = text::numbers(premise).into_iter().collect();
        let b: HashSet<String> = text::numbers(hypothesis).into_iter().collect();
        !a.is_empty() && !b.is_empty() && a.is_disjoint(&b)
    }
}

impl NliClassifier for LexicalNliClassifier {
    fn classify(&self, premise: &str, hypothesis: &str) -> NliPrediction {
        let tokens_a: HashSet<String> = text::tokenize(premise).into_iter().collect();
        let tokens_b: HashSet<String> = text::tokenize(hypothesis).into_iter().collect();
        let terms_a = text::content_term_set(premise);
        let terms_b = text::content_term_set(hypothesis);

        // Antonym members are part of the claim, not of its subject.
        let subject_a: HashSet<String> = terms_a
            .iter()
            .filter(|t| !ANTONYMS.iter().any(|(x, y)| t == x || t == y))
            .cloned()
            .collect();
        let subject_b: HashSet<String> = terms_b
            .iter()
            .filter(|t| !ANTONYMS.iter().any(|(x, y)| t == x || t == y))
            .cloned()
            .collect();
        let overlap = if subject_a.is_empty() && subject_b.is_empty() {
            text::jaccard(&terms_a, &terms_b)
        } else {
            text::jaccard(&subject_a, &subject_b)
        };

        let polarity_flip =
            text::negation_count(premise) % 2 != text::negation_count(hypothesis) % 2;
        let antonym = Self::antonym_clash(&tokens_a, &tokens_b);
        let numeric = Self::numeric_clash(premise, hypothesis);

        let signal = if polarity_flip {
            1.0
        } else if antonym {
            0.9
        } else if numeric {
            0.8
        } else {
            0.0
        };

        let k = self.sharpness;
        NliPrediction::from_logits(
            k * overlap * (1.0 - signal),
            k * (1.0 - overlap) * 0.5 + 1.0,
            k * overlap * signal,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negated_claim_is_contradiction() {
        let nli = LexicalNliClassifier::new();
        let p = nli.classify(
            "The vaccine is safe for children.",
            "The vaccine is not safe for children.",
        );
        assert_eq!(p.label(), NliLabel::Contradiction);
        assert!(p.contradiction > 0.9);
    }

    #[test]
    fn paraphrase_is_not_contradiction() {
        let nli = LexicalNliClassifier::new();
        let p = nli.classify(
            "The vaccine is safe for children.",
            "The vaccine is safe for young children.",
        );
        assert_ne!(p.label(), NliLabel::Contradiction);
        assert!(p.contradiction < 0.1);
    }

    #[test]
    fn antonyms_signal_conflict() {
        let nli = LexicalNliClassifier::new();
        let p = nli.classify(
            "Membership increased sharply after the council.",
            "Membership decreased sharply after the council.",
        );
        assert_eq!(p.label(), NliLabel::Contradiction);
    }

    #[test]
    fn differing_numbers_signal_conflict() {
        let nli = LexicalNliClassifier::new();
        let p = nli.classify(
            "The abbey was founded in 1132 by monks.",
            "The abbey was founded in 1150 by monks.",
        );
        assert_eq!(p.label(), NliLabel::Contradiction);
    }

    #[test]
    fn unrelated_text_is_neutral() {
        let nli = LexicalNliClassifier::new();
        let p = nli.classify("Rivers carve canyons.", "The recipe needs no butter.");
        assert_eq!(p.label(), NliLabel::Neutral);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let p = NliPrediction::from_logits(1.0, 2.0, 3.0);
        assert!((p.entailment + p.neutral + p.contradiction - 1.0).abs() < 1e-9);
    }
}
