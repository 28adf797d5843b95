//! Tokenization shared by the lexical resources and engines

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "being", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most",
    "my", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over",
    "own", "same", "she", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "would", "you", "your",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "neither", "nor", "cannot", "without",
    "isnt", "arent", "wasnt", "werent", "dont", "doesnt", "didnt", "wont", "cant",
    "shouldnt", "wouldnt", "couldnt", "hasnt", "havent", "hadnt",
];

/// Lowercased word tokens. Apostrophes are dropped so "isn't" becomes "isnt".
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|t| {
            t.chars()
                .filter(|c| *c != '\'' && *c != '\u{2019}')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

pub fn is_negation(token: &str) -> bool {
    NEGATIONS.contains(&token)
}

fn is_numeric(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_digit())
}

/// Tokens that carry topical content: no stopwords, negations or bare numbers.
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() > 1 && !is_stopword(t) && !is_negation(t) && !is_numeric(t))
        .collect()
}

/// Distinct content terms.
pub fn content_term_set(text: &str) -> HashSet<String> {
    content_terms(text).into_iter().collect()
}

/// Number of negation cues in the text.
pub fn negation_count(text: &str) -> usize {
    tokenize(text).iter().filter(|t| is_negation(t)).count()
}

/// Numeric tokens in order of appearance (decimal points kept).
pub fn numbers(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || (c == '.' && !current.is_empty()) {
            current.push(c);
        } else if !current.is_empty() {
            out.push(current.trim_end_matches('.').to_string());
            current.clear();
        }
    }
    if !current.is_empty() {
        out.push(current.trim_end_matches('.').to_string());
    }
    out
}

/// Jaccard overlap of two term sets, zero when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_folds_case_and_contractions() {
        assert_eq!(tokenize("The Drug isn't SAFE."), vec!["the", "drug", "isnt", "safe"]);
    }

    #[test]
    fn content_terms_drop_noise() {
        let terms = content_terms("The council did not approve 3 budgets");
        assert_eq!(terms, vec!["council", "approve", "budgets"]);
    }

    #[test]
    fn negations_counted() {
        assert_eq!(negation_count("It is not true and never was"), 2);
        assert_eq!(negation_count("It is true"), 0);
    }

    #[test]
    fn numbers_extracted() {
        assert_eq!(numbers("Founded in 1921, it had 3.5 million members."), vec!["1921", "3.5"]);
    }
}
