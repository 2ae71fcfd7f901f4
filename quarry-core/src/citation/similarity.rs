use std::collections::HashSet;

/// Near-duplicate detection between two normalized learning texts.
pub trait SimilarityScorer: Send + Sync + std::fmt::Debug {
    /// Similarity in `[0, 1]`; 1 means identical.
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Jaccard index over the sets of distinct characters.
///
/// Cheap but coarse: long English paragraphs share most of the alphabet and
/// score high against each other. [`TokenJaccard`] is stricter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharJaccard;

impl SimilarityScorer for CharJaccard {
    fn score(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let left: HashSet<char> = a.chars().collect();
        let right: HashSet<char> = b.chars().collect();
        jaccard(&left, &right)
    }
}

/// Jaccard index over whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl SimilarityScorer for TokenJaccard {
    fn score(&self, a: &str, b: &str) -> f64 {
        let left: HashSet<&str> = a.split_whitespace().collect();
        let right: HashSet<&str> = b.split_whitespace().collect();
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }
        jaccard(&left, &right)
    }
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
