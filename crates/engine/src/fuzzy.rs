//! Similar-key suggestions for unknown-key errors.
//!
//! Scores candidate keys against a mistyped key with a bigram Dice
//! coefficient. Deterministic: ties are broken by candidate name.

/// Similarity in [0, 1] between two strings.
fn ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let mut a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        // too short for bigrams, compare directly
        return if a.chars().next() == b.chars().next() {
            0.5
        } else {
            0.0
        };
    }
    let total = a_grams.len() + b_grams.len();
    let mut matches = 0;
    for gram in &b_grams {
        if let Some(pos) = a_grams.iter().position(|g| g == gram) {
            a_grams.swap_remove(pos);
            matches += 1;
        }
    }
    2.0 * matches as f64 / total as f64
}

/// Up to `n` candidates scoring at least `cutoff` against `key`, best
/// first.
pub fn similar_keys(key: &str, candidates: &[String], n: usize, cutoff: f64) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| (ratio(key, c), c))
        .filter(|(score, _)| *score >= cutoff)
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored.into_iter().take(n).map(|(_, c)| c.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        ["title", "xlabel", "ylabel", "grid", "color"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_close_match_found() {
        let similar = similar_keys("titel", &candidates(), 3, 0.4);
        assert_eq!(similar.first().map(|s| s.as_str()), Some("title"));
    }

    #[test]
    fn test_no_match_for_garbage() {
        let similar = similar_keys("qqqq", &candidates(), 3, 0.4);
        assert!(similar.is_empty());
    }

    #[test]
    fn test_exact_match_scores_highest() {
        let similar = similar_keys("grid", &candidates(), 3, 0.4);
        assert_eq!(similar.first().map(|s| s.as_str()), Some("grid"));
    }

    #[test]
    fn test_deterministic_order() {
        let a = similar_keys("label", &candidates(), 5, 0.3);
        let b = similar_keys("label", &candidates(), 5, 0.3);
        assert_eq!(a, b);
        // xlabel and ylabel tie, broken by name
        assert_eq!(a, vec!["xlabel".to_string(), "ylabel".to_string()]);
    }
}
