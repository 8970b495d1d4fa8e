// src/matching/fuzzy.rs
use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid separator pattern"));

/// Lowercases, turns punctuation into spaces and sorts the tokens.
pub fn token_sort_key(text: &str) -> String {
    let lowered = text.to_lowercase();
    let spaced = NON_ALPHANUMERIC.replace_all(&lowered, " ");
    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Length of the longest common subsequence, counted in chars.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Indel similarity `2 * LCS / (len_a + len_b)` scaled to `[0, 100]`.
/// Two empty strings are identical.
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

/// Word-order-insensitive similarity in `[0, 100]`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    token_sort_ratio_keyed(&token_sort_key(a), b)
}

/// Same as [`token_sort_ratio`] with the left side already reduced by [`token_sort_key`].
pub fn token_sort_ratio_keyed(key: &str, other: &str) -> f64 {
    indel_ratio(key, &token_sort_key(other))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(token_sort_key("  Main St., 100 "), "100 main st");
        assert_eq!(token_sort_key("SPRINGFIELD,IL"), "il springfield");
        assert_eq!(token_sort_key("--"), "");
    }

    #[test]
    fn test_word_order_does_not_matter() {
        assert_eq!(token_sort_ratio("100 Main St, Albany", "Albany Main St 100"), 100.0);
    }

    #[test]
    fn test_scores_follow_indel_ratio() {
        assert_eq!(token_sort_ratio("ab", "ba"), 50.0);
        let suffix = token_sort_ratio("1 Main St", "1 Main Street");
        assert!((suffix - 81.818).abs() < 0.001, "got {}", suffix);
        assert_eq!(indel_ratio("kitten", "sitting"), 200.0 * 4.0 / 13.0);
    }

    #[test]
    fn test_scores_are_bounded_and_ordered() {
        let query = "1 MAIN ST, SPRINGFIELD, IL, 62701";
        let close = token_sort_ratio(query, "1 Main Street, Springfield, IL, 62701");
        let far = token_sort_ratio(query, "9000 Industrial Pkwy, Decatur, IL, 62526");
        assert!(close > far);
        assert!((0.0..=100.0).contains(&close));
        assert!((0.0..=100.0).contains(&far));
        assert_eq!(token_sort_ratio("", ""), 100.0);
        assert_eq!(token_sort_ratio("abc", ""), 0.0);
    }
}
