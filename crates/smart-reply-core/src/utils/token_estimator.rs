//! Token estimation for mixed Indonesian/English chat text.

/// Estimate tokens from text using word-based heuristic
/// Rule: Indonesian/English avg ~1.3 tokens per word
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();

    // small overhead for role/formatting tokens
    ((words as f64 * 1.3) + 5.0).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        // 7 words: 7 * 1.3 + 5 = 14.1 -> 15
        let text = "Kak ada stok ukuran M warna hitam";
        assert_eq!(estimate_tokens(text), 15);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_whitespace_runs_count_once() {
        assert_eq!(estimate_tokens("ada\n\n  stok"), estimate_tokens("ada stok"));
    }
}
