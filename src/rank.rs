//! Match-ratio scoring for query hits. Lower is better.

/// Score returned when the filter's first token does not occur in the name
pub const NO_MATCH: f64 = i64::MAX as f64;

/// First token of a filter: split on `_`, `-`, `.` and space, lowercased.
/// May be empty when the filter starts with a separator.
fn first_token(filter: &str) -> String {
    filter
        .split(['_', '-', '.', ' '])
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// `index_of(first_token, name) - len(filter) / len(name)`
///
/// Positions and lengths are counted in characters. A name whose lowercased
/// form does not contain the first token scores [`NO_MATCH`].
pub fn match_ratio(name: &str, filter: &str) -> f64 {
    let lowered = name.to_lowercase();
    let token = first_token(filter);
    let Some(byte_idx) = lowered.find(&token) else {
        return NO_MATCH;
    };
    let index = lowered[..byte_idx].chars().count() as f64;
    let name_len = name.chars().count();
    if name_len == 0 {
        return index;
    }
    index - filter.chars().count() as f64 / name_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_match_scores_lowest() {
        let tip = match_ratio("setTip.py", "set tip");
        let tool = match_ratio("setToolTip.py", "set tip");
        let call = match_ratio("setCallTip.py", "set tip");
        assert!(tip < tool);
        assert_eq!(tool, call);
        assert!((tip - (0.0 - 7.0 / 9.0)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_token_sinks() {
        assert_eq!(match_ratio("word.py", "set tip"), NO_MATCH);
    }

    #[test]
    fn test_later_occurrence_ranks_after_prefix() {
        assert!(match_ratio("setup.py", "set") < match_ratio("reset.py", "set"));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(match_ratio("README.md", "read"), 0.0 - 4.0 / 9.0);
    }

    #[test]
    fn test_leading_separator_gives_empty_token() {
        // Empty first token is found at index 0
        assert_eq!(match_ratio("abcd", ".x"), 0.0 - 2.0 / 4.0);
    }
}
