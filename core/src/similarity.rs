use std::collections::HashSet;

/// Score at or above which an output counts as matching a reference.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.90;

/// Which similarity metric decides whether an output matches its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    /// Token order matters (e.g. scheduling order).
    Ordered,
    /// Token order is ignored, duplicates collapse.
    Set,
}

impl Metric {
    pub fn for_order_sensitive(order_sensitive: bool) -> Self {
        if order_sensitive {
            Metric::Ordered
        } else {
            Metric::Set
        }
    }

    pub fn score(self, actual: &str, expected: &str) -> f64 {
        match self {
            Metric::Ordered => ordered_score(actual, expected),
            Metric::Set => set_score(actual, expected),
        }
    }
}

/// Sequence alignment ratio over whitespace tokens: `2 * M / (len(a) + len(b))`,
/// where `M` is the length of the longest common subsequence.
/// Every token is significant.
/// ```
/// use grader_core::similarity::ordered_score;
///
/// assert_eq!(ordered_score("a b c", "a b c"), 1.0);
/// assert_eq!(ordered_score("", ""), 1.0);
/// assert_eq!(ordered_score("a b", "c d"), 0.0);
/// ```
pub fn ordered_score(actual: &str, expected: &str) -> f64 {
    let a: Vec<&str> = actual.split_whitespace().collect();
    let b: Vec<&str> = expected.split_whitespace().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = lcs_len(&a, &b);
    (2 * matches) as f64 / total as f64
}

/// Jaccard index over the sets of whitespace tokens.
/// Two empty texts are considered identical.
/// ```
/// use grader_core::similarity::set_score;
///
/// assert_eq!(set_score("c b a", "a b c"), 1.0);
/// assert_eq!(set_score("", ""), 1.0);
/// assert_eq!(set_score("a", ""), 0.0);
/// assert_eq!(set_score("a b", "b c"), 1.0 / 3.0);
/// ```
pub fn set_score(actual: &str, expected: &str) -> f64 {
    let a: HashSet<&str> = actual.split_whitespace().collect();
    let b: HashSet<&str> = expected.split_whitespace().collect();

    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    intersection as f64 / union as f64
}

fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    // Keep the shorter sequence as the row to bound memory.
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    let mut prev = vec![0usize; short.len() + 1];
    let mut cur = vec![0usize; short.len() + 1];
    for x in long {
        for (j, y) in short.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[short.len()]
}

#[cfg(test)]
mod test {
    use super::*;

    const TEXTS: [&str; 6] = [
        "",
        "a b c",
        "c b a",
        "hello world\nhello again",
        "1 2 3 4 5 6 7 8 9 10",
        "  leading and trailing   whitespace\t\n",
    ];

    #[test]
    fn scores_are_symmetric_and_bounded() {
        for a in TEXTS {
            for b in TEXTS {
                for metric in [Metric::Ordered, Metric::Set] {
                    let ab = metric.score(a, b);
                    let ba = metric.score(b, a);
                    assert_eq!(ab, ba, "{} not symmetric for {:?} / {:?}", metric, a, b);
                    assert!((0.0..=1.0).contains(&ab));
                }
            }
        }
    }

    #[test]
    fn identical_text_scores_one() {
        for t in TEXTS {
            assert_eq!(ordered_score(t, t), 1.0);
            assert_eq!(set_score(t, t), 1.0);
        }
    }

    #[test]
    fn whitespace_layout_is_irrelevant() {
        assert_eq!(ordered_score("a\nb\n\nc", "a b c"), 1.0);
        assert_eq!(set_score("a\tb   c\n", "a b c"), 1.0);
    }

    #[test]
    fn reversed_tokens_fail_ordered_but_pass_set() {
        assert_eq!(set_score("c b a", "a b c"), 1.0);
        // LCS of (c b a) and (a b c) is 1 token.
        assert_eq!(ordered_score("c b a", "a b c"), 2.0 / 6.0);
        assert!(ordered_score("c b a", "a b c") < DEFAULT_PASS_THRESHOLD);
    }

    #[test]
    fn set_score_collapses_duplicates() {
        assert_eq!(set_score("a a a b", "a b"), 1.0);
        assert!(ordered_score("a a a b", "a b") < 1.0);
    }

    #[test]
    fn one_extra_line_in_long_output_still_passes() {
        let expected: Vec<String> = (0..30).map(|i| format!("line{}", i)).collect();
        let expected = expected.join("\n");
        let actual = format!("{}\nextra", expected);
        assert!(ordered_score(&actual, &expected) >= DEFAULT_PASS_THRESHOLD);
        assert!(set_score(&actual, &expected) >= DEFAULT_PASS_THRESHOLD);
    }

    #[test]
    fn nine_of_ten_tokens_is_exactly_the_threshold() {
        let expected = "1 2 3 4 5 6 7 8 9 10";
        assert_eq!(set_score("1 2 3 4 5 6 7 8 9", expected), DEFAULT_PASS_THRESHOLD);
        assert_eq!(ordered_score("1 2 3 4 5 6 7 8 9 x", expected), DEFAULT_PASS_THRESHOLD);
    }

    #[test]
    fn metric_selection() {
        assert_eq!(Metric::for_order_sensitive(true), Metric::Ordered);
        assert_eq!(Metric::for_order_sensitive(false), Metric::Set);
        assert_eq!(Metric::Ordered.to_string(), "ordered");
    }
}
