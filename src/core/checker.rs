use itertools::{EitherOrBoth, Itertools};

use crate::core::domain::Comparator;

impl Comparator {
    pub fn matches(&self, expected: &str, actual: &str) -> bool {
        match self {
            Comparator::Exact => expected == actual,
            Comparator::Trimmed => trimmed_lines(expected).eq(trimmed_lines(actual)),
            Comparator::Tokens => expected.split_whitespace().eq(actual.split_whitespace()),
            Comparator::Numeric { tolerance } => expected
                .split_whitespace()
                .zip_longest(actual.split_whitespace())
                .all(|pair| match pair {
                    EitherOrBoth::Both(e, a) => tokens_match(e, a, *tolerance),
                    _ => false,
                }),
        }
    }
}

/// Lines with trailing whitespace removed and trailing blank lines dropped.
fn trimmed_lines(text: &str) -> impl Iterator<Item = &str> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let len = lines.iter().rposition(|line| !line.is_empty()).map_or(0, |i| i + 1);
    lines.into_iter().take(len)
}

fn tokens_match(expected: &str, actual: &str, tolerance: f64) -> bool {
    match (expected.parse::<f64>(), actual.parse::<f64>()) {
        (Ok(e), Ok(a)) if e.is_finite() && a.is_finite() => (e - a).abs() <= tolerance.abs(),
        _ => expected == actual,
    }
}
