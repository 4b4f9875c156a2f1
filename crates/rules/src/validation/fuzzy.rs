//! Edit-distance helpers for "did you mean" hints on rule ids.

/// Closest known id to `input`, or `None` when nothing is within half the
/// longer string's length.
pub(crate) fn closest<'a, I>(input: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let input_lower = input.to_lowercase();
    let mut best: Option<(&str, usize)> = None;

    for candidate in candidates {
        let dist = levenshtein(&input_lower, &candidate.to_lowercase());
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((candidate, dist));
        }
    }

    best.and_then(|(name, dist)| {
        let max_len = input.chars().count().max(name.chars().count());
        (dist > 0 && dist <= max_len / 2).then_some(name)
    })
}

pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// `^[a-z0-9]+([-_][a-z0-9]+)*$`
pub(crate) fn is_rule_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut after_separator = true;
    for ch in s.chars() {
        if ch == '-' || ch == '_' {
            if after_separator {
                return false;
            }
            after_separator = true;
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            after_separator = false;
        } else {
            return false;
        }
    }
    !after_separator
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOADED: &[&str] = &[
        "opening-range-breakout",
        "tight-base",
        "rsi-oversold",
        "volume-surge",
    ];

    #[test]
    fn levenshtein_basic() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn closest_finds_typo() {
        assert_eq!(closest("rsi-oversld", LOADED.iter().copied()), Some("rsi-oversold"));
        assert_eq!(closest("Tight-Base2", LOADED.iter().copied()), Some("tight-base"));
    }

    #[test]
    fn closest_rejects_distant_and_exact() {
        assert_eq!(closest("zzzzzzzzzzzzz", LOADED.iter().copied()), None);
        assert_eq!(closest("volume-surge", LOADED.iter().copied()), None);
    }

    #[test]
    fn rule_id_shape() {
        assert!(is_rule_id("volume-surge"));
        assert!(is_rule_id("orb_15m"));
        assert!(!is_rule_id("Volume"));
        assert!(!is_rule_id("-lead"));
        assert!(!is_rule_id("trail_"));
        assert!(!is_rule_id("a--b"));
    }
}
