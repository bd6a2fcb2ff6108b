//! Shared utility functions
//!
//! Typo suggestions for unresolved names.

/// Levenshtein edit distance between two strings, two-row variant.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate within `threshold` edits; ties go to the
/// lexicographically smallest name so hints are stable across runs.
pub fn find_similar_name<'a, I>(name: &str, candidates: I, threshold: usize) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|candidate| *candidate != name)
        .map(|candidate| (levenshtein_distance(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= threshold)
        .min()
        .map(|(_, candidate)| candidate)
}

/// Edit budget for a name: two edits, or a third of the length for long names.
pub fn suggestion_threshold(name: &str) -> usize {
    (name.chars().count() / 3).max(2)
}

/// `did you mean` hint for an unknown name, if a close candidate exists.
pub fn suggest<'a, I>(name: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    find_similar_name(name, candidates, suggestion_threshold(name))
        .map(|candidate| format!("did you mean `{candidate}`?"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein_distance("Area", "Area"), 0);
    }

    #[test]
    fn test_levenshtein_single_edit() {
        assert_eq!(levenshtein_distance("Width", "Widht"), 2);
        assert_eq!(levenshtein_distance("Area", "Aera"), 2);
        assert_eq!(levenshtein_distance("Height", "Heigt"), 1);
    }

    #[test]
    fn test_levenshtein_empty_strings() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("", "ab"), 2);
    }

    #[test]
    fn test_find_similar_name_prefers_closest() {
        let found = find_similar_name("Widht", ["Height", "Width"], 2);
        assert_eq!(found, Some("Width"));
    }

    #[test]
    fn test_find_similar_name_tie_is_stable() {
        let found = find_similar_name("ab", ["ac", "aa"], 1);
        assert_eq!(found, Some("aa"));
    }

    #[test]
    fn test_find_similar_name_none_beyond_threshold() {
        assert_eq!(find_similar_name("x", ["Rectangle"], 1), None);
    }

    #[test]
    fn test_suggest_formats_hint() {
        assert_eq!(
            suggest("Aera", ["Area", "Perimeter"]),
            Some("did you mean `Area`?".to_string())
        );
        assert_eq!(suggest("zzz", ["Area"]), None);
    }
}
