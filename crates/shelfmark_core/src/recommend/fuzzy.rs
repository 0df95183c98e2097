/// Similarity a suggested title needs to reach to count as a match.
pub const DEFAULT_CUTOFF: f64 = 0.7;

/// The part of a title before its subtitle, e.g. `the hobbit` for
/// `The Hobbit: or There and Back Again`.
fn main_title(title: &str) -> &str {
    [": ", ":", "; ", " - ", " (", "("]
        .iter()
        .filter_map(|separator| title.find(separator))
        .min()
        .and_then(|end| title.get(..end))
        .map_or(title, str::trim)
}

/// Similarity of two titles between 0 and 1, ignoring case, surrounding whitespace
/// and subtitles. Blank titles are never similar.
#[must_use]
#[inline]
pub fn similarity(left: &str, right: &str) -> f64 {
    let left = left.trim().to_lowercase();
    let right = right.trim().to_lowercase();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let whole = strsim::normalized_levenshtein(&left, &right);
    let (left_main, right_main) = (main_title(&left), main_title(&right));
    if left_main.is_empty() || right_main.is_empty() {
        return whole;
    }
    whole.max(strsim::normalized_levenshtein(left_main, right_main))
}

/// The position of the most similar candidate at or above `cutoff`. Ties go to the
/// earlier candidate.
#[must_use]
#[inline]
pub fn best_match<'a, I>(needle: &str, candidates: I, cutoff: f64) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (position, candidate) in candidates.into_iter().enumerate() {
        let score = similarity(needle, candidate);
        if score >= cutoff && best.is_none_or(|(_, top)| score > top) {
            best = Some((position, score));
        }
    }
    best.map(|(position, _)| position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subtitles_do_not_hide_a_match() {
        assert!(similarity("The Hobbit: or There and Back Again", "The Hobbit") >= DEFAULT_CUTOFF);
        assert_eq!(main_title("the hobbit: or there and back again"), "the hobbit");
        assert_eq!(main_title("dune (dune chronicles, #1)"), "dune");
    }

    #[test]
    fn unrelated_titles_stay_below_cutoff() {
        assert!(similarity("Dune", "Emma") < DEFAULT_CUTOFF);
        assert!(similarity("", "Emma") < f64::EPSILON);
        assert!(similarity(": x", ": x") > 0.99);
    }

    #[test]
    fn best_candidate_wins() {
        let titles = ["Dune Messiah", "Dune", "Children of Dune"];
        assert_eq!(best_match("dune", titles, DEFAULT_CUTOFF), Some(1));
        assert_eq!(best_match("Neuromancer", titles, DEFAULT_CUTOFF), None);
        assert_eq!(best_match("Dune", ["Dune", "dune"], DEFAULT_CUTOFF), Some(0));
    }
}
