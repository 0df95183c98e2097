/// ISO 639-1 code followed by the spellings sources use for that language: the
/// three-letter bibliographic and terminology codes and the English name.
const LANGUAGES: &[(&str, &[&str])] = &[
    ("en", &["eng", "english"]),
    ("fr", &["fre", "fra", "french"]),
    ("de", &["ger", "deu", "german"]),
    ("es", &["spa", "spanish"]),
    ("it", &["ita", "italian"]),
    ("pt", &["por", "portuguese"]),
    ("nl", &["dut", "nld", "dutch"]),
    ("ru", &["rus", "russian"]),
    ("la", &["lat", "latin"]),
    ("el", &["gre", "ell", "greek"]),
    ("sv", &["swe", "swedish"]),
    ("fi", &["fin", "finnish"]),
    ("da", &["dan", "danish"]),
    ("no", &["nor", "norwegian"]),
    ("pl", &["pol", "polish"]),
    ("ja", &["jpn", "japanese"]),
    ("zh", &["chi", "zho", "chinese"]),
];

/// Maps a language name or code to its two-letter code. Unknown values map to `None`.
#[must_use]
#[inline]
pub fn language_code(raw: &str) -> Option<&'static str> {
    let lowered = raw
        .trim()
        .trim_start_matches("/languages/")
        .to_lowercase();
    LANGUAGES
        .iter()
        .find(|&&(code, aliases)| code == lowered || aliases.contains(&lowered.as_str()))
        .map(|&(code, _)| code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_names_and_codes() {
        assert_eq!(language_code("English"), Some("en"));
        assert_eq!(language_code("/languages/fre"), Some("fr"));
        assert_eq!(language_code("de"), Some("de"));
        assert_eq!(language_code("Klingon"), None);
    }
}
