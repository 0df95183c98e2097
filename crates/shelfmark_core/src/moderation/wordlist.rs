/// Phrases that contain a banned word but are known to be harmless. Text containing
/// any of them is approved outright.
pub const ALLOWED_PHRASES: &[&str] = &[
    "moby dick",
    "moby-dick",
    "philip k. dick",
    "philip k dick",
    "dick francis",
    "dick king-smith",
    "dick tracy",
    "scunthorpe",
    "penistone",
    "cockburn",
    "hancock",
    "sussex",
    "essex",
    "middlesex",
    "shiitake",
    "cockney",
];

/// Terms searched for in disguised spellings: stretched letters, separators between
/// letters and look-alike symbols.
pub const OBFUSCATED_TERMS: &[&str] = &[
    "fuck", "shit", "cunt", "bitch", "dick", "cock", "pussy", "asshole", "bastard", "whore",
    "slut", "nigger", "faggot", "retard",
];

/// Words rejected when they appear as whole words.
pub const BANNED_WORDS: &[&str] = &[
    "fuck",
    "fucking",
    "fucked",
    "fucker",
    "motherfucker",
    "shit",
    "shitty",
    "bullshit",
    "cunt",
    "bitch",
    "bitches",
    "dick",
    "dickhead",
    "cock",
    "pussy",
    "asshole",
    "bastard",
    "whore",
    "slut",
    "nigger",
    "nigga",
    "fag",
    "faggot",
    "retard",
    "retarded",
];

/// Characters commonly typed in place of a letter.
pub const LOOKALIKES: &[(char, &str)] = &[
    ('a', "@4"),
    ('e', "3"),
    ('i', "1!|"),
    ('o', "0"),
    ('s', "$5"),
    ('u', "v*"),
    ('t', "7+"),
    ('c', "(k"),
    ('g', "9"),
    ('l', "1|"),
];

/// The word tables behind the deterministic filter. Callers may extend or replace
/// them; the filter compiles whatever it is given.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationLists {
    pub allowed_phrases: Vec<String>,
    pub obfuscated_terms: Vec<String>,
    pub banned_words: Vec<String>,
    pub lookalikes: Vec<(char, String)>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|&item| item.to_owned()).collect()
}

impl Default for ModerationLists {
    #[inline]
    fn default() -> Self {
        Self {
            allowed_phrases: owned(ALLOWED_PHRASES),
            obfuscated_terms: owned(OBFUSCATED_TERMS),
            banned_words: owned(BANNED_WORDS),
            lookalikes: LOOKALIKES
                .iter()
                .map(|&(letter, symbols)| (letter, symbols.to_owned()))
                .collect(),
        }
    }
}

impl ModerationLists {
    /// Symbols that may stand in for `letter`, not including the letter itself.
    #[must_use]
    #[inline]
    pub fn lookalikes_of(&self, letter: char) -> &str {
        self.lookalikes
            .iter()
            .find(|&&(known, _)| known == letter)
            .map_or("", |(_, symbols)| symbols.as_str())
    }
}
