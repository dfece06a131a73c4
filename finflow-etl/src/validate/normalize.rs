//! Text standardization
//!
//! Source systems disagree on spelling: double spaces, stray accents,
//! mixed case, legacy names. Standardization makes values joinable
//! before rules and lookups run: trim, collapse internal whitespace,
//! uppercase, strip accents (NFKD, drop combining marks).

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Remove accents from a string (NFKD -> drop combining marks)
pub fn strip_accents(value: &str) -> String {
    value.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Full standardization: whitespace collapse + trim + uppercase + accents
pub fn standardize(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    strip_accents(&collapsed).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents() {
        assert_eq!(strip_accents("DIVINÓPOLIS"), "DIVINOPOLIS");
        assert_eq!(strip_accents("Itajubá"), "Itajuba");
        assert_eq!(strip_accents("SAPUCAÍ-MIRIM"), "SAPUCAI-MIRIM");
    }

    #[test]
    fn collapses_whitespace_and_uppercases() {
        assert_eq!(standardize("  são   paulo  "), "SAO PAULO");
        assert_eq!(standardize("Betim\tRegional"), "BETIM REGIONAL");
    }

    #[test]
    fn plain_ascii_unchanged() {
        assert_eq!(standardize("LAVRAS"), "LAVRAS");
    }
}
