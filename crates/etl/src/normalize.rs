//! Normalization of commodity identifiers and free-text sector tags.
//! Every function here is total: invalid input degrades to a best-effort
//! result instead of failing.

/// Width of a canonical commodity code.
pub const CODE_WIDTH: usize = 6;

/// Keyword heuristics mapping title/description text to the controlled
/// sector vocabulary.
const SECTOR_KEYWORDS: &[(&str, &[&str])] = &[
    ("electronics", &["semiconductor", "circuit", "chip", "battery", "converter", "led"]),
    ("industrial", &["machinery", "reactor", "pump", "compressor", "industrial"]),
    ("automotive", &["vehicle", "automotive", "motor", "engine"]),
    ("metals", &["steel", "valve", "fitting", "aluminium", "metal"]),
    ("energy", &["energy", "solar", "battery", "power"]),
    ("instruments", &["analyzer", "instrument", "meter", "sensor"]),
];

/// Canonicalizes a raw commodity identifier to the fixed 6-digit form.
///
/// Non-digit characters are dropped; the remaining digits are left-padded
/// with zeros when shorter than 6 and truncated to the first 6 when longer.
/// A digit-free input yields `"000000"`.
pub fn canonical_code(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= CODE_WIDTH {
        digits[..CODE_WIDTH].to_string()
    } else {
        format!("{:0>width$}", digits, width = CODE_WIDTH)
    }
}

/// Whether a raw identifier carries any digits at all. Rows without one are
/// malformed and skipped by the fetcher rather than collapsing onto the
/// all-zero code.
pub fn has_code_digits(raw: &str) -> bool {
    raw.chars().any(|c| c.is_ascii_digit())
}

/// Maps free text to the sector vocabulary by case-insensitive substring
/// match. Returns the matching sectors in vocabulary order, deduplicated;
/// an empty vec when nothing matches.
pub fn infer_sectors(text_blocks: &[&str]) -> Vec<String> {
    let haystack = text_blocks.join(" ").to_lowercase();
    SECTOR_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| haystack.contains(keyword)))
        .map(|(sector, _)| sector.to_string())
        .collect()
}

/// Parses a `{a,b}`-braced or plain comma-separated sector list.
pub fn parse_sector_list(raw: &str) -> Vec<String> {
    let cleaned = raw.trim();
    let cleaned = cleaned
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(cleaned);
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes_are_left_padded() {
        assert_eq!(canonical_code("8504"), "008504");
        assert_eq!(canonical_code("1"), "000001");
    }

    #[test]
    fn long_codes_are_truncated() {
        assert_eq!(canonical_code("85044099"), "850440");
        assert_eq!(canonical_code("850440"), "850440");
    }

    #[test]
    fn non_digits_are_dropped_before_padding() {
        assert_eq!(canonical_code("HS 85.04"), "008504");
        assert_eq!(canonical_code(""), "000000");
        assert!(!has_code_digits("no code here"));
        assert!(has_code_digits("HS 85"));
    }

    #[test]
    fn sectors_match_case_insensitively() {
        let sectors = infer_sectors(&["Static Converters", "power electronics"]);
        assert_eq!(sectors, vec!["electronics", "energy"]);
    }

    #[test]
    fn no_keyword_match_yields_empty_set() {
        assert!(infer_sectors(&["fresh cut flowers"]).is_empty());
        assert!(infer_sectors(&[]).is_empty());
    }

    #[test]
    fn sector_lists_parse_braced_and_plain_forms() {
        assert_eq!(parse_sector_list("{energy,electronics}"), vec!["energy", "electronics"]);
        assert_eq!(parse_sector_list("metals, industrial"), vec!["metals", "industrial"]);
        assert!(parse_sector_list("").is_empty());
    }
}
