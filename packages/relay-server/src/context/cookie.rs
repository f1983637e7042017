use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Parses a `cookie` header into a flat map. The last occurrence of a name
/// wins; values are percent-decoded and unquoted.
#[must_use]
pub fn parse_cookie(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            Some((name.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_decodes_values() {
        let cookie = parse_cookie("sid=abc; lang=ko%2DKR; theme=\"dark\"; broken; =x");
        assert_eq!(cookie.len(), 3);
        assert_eq!(cookie["sid"], "abc");
        assert_eq!(cookie["lang"], "ko-KR");
        assert_eq!(cookie["theme"], "dark");
    }

    #[test]
    fn last_occurrence_wins() {
        let cookie = parse_cookie("a=1; a=2");
        assert_eq!(cookie["a"], "2");
    }

    #[test]
    fn empty_header_is_empty_map() {
        assert!(parse_cookie("").is_empty());
    }
}
