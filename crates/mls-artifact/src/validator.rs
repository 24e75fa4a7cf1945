//! Weak validators (`W/"<sha256 hex>"`) for conditional fetch.

use crate::sha256_hex;

/// Weak entity tag over the exact bytes served.
pub fn weak_validator(bytes: &[u8]) -> String {
    format!("W/\"{}\"", sha256_hex(bytes))
}

/// True when an `If-None-Match` header value matches `current`, i.e. the
/// client already holds these bytes and a 304 is the right answer.
///
/// Uses weak comparison: `W/"x"` and `"x"` are the same tag. A list of tags
/// and the `*` wildcard are both honored.
pub fn if_none_match_satisfied(header: &str, current: &str) -> bool {
    let current = opaque_tag(current);
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || (!candidate.is_empty() && opaque_tag(candidate) == current)
    })
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_validator_format() {
        let v = weak_validator(b"abc");
        assert_eq!(
            v,
            "W/\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
    }

    #[test]
    fn any_byte_change_changes_validator() {
        assert_ne!(weak_validator(b"{\"a\":1}"), weak_validator(b"{\"a\":2}"));
    }

    #[test]
    fn weak_comparison_and_lists() {
        let cur = weak_validator(b"x");
        let strong = cur.trim_start_matches("W/").to_string();
        assert!(if_none_match_satisfied(&cur, &cur));
        assert!(if_none_match_satisfied(&strong, &cur));
        assert!(if_none_match_satisfied(&format!("W/\"other\", {cur}"), &cur));
        assert!(if_none_match_satisfied("*", &cur));
        assert!(!if_none_match_satisfied("W/\"other\"", &cur));
        assert!(!if_none_match_satisfied("", &cur));
    }
}
