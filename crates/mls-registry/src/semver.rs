//! SemVer 2.0 syntax check: `MAJOR.MINOR.PATCH[-pre][+build]`.
//!
//! Only the grammar is checked; versions are never ordered by precedence
//! (latest is decided by publish time).

/// True if `s` is a valid SemVer 2.0 version string.
pub fn is_valid_semver(s: &str) -> bool {
    let (rest, build) = match s.split_once('+') {
        Some((r, b)) => (r, Some(b)),
        None => (s, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((c, p)) => (c, Some(p)),
        None => (rest, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 || !parts.iter().all(|p| is_numeric_identifier(p)) {
        return false;
    }

    if let Some(pre) = pre {
        if !pre.split('.').all(|id| {
            is_alnum_identifier(id)
                && (!id.bytes().all(|b| b.is_ascii_digit()) || is_numeric_identifier(id))
        }) {
            return false;
        }
    }

    if let Some(build) = build {
        if !build.split('.').all(is_alnum_identifier) {
            return false;
        }
    }
    true
}

/// Digits only, no leading zero unless the identifier is `0`.
fn is_numeric_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
}

fn is_alnum_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_versions() {
        for v in [
            "0.0.0",
            "1.0.0",
            "2.10.3",
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-0.3.7",
            "1.0.0-x-y-z.--",
            "1.0.0+20130313144700",
            "1.0.0-beta+exp.sha.5114f85",
        ] {
            assert!(is_valid_semver(v), "{v}");
        }
    }

    #[test]
    fn rejects_invalid_versions() {
        for v in [
            "", "1", "1.0", "1.0.0.0", "01.0.0", "1.02.0", "v1.0.0", "1.0.0-", "1.0.0-01",
            "1.0.0+", "1.0.0-a..b", "1.0.0-ä", "1.0.0/..", " 1.0.0",
        ] {
            assert!(!is_valid_semver(v), "{v:?}");
        }
    }
}
