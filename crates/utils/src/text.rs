/// Slugs name containers, tasks and sections in friendly URLs and in the
/// `(slug, parent_uuid)` uniqueness constraint. Lowercase alphanumerics
/// plus `-` and `_`, non-empty, max 128 chars.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 128
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_slugs() {
        assert!(is_valid_slug("backend"));
        assert!(is_valid_slug("api-v2"));
        assert!(is_valid_slug("infra_2024"));
    }

    #[test]
    fn rejects_empty_uppercase_and_spaces() {
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Backend"));
        assert!(!is_valid_slug("two words"));
        assert!(!is_valid_slug("a/b"));
    }
}
