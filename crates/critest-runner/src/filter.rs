//! Leaf selection by focus and skip patterns.

use regex::Regex;

/// Selects leaves by matching their full path text.
///
/// The full path is every ancestor group description followed by the leaf
/// description, joined with single spaces. A leaf runs when it matches
/// `focus` (or no focus is set) and does not match `skip`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    focus: Option<Regex>,
    skip: Option<Regex>,
}

impl Filter {
    /// A filter that selects every leaf.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a filter from optional focus and skip patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if either pattern is not a valid regular expression.
    pub fn new(focus: Option<&str>, skip: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            focus: focus.filter(|p| !p.is_empty()).map(Regex::new).transpose()?,
            skip: skip.filter(|p| !p.is_empty()).map(Regex::new).transpose()?,
        })
    }

    /// Returns whether the leaf with this full path text is selected.
    #[must_use]
    pub fn selects(&self, full_text: &str) -> bool {
        let focused = self.focus.as_ref().is_none_or(|re| re.is_match(full_text));
        let skipped = self.skip.as_ref().is_some_and(|re| re.is_match(full_text));
        focused && !skipped
    }
}

/// Joins path components into the text matched by a [`Filter`].
#[must_use]
pub fn full_text(path: &[&str]) -> String {
    path.iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_selects_everything() {
        assert!(Filter::all().selects("[k8s.io] PodSandbox runs"));
    }

    #[test]
    fn focus_and_skip_combine() {
        let filter = Filter::new(Some(r"\[Conformance\]"), Some("AppArmor")).unwrap();
        assert!(filter.selects("[k8s.io] PodSandbox [Conformance] runs"));
        assert!(!filter.selects("[k8s.io] Container runs"));
        assert!(!filter.selects("[k8s.io] AppArmor [Conformance] denies"));
    }

    #[test]
    fn empty_patterns_are_ignored() {
        let filter = Filter::new(Some(""), Some("")).unwrap();
        assert!(filter.selects("anything"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(Filter::new(Some("("), None).is_err());
    }

    #[test]
    fn full_text_skips_empty_root() {
        assert_eq!(full_text(&["", "Group", "leaf"]), "Group leaf");
    }
}
