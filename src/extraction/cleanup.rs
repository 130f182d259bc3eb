//! Post-extraction text cleanup.

use regex::Regex;

/// Ordered cleanup: strip `remove` matches, turn `space` matches into a
/// space, then collapse whitespace runs and trim.
#[derive(Debug, Clone, Default)]
pub struct Cleanup {
    remove: Option<Regex>,
    space: Option<Regex>,
}

impl Cleanup {
    pub fn new(remove: Option<Regex>, space: Option<Regex>) -> Self {
        Self { remove, space }
    }

    /// Returns `None` when nothing is left.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let mut value = raw.to_string();
        if let Some(ref remove) = self.remove {
            value = remove.replace_all(&value, "").into_owned();
        }
        if let Some(ref space) = self.space {
            value = space.replace_all(&value, " ").into_owned();
        }
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_then_space_then_collapse() {
        let cleanup = Cleanup::new(
            Some(Regex::new(r"\s*-\s*Google Search$").unwrap()),
            Some(Regex::new(r"\+").unwrap()),
        );
        assert_eq!(
            cleanup.apply("  rust+lang   book - Google Search").as_deref(),
            Some("rust lang book")
        );
    }

    #[test]
    fn empty_result_is_none() {
        let cleanup = Cleanup::new(Some(Regex::new(".*").unwrap()), None);
        assert_eq!(cleanup.apply("anything"), None);
        assert_eq!(Cleanup::default().apply("   \n\t "), None);
    }
}
