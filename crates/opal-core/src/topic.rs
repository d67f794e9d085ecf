//! Hierarchical pub/sub topics and the directory-set reduction used by the
//! policy source when turning a diff into a minimal set of notification
//! topics.

use serde::{Deserialize, Serialize};

/// A `/`-delimited topic, with an optional `scope:` prefix.
///
/// Subscribing to `a/b` receives messages published to exactly `a/b`;
/// publishers widen a logical topic into every ancestor via [`Topic::expand`]
/// so subscribers anywhere along the path see it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(raw: impl Into<String>) -> Self {
        Topic(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split_scope(&self) -> (Option<&str>, &str) {
        match self.0.split_once(':') {
            Some((scope, rest)) if !scope.is_empty() && !scope.contains('/') => (Some(scope), rest),
            _ => (None, self.0.as_str()),
        }
    }

    /// Expands this topic into the set of its ancestors, itself included,
    /// preserving the scope prefix at every step: `s:a/b/c` -> `[s:a, s:a/b,
    /// s:a/b/c]`.
    pub fn expand(&self) -> Vec<Topic> {
        let (scope, path) = self.split_scope();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut out = Vec::with_capacity(segments.len());
        let mut acc = String::new();
        for (i, seg) in segments.iter().enumerate() {
            if i > 0 {
                acc.push('/');
            }
            acc.push_str(seg);
            let rendered = match scope {
                Some(s) => format!("{s}:{acc}"),
                None => acc.clone(),
            };
            out.push(Topic::new(rendered));
        }
        out
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Topic(value)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Topic(value.to_string())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reduces a list of directory paths to the subset where no entry is nested
/// inside another, deduplicating along the way. Used when the policy source
/// turns a diff's affected-paths set into the topics it publishes on: a
/// notification on a parent directory already reaches subscribers of any
/// child, so child directories are redundant.
pub fn non_intersecting_dirs<I, S>(dirs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut list: Vec<String> = dirs.into_iter().map(Into::into).collect();
    list.sort();
    list.dedup();

    let mut result: Vec<String> = Vec::new();
    for dir in list {
        if result.iter().any(|existing| is_ancestor(existing, &dir)) {
            continue;
        }
        result.retain(|existing| !is_ancestor(&dir, existing));
        result.push(dir);
    }
    result
}

fn is_ancestor(ancestor: &str, candidate: &str) -> bool {
    candidate == ancestor || candidate.starts_with(&format!("{ancestor}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_has_one_entry_per_segment() {
        let topic = Topic::new("a/b/c");
        let expanded = topic.expand();
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded[0].as_str(), "a");
        assert_eq!(expanded[1].as_str(), "a/b");
        assert_eq!(expanded[2].as_str(), "a/b/c");
    }

    #[test]
    fn expand_preserves_scope_prefix() {
        let topic = Topic::new("s:a/b/c");
        let expanded: Vec<String> = topic.expand().iter().map(|t| t.as_str().to_string()).collect();
        assert_eq!(expanded, vec!["s:a", "s:a/b", "s:a/b/c"]);
    }

    #[test]
    fn expand_single_segment() {
        let topic = Topic::new("policy_data");
        let expanded = topic.expand();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].as_str(), "policy_data");
    }

    #[test]
    fn non_intersecting_dirs_drops_nested_children() {
        let dirs = vec!["a", "a/b", "a/b/c", "z"];
        let mut result = non_intersecting_dirs(dirs);
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "z".to_string()]);
    }

    #[test]
    fn non_intersecting_dirs_dedups_exact_duplicates() {
        let dirs = vec!["a", "a", "b"];
        let mut result = non_intersecting_dirs(dirs);
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn non_intersecting_dirs_does_not_conflate_sibling_prefixes() {
        let dirs = vec!["ab", "a"];
        let mut result = non_intersecting_dirs(dirs);
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "ab".to_string()]);
    }
}
