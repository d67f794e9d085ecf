//! Path ignore list: glob patterns matching a write path cause it to be
//! silently skipped, unless a negated `!`-prefixed pattern overrides it.

use globset::{Glob, GlobSet, GlobSetBuilder};

pub struct PathIgnoreList {
    ignore: GlobSet,
    allow: GlobSet,
}

impl PathIgnoreList {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut ignore = GlobSetBuilder::new();
        let mut allow = GlobSetBuilder::new();
        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                allow.add(Glob::new(negated)?);
            } else {
                ignore.add(Glob::new(pattern)?);
            }
        }
        Ok(Self {
            ignore: ignore.build()?,
            allow: allow.build()?,
        })
    }

    pub fn empty() -> Self {
        Self {
            ignore: GlobSet::empty(),
            allow: GlobSet::empty(),
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        if self.allow.is_match(path) {
            return false;
        }
        self.ignore.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_matching_path() {
        let list = PathIgnoreList::new(&["secrets/*".to_string()]).unwrap();
        assert!(list.is_ignored("secrets/token"));
        assert!(!list.is_ignored("public/token"));
    }

    #[test]
    fn negated_pattern_overrides_ignore() {
        let list =
            PathIgnoreList::new(&["secrets/*".to_string(), "!secrets/public".to_string()])
                .unwrap();
        assert!(list.is_ignored("secrets/token"));
        assert!(!list.is_ignored("secrets/public"));
    }

    #[test]
    fn empty_list_ignores_nothing() {
        let list = PathIgnoreList::empty();
        assert!(!list.is_ignored("anything"));
    }
}
