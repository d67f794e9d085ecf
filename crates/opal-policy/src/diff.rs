//! Shared diff helper (spec §4.6): the directory set affected between two
//! commits of a policy source's working tree, used to decide which
//! `policy:<dir>` topics to publish on. Both source variants commit into a
//! local git repo (the Git source directly, the bundle-URL source via its
//! own extract-then-commit step), so both can share this.

use std::path::{Path, PathBuf};

use git2::Repository;
use opal_core::non_intersecting_dirs;

use crate::error::Result;

pub fn affected_directories(
    repo_path: &Path,
    old_sha: &str,
    new_sha: &str,
    in_directories: &[PathBuf],
) -> Result<Vec<String>> {
    let repo = Repository::open(repo_path)?;
    let old_commit = repo.find_commit(git2::Oid::from_str(old_sha)?)?;
    let new_commit = repo.find_commit(git2::Oid::from_str(new_sha)?)?;
    let old_tree = old_commit.tree()?;
    let new_tree = new_commit.tree()?;

    let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;
    let mut dirs = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                let dir = path.parent().unwrap_or(Path::new(""));
                let dir_str = dir.display().to_string();
                let relevant = in_directories.is_empty()
                    || in_directories
                        .iter()
                        .any(|d| d.as_os_str() == "." || dir.starts_with(d));
                if relevant {
                    dirs.push(if dir_str.is_empty() {
                        ".".to_string()
                    } else {
                        dir_str
                    });
                }
            }
            true
        },
        None,
        None,
        None,
    )?;

    Ok(non_intersecting_dirs(dirs))
}
