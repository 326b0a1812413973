/*
 * aurtree - AUR packages kept as git subtrees, built only when needed.
 * Copyright (C) 2025  compiledkernel-idk and pacboost contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Package source trees tracked as git subtrees of one repository.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::builder::run_checked;
use crate::error::{IoContext, Result};

/// Branch every AUR repository publishes
const AUR_BRANCH: &str = "master";

/// AUR clone URL of a package base
pub fn remote_url(git_url: &str, pkgbase: &str) -> String {
    format!("{}/{}.git", git_url.trim_end_matches('/'), pkgbase)
}

/// Version-control operations on one package directory
pub trait Vcs {
    /// Start tracking `remote_url` at `path`
    fn add(&self, remote_url: &str, path: &Path) -> Result<()>;

    /// Pull upstream changes into an existing `path`
    fn update(&self, path: &Path) -> Result<()>;

    /// Replace the ignore list of `path`
    fn set_exclusions(&self, path: &Path, patterns: &[String]) -> Result<()>;
}

/// `git subtree` driver rooted at the package tree
pub struct GitSubtree {
    repo: PathBuf,
    git_url: String,
}

impl GitSubtree {
    pub fn new(repo: impl Into<PathBuf>, git_url: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            git_url: git_url.into(),
        }
    }

    /// Create the repository with an initial commit if it does not exist yet.
    ///
    /// `git subtree add` refuses to work on a repository without `HEAD`.
    pub fn ensure_repository(&self) -> Result<()> {
        if self.repo.join(".git").exists() {
            return Ok(());
        }

        info!(path = %self.repo.display(), "initializing package tree");
        fs::create_dir_all(&self.repo).at_path(&self.repo)?;
        run_checked(self.git().arg("init").arg("--quiet"))?;
        run_checked(
            self.git()
                .args(["commit", "--quiet", "--allow-empty", "-m"])
                .arg("Initialize aurtree package tree"),
        )
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo);
        cmd
    }

    fn prefix<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.repo).unwrap_or(path)
    }
}

impl Vcs for GitSubtree {
    fn add(&self, remote_url: &str, path: &Path) -> Result<()> {
        debug!(remote_url, path = %path.display(), "adding subtree");
        run_checked(
            self.git()
                .args(["subtree", "add", "--squash", "--prefix"])
                .arg(self.prefix(path))
                .arg(remote_url)
                .arg(AUR_BRANCH),
        )
    }

    fn update(&self, path: &Path) -> Result<()> {
        let prefix = self.prefix(path);
        let pkgbase = prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(path = %path.display(), "pulling subtree");
        run_checked(
            self.git()
                .args(["subtree", "pull", "--squash", "--prefix"])
                .arg(prefix)
                .arg(remote_url(&self.git_url, &pkgbase))
                .arg(AUR_BRANCH)
                .arg("-m")
                .arg(format!("Update {}", pkgbase)),
        )
    }

    fn set_exclusions(&self, path: &Path, patterns: &[String]) -> Result<()> {
        let ignore = path.join(".gitignore");
        let mut content = patterns.join("\n");
        content.push('\n');
        fs::write(&ignore, content).at_path(&ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_url() {
        assert_eq!(
            remote_url("https://aur.archlinux.org/", "foo"),
            "https://aur.archlinux.org/foo.git"
        );
        assert_eq!(
            remote_url("https://aur.example.org", "bar"),
            "https://aur.example.org/bar.git"
        );
    }

    #[test]
    fn test_prefix_is_relative_to_repository() {
        let git = GitSubtree::new("/tree", "https://aur.archlinux.org");
        assert_eq!(git.prefix(Path::new("/tree/foo")), Path::new("foo"));
        assert_eq!(git.prefix(Path::new("bar")), Path::new("bar"));
    }

    #[test]
    fn test_set_exclusions_writes_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitSubtree::new(dir.path(), "https://aur.archlinux.org");
        let patterns = vec!["/src/".to_string(), "foo-1.0.tar.gz".to_string()];

        git.set_exclusions(dir.path(), &patterns).unwrap();

        let written = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(written, "/src/\nfoo-1.0.tar.gz\n");
    }
}
