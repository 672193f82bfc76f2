//! Cached repository checkouts keyed by (repo, commit).
//!
//! Cloning a repository and checking out a pinned commit is expensive, so
//! the first request for a key prepares a working tree under the configured
//! save path and every later request returns the same path without
//! re-cloning. Entries live for the process lifetime; there is no eviction.
//!
//! The cache provides identity and reuse, not mutual exclusion: concurrent
//! callers sharing a key race on the working tree and must serialize
//! externally (e.g. a per-key queue in the orchestration layer).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::CheckoutError;

/// Expands a repository identifier into a cloneable URL.
///
/// `owner/repo` becomes a GitHub HTTPS URL; anything that already looks
/// like a URL or a filesystem path passes through unchanged, which keeps
/// the cache usable against local repositories.
pub fn repo_url(repo: &str) -> String {
    if repo.contains("://") || repo.starts_with('/') || repo.starts_with('.') {
        repo.to_string()
    } else {
        format!("https://github.com/{repo}.git")
    }
}

/// Converts an arbitrary identifier into a filesystem/image-safe slug.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Memoized repository checkouts, one working tree per (repo, commit).
#[derive(Debug)]
pub struct CheckoutCache {
    root: PathBuf,
    entries: HashMap<(String, String), PathBuf>,
}

impl CheckoutCache {
    /// Creates a cache that places working trees under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: HashMap::new(),
        }
    }

    /// Returns the checkout path for `(repo, commit)`, cloning and checking
    /// out on first use. Idempotent: later calls return the same path.
    pub async fn get_checkout(
        &mut self,
        repo: &str,
        commit: &str,
    ) -> Result<PathBuf, CheckoutError> {
        let key = (repo.to_string(), commit.to_string());
        if let Some(path) = self.entries.get(&key) {
            return Ok(path.clone());
        }

        tokio::fs::create_dir_all(&self.root).await?;
        // Char-based truncation: `commit` may be a branch or tag name, not
        // just a hex hash.
        let short: String = commit.chars().take(12).collect();
        let dir_name = format!("{}-{}", slugify(repo), slugify(&short));
        let target = self.root.join(dir_name);

        if !target.exists() {
            tracing::info!(repo = repo, commit = commit, target = %target.display(), "cloning repository");
            let url = repo_url(repo);
            let output = git(&self.root, &["clone", &url, &target.to_string_lossy()]).await?;
            if !output.status.success() {
                return Err(CheckoutError::CloneFailed {
                    repo: repo.to_string(),
                    message: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
        } else {
            tracing::debug!(target = %target.display(), "reusing existing checkout directory");
        }

        let output = git(&target, &["checkout", "--force", commit]).await?;
        if !output.status.success() {
            return Err(CheckoutError::CheckoutFailed {
                commit: commit.to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        self.entries.insert(key, target.clone());
        Ok(target)
    }

    /// Hard-resets a cached checkout to its pinned commit, discarding any
    /// uncommitted state a crashed caller may have left behind.
    pub async fn cleanup(&self, repo: &str, commit: &str) -> Result<(), CheckoutError> {
        let key = (repo.to_string(), commit.to_string());
        let path = self
            .entries
            .get(&key)
            .ok_or_else(|| CheckoutError::NotCached {
                repo: repo.to_string(),
                commit: commit.to_string(),
            })?;

        let output = git(path, &["reset", "--hard", commit]).await?;
        if !output.status.success() {
            return Err(CheckoutError::ResetFailed {
                commit: commit.to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        let output = git(path, &["clean", "-fd"]).await?;
        if !output.status.success() {
            return Err(CheckoutError::ResetFailed {
                commit: commit.to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }

    /// Returns the cached path for a key without preparing it.
    pub fn get_cached(&self, repo: &str, commit: &str) -> Option<&Path> {
        self.entries
            .get(&(repo.to_string(), commit.to_string()))
            .map(PathBuf::as_path)
    }

    /// Number of prepared checkouts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no checkout has been prepared yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn git(dir: &Path, args: &[&str]) -> Result<std::process::Output, CheckoutError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("psf/requests"), "psf-requests");
        assert_eq!(slugify("Hello World!"), "hello-world");
        assert_eq!(slugify("__init__"), "init");
        assert_eq!(slugify("a//b..c"), "a-b-c");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_repo_url_expansion() {
        assert_eq!(repo_url("psf/requests"), "https://github.com/psf/requests.git");
        assert_eq!(repo_url("https://example.com/r.git"), "https://example.com/r.git");
        assert_eq!(repo_url("/tmp/local-repo"), "/tmp/local-repo");
        assert_eq!(repo_url("./relative"), "./relative");
    }

    #[test]
    fn test_cleanup_requires_cached_entry() {
        let cache = CheckoutCache::new("/tmp/never-used");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(cache.cleanup("a/b", "deadbeef")).unwrap_err();
        assert!(matches!(err, CheckoutError::NotCached { .. }));
    }

    #[test]
    fn test_empty_cache() {
        let cache = CheckoutCache::new("/tmp/never-used");
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert!(cache.get_cached("a/b", "c").is_none());
    }
}
