//! Base image construction for sandboxed test runs.
//!
//! A base image is built once per (repo, commit) pair and reused across
//! runs. The generated Dockerfile installs git, clones the repository at
//! the pinned commit, and installs dependencies by probing the checkout
//! for a dependency manifest in priority order.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::checkout::{repo_url, slugify};
use crate::error::SandboxError;
use crate::sandbox::DockerClient;

/// Content-derived image tag for a (repo, commit) pair.
///
/// The digest keys the build cache: the same pair always maps to the same
/// tag, so an existing image is reused instead of rebuilt.
pub fn image_tag(namespace: &str, repo: &str, commit: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update(b"@");
    hasher.update(commit.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}/{}:{}", slugify(namespace), slugify(repo), &digest[..12])
}

/// Generates the Dockerfile for a (repo, commit) pair.
///
/// `top_level_files` is the file listing of the checkout root, used to pick
/// the dependency install step: a dev-requirements file wins over a plain
/// requirements file, then a poetry lockfile, a Pipfile, and finally a
/// setup script.
pub fn dockerfile_for(repo: &str, commit: &str, top_level_files: &[String]) -> String {
    let has = |name: &str| top_level_files.iter().any(|f| f == name);

    let install: Vec<&str> = if has("dev-requirements.txt") {
        vec!["RUN pip install -r dev-requirements.txt"]
    } else if has("requirements.txt") {
        vec!["RUN pip install -r requirements.txt"]
    } else if has("poetry.lock") {
        vec!["RUN pip install poetry", "RUN poetry install"]
    } else if has("Pipfile") {
        vec!["RUN pip install pipenv", "RUN pipenv install"]
    } else if has("setup.py") {
        vec!["RUN pip install -e ."]
    } else {
        tracing::warn!(repo = repo, "no dependency manifest found, skipping install step");
        vec![]
    };

    let mut lines = vec![
        "FROM python:3.12-alpine".to_string(),
        "RUN apk add --no-cache git".to_string(),
        format!("RUN git clone {} /repo", repo_url(repo)),
        "WORKDIR /repo".to_string(),
        format!("RUN git checkout {commit}"),
    ];
    lines.extend(install.iter().map(|s| s.to_string()));
    lines.push("RUN pip install pytest".to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Ensures the base image for a (repo, commit) pair exists, building it
/// from the given checkout's file listing when missing. Returns the tag.
pub async fn ensure_image(
    client: &DockerClient,
    namespace: &str,
    repo: &str,
    commit: &str,
    checkout: &Path,
) -> Result<String, SandboxError> {
    let tag = image_tag(namespace, repo, commit);
    if client.image_exists(&tag).await {
        tracing::debug!(tag = %tag, "base image already exists");
        return Ok(tag);
    }

    let mut top_level_files = Vec::new();
    let mut entries = tokio::fs::read_dir(checkout).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            top_level_files.push(name.to_string());
        }
    }

    let dockerfile = dockerfile_for(repo, commit, &top_level_files);
    tracing::info!(tag = %tag, repo = repo, commit = commit, "building base image");
    tracing::debug!(dockerfile = %dockerfile, "generated Dockerfile");
    client.build_image(&tag, &dockerfile).await?;
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_image_tag_is_stable_and_content_derived() {
        let a = image_tag("swe-gym", "psf/requests", "abc123");
        let b = image_tag("swe-gym", "psf/requests", "abc123");
        let c = image_tag("swe-gym", "psf/requests", "def456");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("swe-gym/psf-requests:"));
    }

    #[test]
    fn test_dockerfile_prefers_dev_requirements() {
        let df = dockerfile_for(
            "o/r",
            "c0ffee",
            &files(&["dev-requirements.txt", "requirements.txt", "setup.py"]),
        );
        assert!(df.contains("pip install -r dev-requirements.txt"));
        assert!(!df.contains("pip install -r requirements.txt\n"));
    }

    #[test]
    fn test_dockerfile_manifest_priority_order() {
        let df = dockerfile_for("o/r", "c0ffee", &files(&["poetry.lock", "Pipfile"]));
        assert!(df.contains("poetry install"));
        assert!(!df.contains("pipenv"));

        let df = dockerfile_for("o/r", "c0ffee", &files(&["Pipfile", "setup.py"]));
        assert!(df.contains("pipenv install"));

        let df = dockerfile_for("o/r", "c0ffee", &files(&["setup.py"]));
        assert!(df.contains("pip install -e ."));
    }

    #[test]
    fn test_dockerfile_without_manifest_still_has_pytest() {
        let df = dockerfile_for("o/r", "c0ffee", &files(&["README.md"]));
        assert!(df.contains("RUN pip install pytest"));
        assert!(df.contains("git checkout c0ffee"));
        assert!(df.contains("git clone https://github.com/o/r.git /repo"));
    }
}
