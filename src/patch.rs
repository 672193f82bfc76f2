//! Patch synthesis: turn an (old_code, new_code) snippet pair into a
//! unified diff positioned against the real file contents.
//!
//! The synthesizer works on a shared, cached checkout. It splices the
//! replacement into the located span, captures the delta with `git diff`,
//! and then restores the tree to its clean state before returning. The
//! restore step is a hard invariant: the checkout is reused by later calls
//! and must never be left dirty.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use walkdir::WalkDir;

use crate::error::PatchError;
use crate::locator;

/// A unified-diff patch string.
///
/// Well-formed patches always begin with `diff --git a/`. The constructors
/// are the only way to obtain a `Patch`, so everything downstream can rely
/// on that prefix. A patch is created once per candidate edit and is
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Patch(String);

impl Patch {
    /// Validates untrusted patch text (typically straight from an LLM).
    ///
    /// Normalizes the common completion artifacts first: CRLF line endings,
    /// double-escaped `\\n` sequences, and `&#34` entity fragments.
    pub fn parse(raw: &str) -> Result<Self, PatchError> {
        let normalized = raw
            .replace("\r\n", "\n")
            .replace("\\\\n", "\n")
            .replace("&#34", "'");
        Self::from_diff_output(normalized)
    }

    /// Wraps diff output produced by this process. Still checks the header
    /// so an empty or truncated diff cannot sneak through.
    pub fn from_diff_output(text: String) -> Result<Self, PatchError> {
        if !text.starts_with("diff --git a/") {
            let preview: String = text.chars().take(80).collect();
            return Err(PatchError::InvalidHeader { preview });
        }
        Ok(Self(text))
    }

    /// The patch text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the patch, returning the text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves `filename` against the real file tree under `root`.
///
/// The model frequently quotes a path that only suffix-matches the real one
/// (`main.py` for `src/pkg/main.py`, or a stale `./`-prefixed variant), so
/// the lookup walks the tree and keeps every path whose components end with
/// the given name. Ambiguity is broken deterministically: shortest path
/// first, then lexicographic.
pub fn resolve_file(root: &Path, filename: &str) -> Result<PathBuf, PatchError> {
    let needle = filename.trim_start_matches("./").trim_start_matches('/');
    if needle.is_empty() {
        return Err(PatchError::FileNotFound(filename.to_string()));
    }
    let needle_path = Path::new(needle);

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        if rel.ends_with(needle_path) {
            candidates.push(rel.to_path_buf());
        }
    }

    if candidates.is_empty() {
        return Err(PatchError::FileNotFound(filename.to_string()));
    }
    if candidates.len() > 1 {
        candidates.sort_by(|a, b| {
            let (a, b) = (a.as_os_str(), b.as_os_str());
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        });
        tracing::debug!(
            filename = filename,
            matches = candidates.len(),
            picked = %candidates[0].display(),
            "ambiguous filename, using deterministic tie-break"
        );
    }
    Ok(root.join(&candidates[0]))
}

/// Synthesizes a [`Patch`] replacing `old_code` with `new_code` in
/// `filename` under the checkout at `root`.
///
/// The checkout must be a clean git working tree (with any accumulated
/// prior patches already committed or re-applied by the caller). The tree
/// is restored to that clean state before this function returns, on every
/// path that reaches the splice.
///
/// # Errors
///
/// Propagates [`crate::error::LocatorError`] when `old_code` cannot be
/// located, `FileNotFound` when the filename does not resolve, and
/// `DiffFailed` when the diff tool itself fails.
pub async fn synthesize(
    root: &Path,
    filename: &str,
    old_code: &str,
    new_code: &str,
    fuzzy_threshold: u32,
) -> Result<Patch, PatchError> {
    // Start from a known-clean tree; a previous caller may have crashed
    // between splice and restore.
    discard_changes(root).await?;

    let file_path = resolve_file(root, filename)?;
    let text = tokio::fs::read_to_string(&file_path).await?;
    let span = locator::locate(&text, old_code, fuzzy_threshold)?;

    tracing::debug!(
        file = %file_path.display(),
        span_start = span.start,
        span_end = span.end,
        "located edit span"
    );

    let spliced = format!("{}{}{}", &text[..span.start], new_code, &text[span.end..]);

    // Write and capture the diff, then restore unconditionally before
    // inspecting the result. The restore must happen even when the write
    // only partially succeeded or the diff failed.
    let diff_result = async {
        tokio::fs::write(&file_path, &spliced).await?;
        git_output(root, &["diff"]).await
    }
    .await;
    discard_changes(root).await?;

    let output = diff_result?;
    if !output.status.success() {
        return Err(PatchError::DiffFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Patch::from_diff_output(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Applies an accepted patch to the checkout and commits it, so the tree
/// becomes the new clean base for later synthesis calls.
///
/// Multi-turn repair sessions accumulate edits this way: each accepted
/// patch is re-applied in chronological order on top of the pinned commit,
/// and `git reset --hard HEAD` inside [`synthesize`] then restores to the
/// accumulated base instead of wiping it. The commits are transient; the
/// checkout cache's cleanup resets to the pinned commit and discards them.
pub async fn apply_and_commit(root: &Path, patch: &Patch) -> Result<(), PatchError> {
    let mut child = Command::new("git")
        .args([
            "apply",
            "--ignore-space-change",
            "--ignore-whitespace",
            "--recount",
            "--inaccurate-eof",
            "-",
        ])
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(ref mut stdin) = child.stdin {
        use tokio::io::AsyncWriteExt;
        stdin.write_all(patch.as_str().as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(PatchError::GitFailed {
            dir: root.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    // `add -A` first so patches that create files are committed too.
    let add = git_output(root, &["add", "-A"]).await?;
    if !add.status.success() {
        return Err(PatchError::GitFailed {
            dir: root.display().to_string(),
            message: String::from_utf8_lossy(&add.stderr).to_string(),
        });
    }
    let commit = git_output(
        root,
        &[
            "-c",
            "user.email=harness@localhost",
            "-c",
            "user.name=harness",
            "commit",
            "--no-verify",
            "-m",
            "accumulate accepted patch",
        ],
    )
    .await?;
    if !commit.status.success() {
        return Err(PatchError::GitFailed {
            dir: root.display().to_string(),
            message: String::from_utf8_lossy(&commit.stderr).to_string(),
        });
    }
    Ok(())
}

/// Hard-resets the working tree, discarding uncommitted changes.
pub async fn discard_changes(root: &Path) -> Result<(), PatchError> {
    let output = git_output(root, &["reset", "--hard", "HEAD"]).await?;
    if !output.status.success() {
        return Err(PatchError::GitFailed {
            dir: root.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

async fn git_output(dir: &Path, args: &[&str]) -> Result<std::process::Output, PatchError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(output)
}
