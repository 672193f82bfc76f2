//! End-to-end patch synthesis against a real git working tree.
//!
//! These tests exercise the locate -> splice -> diff -> restore pipeline
//! and the accumulation flow with nothing mocked: a throwaway git
//! repository stands in for the cached checkout.

use std::path::Path;
use std::process::Command;

use swe_gym::patch::{self, Patch};

const UTIL_PY: &str = "def add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    return a - b\n";

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        status.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
}

fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Initializes a repository holding `app/util.py` with one commit.
fn init_repo(dir: &Path) {
    git(dir, &["init"]);
    std::fs::create_dir_all(dir.join("app")).unwrap();
    std::fs::write(dir.join("app/util.py"), UTIL_PY).unwrap();
    git(dir, &["add", "-A"]);
    git(
        dir,
        &[
            "-c",
            "user.email=test@localhost",
            "-c",
            "user.name=test",
            "commit",
            "-m",
            "initial",
        ],
    );
}

#[tokio::test]
async fn synthesized_patch_applies_cleanly_with_git() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    let patch = patch::synthesize(
        repo.path(),
        "util.py",
        "    return a - b",
        "    return b - a",
        80,
    )
    .await
    .unwrap();
    assert!(patch.as_str().starts_with("diff --git a/app/util.py"));

    // The tree is restored after synthesis.
    let after = std::fs::read_to_string(repo.path().join("app/util.py")).unwrap();
    assert_eq!(after, UTIL_PY);

    // The patch re-applies byte for byte on the clean tree.
    let patch_file = repo.path().join("candidate.patch");
    std::fs::write(&patch_file, patch.as_str()).unwrap();
    git(
        repo.path(),
        &[
            "apply",
            "--ignore-space-change",
            "--ignore-whitespace",
            "--recount",
            "--inaccurate-eof",
            "candidate.patch",
        ],
    );
    let patched = std::fs::read_to_string(repo.path().join("app/util.py")).unwrap();
    assert_eq!(patched, UTIL_PY.replace("return a - b", "return b - a"));
}

#[tokio::test]
async fn synthesis_leaves_no_residue_across_calls() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    for _ in 0..3 {
        patch::synthesize(
            repo.path(),
            "app/util.py",
            "return a + b",
            "return a + b + 0",
            80,
        )
        .await
        .unwrap();
        let status = git_stdout(repo.path(), &["status", "--porcelain"]);
        assert!(status.is_empty(), "dirty tree after synthesis: {status}");
    }
}

#[tokio::test]
async fn synthesis_tolerates_imprecise_old_code() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    // Trailing whitespace and a small typo stay within the edit budget.
    let patch = patch::synthesize(
        repo.path(),
        "util.py",
        "    return a - b \n",
        "    return abs(a - b)\n",
        80,
    )
    .await
    .unwrap();
    assert!(patch.as_str().contains("abs(a - b)"));
}

#[tokio::test]
async fn unlocatable_old_code_is_rejected() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    let err = patch::synthesize(
        repo.path(),
        "util.py",
        "class CompletelyUnrelated:",
        "class StillUnrelated:",
        80,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, swe_gym::PatchError::Locator(_)));

    let status = git_stdout(repo.path(), &["status", "--porcelain"]);
    assert!(status.is_empty());
}

#[tokio::test]
async fn write_failure_still_restores_the_tree() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    // A read-only target makes the write step fail after the span is
    // located (when running unprivileged). Whichever path executes, the
    // tree must be clean afterwards.
    let target = repo.path().join("app/util.py");
    let mut perms = std::fs::metadata(&target).unwrap().permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&target, perms).unwrap();

    let result = patch::synthesize(
        repo.path(),
        "util.py",
        "    return a - b",
        "    return b - a",
        80,
    )
    .await;

    let status = git_stdout(repo.path(), &["status", "--porcelain"]);
    assert!(status.is_empty(), "dirty tree after failed write: {status}");
    if let Err(err) = result {
        assert!(matches!(err, swe_gym::PatchError::Io(_)));
    }

    let mut perms = std::fs::metadata(&target).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(&target, perms).unwrap();
}

#[tokio::test]
async fn accepted_patches_accumulate_through_commits() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    let first = patch::synthesize(
        repo.path(),
        "util.py",
        "    return a + b",
        "    return int(a) + int(b)",
        80,
    )
    .await
    .unwrap();
    patch::apply_and_commit(repo.path(), &first).await.unwrap();

    // The second synthesis quotes the tree as it stands after the first
    // accepted patch.
    let second = patch::synthesize(
        repo.path(),
        "util.py",
        "    return a - b",
        "    return int(a) - int(b)",
        80,
    )
    .await
    .unwrap();
    patch::apply_and_commit(repo.path(), &second).await.unwrap();

    let content = std::fs::read_to_string(repo.path().join("app/util.py")).unwrap();
    assert!(content.contains("int(a) + int(b)"));
    assert!(content.contains("int(a) - int(b)"));

    let status = git_stdout(repo.path(), &["status", "--porcelain"]);
    assert!(status.is_empty());
    let commits = git_stdout(repo.path(), &["rev-list", "--count", "HEAD"]);
    assert_eq!(commits.trim(), "3");
}

#[tokio::test]
async fn discard_changes_restores_accumulated_base_not_origin() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());

    let patch = patch::synthesize(
        repo.path(),
        "util.py",
        "return a + b",
        "return a + b  # fixed",
        80,
    )
    .await
    .unwrap();
    patch::apply_and_commit(repo.path(), &patch).await.unwrap();

    // Scribble over the tree, then restore.
    std::fs::write(repo.path().join("app/util.py"), "garbage\n").unwrap();
    patch::discard_changes(repo.path()).await.unwrap();

    let content = std::fs::read_to_string(repo.path().join("app/util.py")).unwrap();
    assert!(content.contains("# fixed"), "accumulated patch was lost");
}

#[test]
fn parse_rejects_non_diff_text() {
    let err = Patch::parse("I think the fix is to change line 3.").unwrap_err();
    assert!(matches!(err, swe_gym::PatchError::InvalidHeader { .. }));
}
