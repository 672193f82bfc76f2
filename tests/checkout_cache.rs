//! Checkout cache behavior against a real local git origin.
//!
//! A bare-ish local repository acts as the remote, so the clone path and
//! the commit-pinning logic run for real without network access.

use std::path::Path;
use std::process::Command;

use swe_gym::checkout::CheckoutCache;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Creates an origin repository with one commit; returns its pinned hash.
fn init_origin(dir: &Path) -> String {
    git(dir, &["init"]);
    std::fs::write(dir.join("README.md"), "# demo\n").unwrap();
    std::fs::write(dir.join("main.py"), "print('v1')\n").unwrap();
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
    git(dir, &["rev-parse", "HEAD"]).trim().to_string()
}

#[tokio::test]
async fn checkout_is_cloned_once_and_reused() {
    let origin = tempfile::tempdir().unwrap();
    let commit = init_origin(origin.path());
    let cache_root = tempfile::tempdir().unwrap();
    let repo = origin.path().to_string_lossy().to_string();

    let mut cache = CheckoutCache::new(cache_root.path());
    let first = cache.get_checkout(&repo, &commit).await.unwrap();
    assert!(first.join("main.py").exists());

    // A sentinel survives the second call: the cache hands back the same
    // working tree instead of cloning again.
    std::fs::write(first.join("sentinel.txt"), "still here\n").unwrap();
    let second = cache.get_checkout(&repo, &commit).await.unwrap();
    assert_eq!(first, second);
    assert!(second.join("sentinel.txt").exists());
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn fresh_cache_instance_reuses_existing_directory() {
    let origin = tempfile::tempdir().unwrap();
    let commit = init_origin(origin.path());
    let cache_root = tempfile::tempdir().unwrap();
    let repo = origin.path().to_string_lossy().to_string();

    let path = {
        let mut cache = CheckoutCache::new(cache_root.path());
        let path = cache.get_checkout(&repo, &commit).await.unwrap();
        std::fs::write(path.join("sentinel.txt"), "still here\n").unwrap();
        path
    };

    // A new process-equivalent: same cache root, empty entry map.
    let mut cache = CheckoutCache::new(cache_root.path());
    let reused = cache.get_checkout(&repo, &commit).await.unwrap();
    assert_eq!(path, reused);
    assert!(reused.join("sentinel.txt").exists());
}

#[tokio::test]
async fn cleanup_restores_the_pinned_commit() {
    let origin = tempfile::tempdir().unwrap();
    let commit = init_origin(origin.path());
    let cache_root = tempfile::tempdir().unwrap();
    let repo = origin.path().to_string_lossy().to_string();

    let mut cache = CheckoutCache::new(cache_root.path());
    let checkout = cache.get_checkout(&repo, &commit).await.unwrap();

    // Dirty the tree and add a transient commit on top of the pin.
    std::fs::write(checkout.join("main.py"), "print('patched')\n").unwrap();
    git(&checkout, &["add", "-A"]);
    git(
        &checkout,
        &[
            "-c",
            "user.email=test@localhost",
            "-c",
            "user.name=test",
            "commit",
            "-m",
            "transient",
        ],
    );
    std::fs::write(checkout.join("main.py"), "print('scribble')\n").unwrap();

    cache.cleanup(&repo, &commit).await.unwrap();

    let content = std::fs::read_to_string(checkout.join("main.py")).unwrap();
    assert_eq!(content, "print('v1')\n");
    let head = git(&checkout, &["rev-parse", "HEAD"]);
    assert_eq!(head.trim(), commit);
}

#[tokio::test]
async fn multibyte_ref_names_are_handled() {
    let origin = tempfile::tempdir().unwrap();
    let _ = init_origin(origin.path());
    // A branch name whose 12th byte falls inside a multibyte character.
    git(origin.path(), &["branch", "fix-修复补丁分支"]);
    let cache_root = tempfile::tempdir().unwrap();
    let repo = origin.path().to_string_lossy().to_string();

    let mut cache = CheckoutCache::new(cache_root.path());
    let checkout = cache
        .get_checkout(&repo, "fix-修复补丁分支")
        .await
        .unwrap();
    assert!(checkout.join("main.py").exists());
}

#[tokio::test]
async fn unknown_commit_fails_the_checkout() {
    let origin = tempfile::tempdir().unwrap();
    let _ = init_origin(origin.path());
    let cache_root = tempfile::tempdir().unwrap();
    let repo = origin.path().to_string_lossy().to_string();

    let mut cache = CheckoutCache::new(cache_root.path());
    let err = cache
        .get_checkout(&repo, "0000000000000000000000000000000000000000")
        .await
        .unwrap_err();
    assert!(matches!(err, swe_gym::CheckoutError::CheckoutFailed { .. }));
}
