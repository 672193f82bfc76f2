//! Disposable sandbox executor.
//!
//! One [`Sandbox`] per patch-application-and-test cycle. The lifecycle is a
//! small state machine:
//!
//! ```text
//! CREATED -> PATCHED -> TESTED -> DESTROYED
//! CREATED -> PATCH_FAILED -> DESTROYED
//! ```
//!
//! The destroy step runs on every exit path: [`run`] is structured as a
//! scoped acquisition with guaranteed release, and `Drop` keeps a
//! best-effort fallback for panics and early returns in embedding code.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use crate::config::GIT_APPLY_PATCH;
use crate::error::SandboxError;
use crate::patch::Patch;
use crate::sandbox::docker::{single_file_tar, ContainerConfig, DockerClient};

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Patched,
    PatchFailed,
    Tested,
    Destroyed,
}

/// An ephemeral, isolated container bound to a throwaway copy of a
/// codebase. Never shared between logical test runs.
pub struct Sandbox {
    client: DockerClient,
    container_name: String,
    container_id: String,
    state: SandboxState,
    /// Host-side scratch copy of the codebase; deleted on destroy. `None`
    /// when the sandbox runs from a prepared base image.
    temp_dir: Option<TempDir>,
    destroyed: bool,
}

impl Sandbox {
    /// Provisions a sandbox from a plain working copy: the snapshot is
    /// copied into a temp directory which is bind-mounted at `/repo`, so
    /// the original checkout is never touched.
    pub async fn from_snapshot(
        client: &DockerClient,
        image: &str,
        snapshot: &Path,
        namespace: &str,
    ) -> Result<Self, SandboxError> {
        let temp_dir = TempDir::with_prefix(format!("{namespace}-"))?;
        copy_tree(snapshot, temp_dir.path())?;

        let container_name = format!("{}-{}", namespace, Uuid::new_v4());
        let bind = format!("{}:/repo:rw", temp_dir.path().display());
        let config = ContainerConfig::new(&container_name, image)
            .with_cmd(vec!["sleep".to_string(), "infinity".to_string()])
            .with_working_dir("/repo")
            .with_binds(vec![bind]);

        let container_id = client.start_container(&config).await?;
        tracing::debug!(
            container = %container_name,
            mount = %temp_dir.path().display(),
            "sandbox provisioned from snapshot"
        );

        Ok(Self {
            client: client.clone(),
            container_name,
            container_id,
            state: SandboxState::Created,
            temp_dir: Some(temp_dir),
            destroyed: false,
        })
    }

    /// Provisions a sandbox from a prepared base image that already holds
    /// the repository at `/repo`.
    pub async fn from_image(
        client: &DockerClient,
        image_tag: &str,
        namespace: &str,
    ) -> Result<Self, SandboxError> {
        let container_name = format!("{}-{}", namespace, Uuid::new_v4());
        let config = ContainerConfig::new(&container_name, image_tag)
            .with_cmd(vec!["sleep".to_string(), "infinity".to_string()])
            .with_working_dir("/repo");

        let container_id = client.start_container(&config).await?;
        tracing::debug!(container = %container_name, image = image_tag, "sandbox provisioned from image");

        Ok(Self {
            client: client.clone(),
            container_name,
            container_id,
            state: SandboxState::Created,
            temp_dir: None,
            destroyed: false,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// The container name (useful for logging).
    pub fn name(&self) -> &str {
        &self.container_name
    }

    /// Transfers the patch into the container and applies it with lenient
    /// whitespace handling.
    ///
    /// # Errors
    ///
    /// [`SandboxError::MalformedPatch`] when `git apply` exits non-zero;
    /// the error carries the tool's raw output for the retry prompt.
    pub async fn apply(&mut self, patch: &Patch) -> Result<(), SandboxError> {
        // Multiple applies are allowed before testing (patch accumulation);
        // applying after a test or a failed patch is not.
        debug_assert!(matches!(
            self.state,
            SandboxState::Created | SandboxState::Patched
        ));

        let archive = single_file_tar("file.patch", patch.as_str())?;
        self.client
            .upload_tar(&self.container_id, "/repo", archive)
            .await?;

        let result = self
            .client
            .exec_shell(&self.container_id, "/repo", GIT_APPLY_PATCH)
            .await?;

        if !result.success() {
            self.state = SandboxState::PatchFailed;
            let output = result.combined();
            tracing::info!(container = %self.container_name, output = %output, "patch failed to apply");
            return Err(SandboxError::MalformedPatch { output });
        }

        self.state = SandboxState::Patched;
        tracing::debug!(container = %self.container_name, "patch applied");
        Ok(())
    }

    /// Runs the test command and reads the report file back out of the
    /// container. A failing test suite is a valid, scoreable outcome, not
    /// an error; only a missing report is.
    pub async fn test(
        &mut self,
        command: &str,
        report_path: &str,
    ) -> Result<String, SandboxError> {
        let test_result = self
            .client
            .exec_shell(&self.container_id, "/repo", command)
            .await?;
        tracing::debug!(
            container = %self.container_name,
            exit_code = test_result.exit_code,
            "test command finished"
        );

        let cat = self
            .client
            .exec_shell(&self.container_id, "/repo", &format!("cat '{report_path}'"))
            .await?;
        if !cat.success() {
            return Err(SandboxError::ReportUnavailable {
                path: report_path.to_string(),
                message: cat.combined(),
            });
        }

        self.state = SandboxState::Tested;
        Ok(cat.stdout)
    }

    /// Stops and removes the container and deletes the host-side temp
    /// storage. Safe to call once; `run` calls it on every path.
    pub async fn destroy(mut self) {
        self.destroy_inner().await;
    }

    async fn destroy_inner(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(e) = self.client.remove_container(&self.container_id).await {
            tracing::warn!(container = %self.container_name, error = %e, "failed to remove container");
        }
        if let Some(temp_dir) = self.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            if let Err(e) = temp_dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete temp dir");
            }
        }
        self.state = SandboxState::Destroyed;
        tracing::debug!(container = %self.container_name, "sandbox destroyed");
    }
}

/// Best-effort cleanup for sandboxes that were not destroyed explicitly.
/// Removal goes through the stored daemon client, so it works even on
/// hosts without a `docker` binary on the path.
impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        tracing::warn!(
            container = %self.container_name,
            "sandbox dropped without destroy; removing container in the background"
        );
        let client = self.client.clone();
        let id = self.container_id.clone();
        let name = self.container_name.clone();
        let cleanup = async move {
            if let Err(e) = client.remove_container(&id).await {
                tracing::warn!(container = %name, error = %e, "background container removal failed");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup);
            }
            Err(_) => {
                std::thread::spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(cleanup),
                        Err(e) => {
                            tracing::warn!(error = %e, "could not build runtime for container cleanup")
                        }
                    }
                });
            }
        }
    }
}

/// Applies a patch to a throwaway copy of `snapshot` and runs the test
/// command, returning the raw report contents. The sandbox is destroyed
/// unconditionally, whatever the outcome.
pub async fn run(
    client: &DockerClient,
    image: &str,
    snapshot: &Path,
    patch: &Patch,
    command: &str,
    report_path: &str,
    namespace: &str,
) -> Result<String, SandboxError> {
    let mut sandbox = Sandbox::from_snapshot(client, image, snapshot, namespace).await?;

    let result = match sandbox.apply(patch).await {
        Ok(()) => sandbox.test(command, report_path).await,
        Err(e) => Err(e),
    };

    sandbox.destroy().await;
    result
}

/// Recursively copies a directory tree, including the `.git` directory the
/// in-container `git apply` needs.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target: PathBuf = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
        // Symlinks are skipped: the scratch copy only needs regular files
        // for patching and test execution.
    }
    Ok(())
}
