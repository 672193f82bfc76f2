//! Docker API wrapper using the bollard crate.
//!
//! A thin, typed layer over container lifecycle operations: create, start,
//! exec, archive upload, image build, stop, remove. All calls block until
//! the daemon acknowledges them.

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;

use crate::error::SandboxError;

/// Configuration for creating a new container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Unique name for the container.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// Command to run in the container; `None` uses the image default.
    pub cmd: Option<Vec<String>>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Bind mounts in `host:container:mode` format.
    pub binds: Vec<String>,
}

impl ContainerConfig {
    /// Creates a container configuration for the given name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: None,
            working_dir: None,
            binds: Vec::new(),
        }
    }

    /// Sets the command to run.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds bind mounts.
    pub fn with_binds(mut self, binds: Vec<String>) -> Self {
        self.binds = binds;
        self
    }
}

/// Result of executing a command in a container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecResult {
    /// Combined stdout and stderr, for diagnostics that quote raw tool
    /// output verbatim.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Returns true if the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Docker client wrapper for container operations.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the local Docker daemon and verifies it responds.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::DaemonUnavailable`] when the daemon cannot
    /// be reached. This is fatal for the harness: no evaluation is possible
    /// without the sandbox.
    pub async fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::DaemonUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wraps an existing bollard handle (used by tests and embedders).
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Creates and starts a container, returning its id.
    pub async fn start_container(&self, config: &ContainerConfig) -> Result<String, SandboxError> {
        let host_config = HostConfig {
            binds: if config.binds.is_empty() {
                None
            } else {
                Some(config.binds.clone())
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            working_dir: config.working_dir.clone(),
            host_config: Some(host_config),
            tty: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| SandboxError::ProvisionFailed(format!("create container: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // The container exists on the daemon but no Sandbox owns it
            // yet, so it must be reaped here or it leaks.
            if let Err(remove_err) = self.remove_container(&created.id).await {
                tracing::warn!(
                    container = %created.id,
                    error = %remove_err,
                    "failed to remove container after start failure"
                );
            }
            return Err(SandboxError::ProvisionFailed(format!(
                "start container: {e}"
            )));
        }

        Ok(created.id)
    }

    /// Executes a shell command inside a running container.
    pub async fn exec_shell(
        &self,
        container_id: &str,
        workdir: &str,
        cmd: &str,
    ) -> Result<ExecResult, SandboxError> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec!["/bin/sh", "-c", cmd]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bollard::container::LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(SandboxError::ExecFailed(format!("read output: {e}")));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("inspect exec: {e}")))?;

        Ok(ExecResult {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// Uploads a tar archive into the container at `path`.
    pub async fn upload_tar(
        &self,
        container_id: &str,
        path: &str,
        tar_bytes: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let options = UploadToContainerOptions {
            path,
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), tar_bytes.into())
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("upload archive: {e}")))?;
        Ok(())
    }

    /// Stops (best effort) and removes a container.
    pub async fn remove_container(&self, container_id: &str) -> Result<(), SandboxError> {
        if let Err(e) = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            tracing::debug!(container = container_id, error = %e, "stop before remove failed");
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("remove container: {e}")))?;
        Ok(())
    }

    /// Builds an image from an in-memory Dockerfile.
    pub async fn build_image(&self, tag: &str, dockerfile: &str) -> Result<(), SandboxError> {
        let context = build_context_tar(dockerfile).map_err(SandboxError::Io)?;

        let options = BuildImageOptions {
            t: tag,
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(step) = stream.next().await {
            let info = step.map_err(|e| SandboxError::ImageBuildFailed {
                tag: tag.to_string(),
                message: e.to_string(),
            })?;
            if let Some(err) = info.error {
                return Err(SandboxError::ImageBuildFailed {
                    tag: tag.to_string(),
                    message: err,
                });
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(tag = tag, "{line}");
                }
            }
        }
        Ok(())
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, tag: &str) -> bool {
        self.docker.inspect_image(tag).await.is_ok()
    }
}

/// Packs a single in-memory file into a tar archive.
pub fn single_file_tar(name: &str, content: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, content.as_bytes())?;
    builder.into_inner()
}

/// Builds a gzipped tar context holding just a Dockerfile.
fn build_context_tar(dockerfile: &str) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let tar_bytes = single_file_tar("Dockerfile", dockerfile)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes)?;
    encoder.finish()
}
