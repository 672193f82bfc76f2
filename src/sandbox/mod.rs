//! Sandboxed patch application and test execution.
//!
//! Every patch-and-test cycle gets its own disposable container bound to a
//! throwaway copy of the codebase; the original checkout is never mutated.
//! Containers and temp storage are destroyed unconditionally at the end of
//! the cycle, success or failure.

mod docker;
mod executor;
mod image;

pub use docker::{ContainerConfig, DockerClient, ExecResult};
pub use executor::{run, Sandbox, SandboxState};
pub use image::{dockerfile_for, ensure_image, image_tag};
