//! swe-gym: run LLM-generated patches against real repositories.
//!
//! This library turns an issue description plus a pinned repository
//! checkout into a verdict: a model proposes a code edit, the edit is
//! located fuzzily in the working tree, rendered as a unified diff, applied
//! inside a disposable Docker sandbox, and scored against the repository's
//! own test suite.

// Core modules
pub mod checkout;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod locator;
pub mod patch;
pub mod report;
pub mod sandbox;
pub mod schema;
pub mod session;

// Re-export commonly used error types
pub use error::{
    CheckoutError, LlmError, LocatorError, PatchError, ReportError, SandboxError, SchemaError,
};
