//! Evaluation sessions: the orchestration layer around the core pipeline.
//!
//! A [`Harness`] owns the configuration, the Docker client, the checkout
//! cache, and a completion client, all passed in explicitly. One
//! [`Harness::evaluate`] call runs the bounded corrective-retry loop for a
//! task: ask the model for an edit, synthesize a patch, apply and test it
//! in a sandbox, and on any recoverable failure feed the error text back
//! into the next prompt. An applied patch whose required tests still fail
//! is accepted into the session's patch history and the loop continues,
//! so later turns build on the accumulated edits. Exhausting the budget
//! without ever applying a patch yields [`EvalOutcome::Invalid`], which is
//! distinct from a completed run whose tests failed; downstream scoring
//! treats the two differently.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use crate::checkout::CheckoutCache;
use crate::config::HarnessConfig;
use crate::dataset::Task;
use crate::error::{PatchError, SandboxError};
use crate::llm::{CompletionClient, Message};
use crate::patch::{self, Patch};
use crate::report::{self, TestOutcome, TestStatus};
use crate::sandbox::{self, DockerClient, Sandbox};
use crate::schema::EditProposal;

const SYSTEM_PROMPT: &str = "You are a software engineer fixing a reported issue. \
Reply with exactly one JSON object of the form \
{\"filename\": \"...\", \"old_code\": \"...\", \"new_code\": \"...\"}. \
Quote old_code exactly as it appears in the repository. Propose one change at a time; \
you will be able to make further changes in later turns. \
Do not include anything else in your response.";

/// Boundary record handed to fitness/observation collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct State {
    /// Path of the cached checkout the session works against.
    pub path: PathBuf,
    /// Issue text being fixed.
    pub issue: String,
    /// Timestamped log of what happened during the session.
    pub logs: Vec<String>,
    /// Accepted patches, in chronological order.
    pub patches: Vec<Patch>,
    /// Tests that demonstrate the fix.
    pub failing_tests: Vec<String>,
}

impl State {
    /// Creates session state for a task rooted at `path`.
    pub fn new(path: PathBuf, task: &Task) -> Self {
        Self {
            path,
            issue: task.issue.clone(),
            logs: Vec::new(),
            patches: Vec::new(),
            failing_tests: task.failing_tests.clone(),
        }
    }

    /// Appends a timestamped log line.
    pub fn log(&mut self, entry: impl AsRef<str>) {
        let line = format!("{} {}", Utc::now().to_rfc3339(), entry.as_ref());
        tracing::debug!(session_log = %line);
        self.logs.push(line);
    }
}

/// Terminal result of one evaluation cycle.
#[derive(Debug, Clone, Serialize)]
pub enum EvalOutcome {
    /// The retry budget was exhausted without an applicable patch. Scored
    /// as zero, not as a test failure.
    Invalid { attempts: u32, last_error: String },
    /// A patch applied and the suite ran; the outcome map says how it went.
    Completed(TestOutcome),
}

impl EvalOutcome {
    /// Fitness score in `[0, 1]`: pass rate for completed runs, zero for
    /// invalid ones.
    pub fn score(&self) -> f64 {
        match self {
            EvalOutcome::Invalid { .. } => 0.0,
            EvalOutcome::Completed(outcome) => outcome.pass_rate(),
        }
    }

    /// Returns true if every test named in `test_ids` passed.
    pub fn solves(&self, test_ids: &[String]) -> bool {
        match self {
            EvalOutcome::Invalid { .. } => false,
            EvalOutcome::Completed(outcome) => outcome.all_passing(test_ids),
        }
    }
}

/// One harness instance: explicit context, no global state.
pub struct Harness<C: CompletionClient> {
    config: HarnessConfig,
    docker: DockerClient,
    checkouts: CheckoutCache,
    client: C,
}

impl<C: CompletionClient> Harness<C> {
    /// Builds a harness from its collaborators.
    pub fn new(config: HarnessConfig, docker: DockerClient, client: C) -> Self {
        let checkouts = CheckoutCache::new(config.save_path.clone());
        Self {
            config,
            docker,
            checkouts,
            client,
        }
    }

    /// Access to the checkout cache (for callers that prepare checkouts
    /// up front or need the working-tree path).
    pub fn checkouts(&mut self) -> &mut CheckoutCache {
        &mut self.checkouts
    }

    /// Runs one evaluation cycle for `task`, returning the terminal
    /// outcome and the session state.
    ///
    /// Recoverable failures (unlocatable snippet, unresolvable filename,
    /// patch that does not apply) are fed back to the model and retried up
    /// to the configured budget. An applied patch is accepted into the
    /// patch history; if the task's required tests still fail and budget
    /// remains, the failing results are fed back and the next edit builds
    /// on the accumulated patches. Errors returned from this function are
    /// fatal for the evaluation call: checkout failures, sandbox
    /// provisioning failures, and malformed test reports.
    pub async fn evaluate(&mut self, task: &Task) -> anyhow::Result<(EvalOutcome, State)> {
        let checkout = self
            .checkouts
            .get_checkout(&task.repo, &task.commit)
            .await?;
        let mut state = State::new(checkout.clone(), task);

        let mut messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("Issue to fix:\n{}", task.issue)),
        ];

        let mut last_error = String::new();
        let mut last_completed: Option<TestOutcome> = None;
        for attempt in 0..self.config.max_retries {
            // Restore the pinned commit and re-apply accepted patches in
            // chronological order, so synthesis sees the accumulated base.
            self.checkouts.cleanup(&task.repo, &task.commit).await?;
            for prior in &state.patches {
                patch::apply_and_commit(&checkout, prior).await?;
            }

            let completion = match self.client.complete(&messages).await {
                Ok(text) => text,
                Err(e) => {
                    state.log(format!("attempt {attempt}: completion failed: {e}"));
                    last_error = e.to_string();
                    continue;
                }
            };
            messages.push(Message::assistant(completion.clone()));

            let edit = match EditProposal::from_completion(&completion) {
                Ok(edit) => edit,
                Err(e) => {
                    state.log(format!("attempt {attempt}: schema violation: {e}"));
                    last_error = e.to_string();
                    messages.push(corrective_message(&last_error));
                    continue;
                }
            };

            let candidate = match patch::synthesize(
                &checkout,
                &edit.filename,
                &edit.old_code,
                &edit.new_code,
                self.config.fuzzy_threshold,
            )
            .await
            {
                Ok(candidate) => candidate,
                Err(e @ (PatchError::FileNotFound(_)
                | PatchError::Locator(_)
                | PatchError::InvalidHeader { .. })) => {
                    state.log(format!("attempt {attempt}: synthesis rejected: {e}"));
                    last_error = e.to_string();
                    messages.push(corrective_message(&last_error));
                    continue;
                }
                Err(e @ PatchError::DiffFailed { .. }) => {
                    tracing::warn!(error = %e, "diff tool failed");
                    state.log(format!("attempt {attempt}: diff tool failed: {e}"));
                    last_error = e.to_string();
                    messages.push(corrective_message(&last_error));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.apply_and_test(task, &checkout, &state, &candidate).await {
                Ok(xml) => {
                    let outcome = report::parse_junit_xml(&xml)?;
                    state.patches.push(candidate);
                    state.log(format!("attempt {attempt}: patch accepted, suite executed"));
                    if outcome.all_passing(&task.failing_tests) {
                        return Ok((EvalOutcome::Completed(outcome), state));
                    }
                    // Keep the patch and let the next turn build on it.
                    let feedback = remaining_failures_feedback(&outcome, &task.failing_tests);
                    state.log(format!("attempt {attempt}: required tests still failing"));
                    last_error = feedback.clone();
                    messages.push(Message::user(feedback));
                    last_completed = Some(outcome);
                }
                Err(SandboxError::MalformedPatch { output }) => {
                    state.log(format!("attempt {attempt}: patch did not apply"));
                    last_error = format!("the patch did not apply: {output}");
                    messages.push(corrective_message(&last_error));
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        state.log("retry budget exhausted");
        Ok((
            final_outcome(last_completed, self.config.max_retries, last_error),
            state,
        ))
    }

    /// Applies accumulated patches plus the candidate inside a fresh
    /// sandbox, runs the suite, and returns the raw report. The sandbox is
    /// destroyed on every path.
    async fn apply_and_test(
        &self,
        task: &Task,
        checkout: &std::path::Path,
        state: &State,
        candidate: &Patch,
    ) -> Result<String, SandboxError> {
        let image = sandbox::ensure_image(
            &self.docker,
            &self.config.namespace,
            &task.repo,
            &task.commit,
            checkout,
        )
        .await?;
        let mut sb = Sandbox::from_image(&self.docker, &image, &self.config.namespace).await?;

        let result = async {
            for prior in &state.patches {
                sb.apply(prior).await?;
            }
            sb.apply(candidate).await?;
            sb.test(&self.config.test_command, &self.config.report_path)
                .await
        }
        .await;

        sb.destroy().await;
        result
    }
}

/// Terminal outcome once the retry budget is spent: the last completed
/// run when any patch applied, otherwise invalid.
fn final_outcome(
    last_completed: Option<TestOutcome>,
    attempts: u32,
    last_error: String,
) -> EvalOutcome {
    match last_completed {
        Some(outcome) => EvalOutcome::Completed(outcome),
        None => EvalOutcome::Invalid {
            attempts,
            last_error,
        },
    }
}

/// Feedback for a run whose required tests are still not passing, quoting
/// each test's status and failure text.
fn remaining_failures_feedback(outcome: &TestOutcome, required: &[String]) -> String {
    let mut lines = vec![
        "The patch applied and the test suite ran, but these required tests are still not passing:"
            .to_string(),
    ];
    for id in required {
        match outcome.get(id) {
            Some(result) if result.status == TestStatus::Passed => {}
            Some(result) => match &result.message {
                Some(message) => lines.push(format!("- {id}: {}: {message}", result.status)),
                None => lines.push(format!("- {id}: {}", result.status)),
            },
            None => lines.push(format!("- {id}: not found in the report")),
        }
    }
    lines.push(
        "Your previous change has been kept. Propose the next change as one JSON object \
         {\"filename\": \"...\", \"old_code\": \"...\", \"new_code\": \"...\"}."
            .to_string(),
    );
    lines.join("\n")
}

fn corrective_message(error: &str) -> Message {
    Message::user(format!(
        "That change could not be used: {error}\n\
         Reply again with one JSON object \
         {{\"filename\": \"...\", \"old_code\": \"...\", \"new_code\": \"...\"}}, \
         quoting old_code exactly as it appears in the file."
    ))
}
