//! Workflow execution

use super::step::WorkflowStep;
use crate::compose::Composition;
use crate::error::{Result, SigilError};
use std::time::Instant;

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No step executed yet
    Pending,
    /// Executing steps
    Running,
    /// Every step succeeded
    Completed,
    /// A step failed; remaining steps were skipped
    Failed,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Pending => write!(f, "pending"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Completed => write!(f, "completed"),
            RunnerState::Failed => write!(f, "failed"),
        }
    }
}

/// Executes the steps of one workflow in order
#[derive(Debug)]
pub struct WorkflowRunner {
    /// Workflow name
    name: String,
    /// Steps to execute
    steps: Vec<WorkflowStep>,
    /// Index of the next step
    cursor: usize,
    /// Current state
    state: RunnerState,
}

/// Outcome of a full workflow run, teardown included
#[derive(Debug)]
pub struct RunReport {
    /// Workflow name
    pub workflow: String,
    /// Number of steps that succeeded
    pub steps_completed: usize,
    /// Number of steps in the workflow
    pub total_steps: usize,
    /// Final runner state
    pub state: RunnerState,
    /// First fatal error, if any
    pub result: Result<()>,
    /// Failures while shutting down remaining instances
    pub teardown_errors: Vec<SigilError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok() && self.teardown_errors.is_empty()
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl WorkflowRunner {
    /// Create a new runner
    pub fn new(name: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.to_string(),
            steps,
            cursor: 0,
            state: RunnerState::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Index of the next step to execute
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Execute every step in order, halting on the first failure
    pub async fn run(&mut self, composition: &Composition) -> Result<()> {
        if self.state != RunnerState::Pending {
            return Err(SigilError::Runtime(format!(
                "workflow {} already {}",
                self.name, self.state
            )));
        }

        self.state = RunnerState::Running;
        tracing::info!("Running workflow {} ({} steps)", self.name, self.steps.len());

        while let Some(step) = self.steps.get(self.cursor) {
            let started = Instant::now();
            tracing::info!("Step {}/{}: {}", self.cursor + 1, self.steps.len(), step);

            if let Err(e) = execute_step(composition, step).await {
                tracing::error!("Step {} failed: {}", self.cursor + 1, e);
                self.state = RunnerState::Failed;
                return Err(e);
            }

            tracing::debug!("Step {} took {}ms", self.cursor + 1, started.elapsed().as_millis());
            self.cursor += 1;
        }

        self.state = RunnerState::Completed;
        tracing::info!("Workflow {} completed", self.name);
        Ok(())
    }

    /// Run the workflow, then shut down whatever is still running
    pub async fn execute(mut self, composition: Composition) -> RunReport {
        let result = self.run(&composition).await;
        let teardown_errors = composition.down().await;
        self.into_report(result, teardown_errors)
    }

    /// Summarize a finished or interrupted run
    pub fn into_report(self, result: Result<()>, teardown_errors: Vec<SigilError>) -> RunReport {
        let state = match (&result, self.state) {
            (Err(_), RunnerState::Pending | RunnerState::Running) => RunnerState::Failed,
            (_, state) => state,
        };

        RunReport {
            workflow: self.name,
            steps_completed: self.cursor,
            total_steps: self.steps.len(),
            state,
            result,
            teardown_errors,
        }
    }
}

async fn execute_step(composition: &Composition, step: &WorkflowStep) -> Result<()> {
    match step {
        WorkflowStep::StartAndWait(names) => composition.start_and_wait(names).await.map(|_| ()),
        WorkflowStep::Up(name) => composition.up(name).await.map(|_| ()),
        WorkflowStep::WaitForReady(name) => composition.wait_for_ready(name).await.map(|_| ()),
        WorkflowStep::RunTask { target, args } => composition.run(target, args).await,
        WorkflowStep::Remove {
            services,
            destroy_volumes,
        } => composition.rm(services, *destroy_volumes).await,
    }
}
