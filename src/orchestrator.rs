//! Bounded plan → search → integrate → validate loop
//!
//! [`ResponseOrchestrator::generate`] turns one email body into one reply.
//! Every pass feeds the previous plan, findings and candidate reply back into
//! the planner, so a rejected draft seeds its own correction. The loop stops
//! on the first accepted candidate or after [`MAX_ITERATIONS`] passes; in the
//! latter case the last candidate is returned anyway.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, debug, info_span, warn};

use crate::errors::{AppError, AppResult};

/// Upper bound on plan/act/integrate/validate passes per message
pub const MAX_ITERATIONS: u32 = 3;

/// Immutable input for one orchestration run (the email body)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task(String);

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Planner output; opaque to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan(pub String);

/// Result of executing a plan against the search tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Findings {
    /// Query actually sent to the search backend
    pub query: String,
    /// Where the content came from
    pub source: String,
    /// Extracted text, already truncated
    pub content: String,
}

/// State threaded through one run
///
/// Created empty by [`IterationState::new`], mutated in place by each step,
/// dropped when `generate` returns.
#[derive(Debug, Clone, Default)]
pub struct IterationState {
    pub plan: Option<Plan>,
    pub findings: Option<Findings>,
    pub candidate_response: Option<String>,
    pub iteration_count: u32,
    pub accepted: bool,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another pass is allowed
    pub fn should_continue(&self) -> bool {
        !self.accepted && self.iteration_count < MAX_ITERATIONS
    }
}

/// Produces or revises a plan
#[async_trait]
pub trait Planner: Send + Sync {
    /// `previous_plan`, `previous_findings` and `feedback` are all `None` on
    /// the first pass; afterwards `feedback` is the prior candidate reply.
    async fn plan(
        &self,
        task: &Task,
        previous_plan: Option<&Plan>,
        previous_findings: Option<&Findings>,
        feedback: Option<&str>,
    ) -> AppResult<Plan>;
}

/// Runs a plan against an information source
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, plan: &Plan, query: &Task) -> AppResult<Findings>;
}

/// Writes a candidate reply from plan and findings
#[async_trait]
pub trait Integrator: Send + Sync {
    async fn integrate(&self, task: &Task, plan: &Plan, findings: &Findings) -> AppResult<String>;
}

/// Judges whether a candidate reply answers the task
#[async_trait]
pub trait Validator: Send + Sync {
    async fn accepts(&self, candidate: &str, task: &Task) -> AppResult<bool>;
}

/// Drives the four collaborators to a reply
#[derive(Clone)]
pub struct ResponseOrchestrator {
    planner: Arc<dyn Planner>,
    tool: Arc<dyn ToolInvoker>,
    integrator: Arc<dyn Integrator>,
    validator: Arc<dyn Validator>,
}

impl ResponseOrchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        tool: Arc<dyn ToolInvoker>,
        integrator: Arc<dyn Integrator>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            planner,
            tool,
            integrator,
            validator,
        }
    }

    /// Generate a reply for `task`
    ///
    /// Returns the accepted candidate, or the last candidate once the
    /// iteration budget is spent. Rejection is never an error.
    ///
    /// # Errors
    ///
    /// - `Orchestration` if any collaborator fails; the run is abandoned
    pub async fn generate(&self, task: &Task) -> AppResult<String> {
        let mut state = IterationState::new();
        while state.should_continue() {
            let span = info_span!("iteration", n = state.iteration_count + 1);
            self.run_iteration(task, &mut state).instrument(span).await?;
        }

        if !state.accepted {
            warn!(
                iterations = state.iteration_count,
                "iteration budget exhausted without acceptance; replying with last candidate"
            );
        }

        state.candidate_response.ok_or_else(|| {
            AppError::orchestration("no candidate response was produced")
        })
    }

    /// One full pass over the four steps
    pub async fn run_iteration(&self, task: &Task, state: &mut IterationState) -> AppResult<()> {
        state.iteration_count += 1;
        self.plan_step(task, state).await?;
        self.invoke_step(task, state).await?;
        self.integrate_step(task, state).await?;
        self.validate_step(task, state).await
    }

    async fn plan_step(&self, task: &Task, state: &mut IterationState) -> AppResult<()> {
        let plan = self
            .planner
            .plan(
                task,
                state.plan.as_ref(),
                state.findings.as_ref(),
                state.candidate_response.as_deref(),
            )
            .await
            .map_err(|e| e.into_orchestration())?;
        state.plan = Some(plan);
        Ok(())
    }

    async fn invoke_step(&self, task: &Task, state: &mut IterationState) -> AppResult<()> {
        let plan = require(state.plan.as_ref(), "plan")?;
        let findings = self
            .tool
            .invoke(plan, task)
            .await
            .map_err(|e| e.into_orchestration())?;
        debug!(query = %findings.query, source = %findings.source, "findings gathered");
        state.findings = Some(findings);
        Ok(())
    }

    async fn integrate_step(&self, task: &Task, state: &mut IterationState) -> AppResult<()> {
        let plan = require(state.plan.as_ref(), "plan")?;
        let findings = require(state.findings.as_ref(), "findings")?;
        let candidate = self
            .integrator
            .integrate(task, plan, findings)
            .await
            .map_err(|e| e.into_orchestration())?;
        state.candidate_response = Some(candidate);
        Ok(())
    }

    async fn validate_step(&self, task: &Task, state: &mut IterationState) -> AppResult<()> {
        let candidate = require(state.candidate_response.as_deref(), "candidate response")?;
        let accepted = self
            .validator
            .accepts(candidate, task)
            .await
            .map_err(|e| e.into_orchestration())?;
        debug!(accepted, "validator verdict");
        state.accepted = accepted;
        Ok(())
    }
}

fn require<'a, T: ?Sized>(value: Option<&'a T>, what: &str) -> AppResult<&'a T> {
    value.ok_or_else(|| AppError::orchestration(format!("{what} missing from state")))
}
