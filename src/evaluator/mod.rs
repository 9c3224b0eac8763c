//! Outcome evaluation.
//!
//! An [`Evaluator`] takes the agent's output, applies the held-out tests
//! inside the workspace, and produces the terminal [`EvalResult`] for the
//! instance. Selected from a static registration table keyed by name.

pub mod swe;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::model::{AgentOutput, EvalInstance, EvalResult, ExecutionMode};
use crate::workspace::Workspace;

pub use swe::SweEvaluator;

/// Evaluation strategy.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Registered evaluator name.
    fn name(&self) -> &str;

    /// Evaluates an agent's output against the instance's held-out tests.
    ///
    /// Never fails: every infrastructure problem is folded into the returned
    /// result's status and message.
    async fn evaluate(
        &self,
        instance: &EvalInstance,
        agent_output: &AgentOutput,
        mode: ExecutionMode,
        workspace: &dyn Workspace,
    ) -> EvalResult;
}

type EvaluatorCtor = fn(Duration) -> Box<dyn Evaluator>;

/// Static registration table: name to constructor.
static EVALUATORS: &[(&str, EvaluatorCtor)] =
    &[("swe", |timeout| Box::new(SweEvaluator::new(timeout)))];

/// Instantiates the evaluator registered under `name`.
pub fn create_evaluator(
    name: &str,
    test_timeout: Duration,
) -> Result<Box<dyn Evaluator>, ConfigError> {
    EVALUATORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ctor)| ctor(test_timeout))
        .ok_or_else(|| ConfigError::UnknownEvaluator(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let evaluator = create_evaluator("swe", Duration::from_secs(60)).unwrap();
        assert_eq!(evaluator.name(), "swe");

        assert!(matches!(
            create_evaluator("nope", Duration::from_secs(60)),
            Err(ConfigError::UnknownEvaluator(_))
        ));
    }
}
