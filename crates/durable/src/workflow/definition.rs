//! Workflow definitions
//!
//! A definition is an ordered list of steps, each either a single activity
//! call or a parallel group of activity calls. Definitions are built once,
//! registered by name and shared immutably by every instance created from
//! them.
//!
//! # Determinism
//!
//! Step inputs and the final result are computed by mapper closures that see
//! only the workflow input and the outputs of earlier steps. Mappers must not
//! read clocks, randomness or any other ambient state; anything of that kind
//! belongs inside an activity, whose output is recorded in history.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::{ActivityOptions, WorkflowError};
use crate::reliability::RetryPolicy;

/// Read-only view handed to input and result mappers
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    input: &'a Value,
    outputs: &'a HashMap<String, Value>,
}

impl<'a> StepContext<'a> {
    pub fn new(input: &'a Value, outputs: &'a HashMap<String, Value>) -> Self {
        Self { input, outputs }
    }

    /// The workflow input
    pub fn input(&self) -> &'a Value {
        self.input
    }

    /// Output of an earlier step, if it has completed
    pub fn output(&self, step_id: &str) -> Option<&'a Value> {
        self.outputs.get(step_id)
    }

    /// Output of an earlier step the caller depends on
    pub fn require_output(&self, step_id: &str) -> Result<&'a Value, WorkflowError> {
        self.output(step_id).ok_or_else(|| {
            WorkflowError::validation(format!("output of step '{step_id}' is not available"))
        })
    }
}

/// Computes a step's input from the workflow input and prior outputs
pub type InputMapper = Arc<dyn Fn(&StepContext<'_>) -> Result<Value, WorkflowError> + Send + Sync>;

/// Computes the workflow result once every step has completed
pub type ResultMapper = Arc<dyn Fn(&StepContext<'_>) -> Result<Value, WorkflowError> + Send + Sync>;

/// Extra input check run at submission time
pub type InputValidator = Arc<dyn Fn(&Value) -> Result<(), ValidationError> + Send + Sync>;

/// Caller input rejected before any instance exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,

    /// Required fields that are absent or null
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            missing_fields: Vec::new(),
        }
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        Self {
            message: format!("missing required field(s): {}", fields.join(", ")),
            missing_fields: fields,
        }
    }
}

/// Errors raised while building a definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow '{0}' has no steps")]
    Empty(String),

    #[error("step id '{0}' is used more than once")]
    DuplicateStepId(String),

    #[error("parallel group at position {0} has no members")]
    EmptyParallelGroup(usize),
}

/// One activity call within a definition
#[derive(Clone)]
pub struct ActivityStep {
    /// Unique identity of the step within its definition
    pub step_id: String,

    /// Registered activity name
    pub activity: String,

    /// Retry policy and per-attempt timeout
    pub options: ActivityOptions,

    input: InputMapper,
}

impl ActivityStep {
    /// Create a step that passes the workflow input through unchanged
    pub fn new(step_id: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            activity: activity.into(),
            options: ActivityOptions::default(),
            input: Arc::new(|ctx: &StepContext<'_>| Ok(ctx.input().clone())),
        }
    }

    /// Compute the step input with a deterministic mapper
    pub fn with_input<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    {
        self.input = Arc::new(mapper);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.start_to_close_timeout = Some(timeout);
        self
    }

    pub fn compute_input(&self, ctx: &StepContext<'_>) -> Result<Value, WorkflowError> {
        (self.input)(ctx).map_err(|e| e.at_step(self.step_id.clone()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.options.effective_retry_policy()
    }
}

impl fmt::Debug for ActivityStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityStep")
            .field("step_id", &self.step_id)
            .field("activity", &self.activity)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A position in the definition's step list
#[derive(Debug, Clone)]
pub enum StepSpec {
    Activity(ActivityStep),
    Parallel(Vec<ActivityStep>),
}

impl StepSpec {
    /// Activity steps at this position, in specification order
    pub fn members(&self) -> &[ActivityStep] {
        match self {
            Self::Activity(step) => std::slice::from_ref(step),
            Self::Parallel(steps) => steps,
        }
    }
}

/// An immutable, named workflow definition
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<StepSpec>,
    required_fields: Vec<String>,
    validators: Vec<InputValidator>,
    result: Option<ResultMapper>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            required_fields: Vec::new(),
            validators: Vec::new(),
            result: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Find an activity step by id, wherever it sits
    pub fn find_step(&self, step_id: &str) -> Option<&ActivityStep> {
        self.steps
            .iter()
            .flat_map(StepSpec::members)
            .find(|step| step.step_id == step_id)
    }

    /// Check caller input before an instance is created
    ///
    /// The input must be a JSON object; every required field must be present
    /// and non-null. Custom validators run only once the required fields pass.
    pub fn validate_input(&self, input: &Value) -> Result<(), ValidationError> {
        let Some(object) = input.as_object() else {
            return Err(ValidationError::new("workflow input must be a JSON object"));
        };

        let missing: Vec<String> = self
            .required_fields
            .iter()
            .filter(|field| object.get(field.as_str()).map_or(true, Value::is_null))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::missing_fields(missing));
        }

        for validator in &self.validators {
            validator(input)?;
        }
        Ok(())
    }

    /// Aggregate the final result once every step has completed
    ///
    /// Without a result mapper, the result is an object keyed by step id.
    pub fn compute_result(
        &self,
        input: &Value,
        outputs: &HashMap<String, Value>,
    ) -> Result<Value, WorkflowError> {
        let ctx = StepContext::new(input, outputs);
        match &self.result {
            Some(mapper) => mapper(&ctx),
            None => {
                let mut result = serde_json::Map::new();
                for step in self.steps.iter().flat_map(StepSpec::members) {
                    let output = ctx.require_output(&step.step_id)?;
                    result.insert(step.step_id.clone(), output.clone());
                }
                Ok(Value::Object(result))
            }
        }
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("required_fields", &self.required_fields)
            .finish_non_exhaustive()
    }
}

/// Builder for [`WorkflowDefinition`]
///
/// # Example
///
/// ```
/// use orchestra_durable::workflow::{ActivityStep, WorkflowDefinition};
///
/// let definition = WorkflowDefinition::builder("greet")
///     .require_fields(["name"])
///     .step(ActivityStep::new("lookup", "lookup_user"))
///     .parallel([
///         ActivityStep::new("email", "send_email"),
///         ActivityStep::new("sms", "send_sms"),
///     ])
///     .build()
///     .unwrap();
///
/// assert_eq!(definition.steps().len(), 2);
/// ```
pub struct WorkflowDefinitionBuilder {
    name: String,
    steps: Vec<StepSpec>,
    required_fields: Vec<String>,
    validators: Vec<InputValidator>,
    result: Option<ResultMapper>,
}

impl WorkflowDefinitionBuilder {
    pub fn step(mut self, step: ActivityStep) -> Self {
        self.steps.push(StepSpec::Activity(step));
        self
    }

    pub fn parallel(mut self, steps: impl IntoIterator<Item = ActivityStep>) -> Self {
        self.steps.push(StepSpec::Parallel(steps.into_iter().collect()));
        self
    }

    pub fn require_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn result<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    {
        self.result = Some(Arc::new(mapper));
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty(self.name));
        }

        let mut seen = HashSet::new();
        for (position, spec) in self.steps.iter().enumerate() {
            if spec.members().is_empty() {
                return Err(DefinitionError::EmptyParallelGroup(position));
            }
            for step in spec.members() {
                if !seen.insert(step.step_id.as_str()) {
                    return Err(DefinitionError::DuplicateStepId(step.step_id.clone()));
                }
            }
        }

        Ok(WorkflowDefinition {
            name: self.name,
            steps: self.steps,
            required_fields: self.required_fields,
            validators: self.validators,
            result: self.result,
        })
    }
}
