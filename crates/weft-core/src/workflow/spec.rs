//! Step definitions.
//!
//! Steps are plain async closures with typed input and output. The builder
//! erases those types into handlers over [`ContextValue`] so the engine can
//! run heterogeneous steps through one pipeline:
//!
//! ```ignore
//! let analyze = StepSpec::new("analyze", |page: Option<Page>, _ctx| async move {
//!     let page = page.ok_or_else(|| StepError::validation("no page"))?;
//!     Ok(Analysis::of(&page))
//! })
//! .input_key("scraped_data")
//! .output_key("analysis_results")
//! .retry(RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(2)))
//! .compensate(|analysis: Analysis, _ctx| async move { discard(analysis).await })
//! .build();
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::{normalize_type_name, ContextValue, WorkflowContext};
use super::retry::RetryPolicy;
use crate::StepError;

/// Upper bound on a single attempt when neither the step nor the engine
/// configuration sets one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Boxed future returned by step and compensation handlers.
pub type StepFuture<T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send + 'static>>;

type StepHandler =
    Arc<dyn Fn(Option<ContextValue>, WorkflowContext) -> StepFuture<ContextValue> + Send + Sync>;

type CompensationFn = Arc<dyn Fn(ContextValue, WorkflowContext) -> StepFuture<()> + Send + Sync>;

type SkipFn = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

type ValidateFn = Arc<dyn Fn(Option<&ContextValue>) -> Result<(), String> + Send + Sync>;

type BeforeHook = Arc<dyn Fn(&WorkflowContext) + Send + Sync>;

type AfterHook = Arc<dyn Fn(&WorkflowContext, &ContextValue) + Send + Sync>;

type ErrorHook = Arc<dyn Fn(&WorkflowContext, &StepError) + Send + Sync>;

/// A single unit of workflow work with its policies.
#[derive(Clone)]
pub struct StepSpec {
    id: String,
    input_key: Option<String>,
    output_key: Option<String>,
    input_type: &'static str,
    output_type: &'static str,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    require_input: bool,
    handler: StepHandler,
    compensation: Option<CompensationFn>,
    skip: Option<SkipFn>,
    validator: Option<ValidateFn>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    on_error: Option<ErrorHook>,
}

impl StepSpec {
    /// Start building a step whose body receives the value stored under its
    /// input key (if one is declared and present).
    pub fn new<I, O, F, Fut>(id: impl Into<String>, f: F) -> StepBuilder<I, O>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(Option<I>, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, StepError>> + Send + 'static,
    {
        StepBuilder::new(id.into(), f)
    }

    /// Start building a step that reads nothing but the context.
    pub fn source<O, F, Fut>(id: impl Into<String>, f: F) -> StepBuilder<(), O>
    where
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, StepError>> + Send + 'static,
    {
        StepBuilder::new(id.into(), move |_: Option<()>, ctx| f(ctx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_key(&self) -> Option<&str> {
        self.input_key.as_deref()
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn output_type(&self) -> &'static str {
        self.output_type
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Declared per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-attempt timeout, falling back to `default` when none was declared.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }

    pub fn should_skip(&self, ctx: &WorkflowContext) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }

    /// Check the prepared input before any attempt is made.
    pub fn validate_input(&self, input: Option<&ContextValue>) -> Result<(), StepError> {
        match input {
            None if self.require_input => {
                return Err(StepError::validation(format!(
                    "step '{}' requires input at key '{}'",
                    self.id,
                    self.input_key.as_deref().unwrap_or("<undeclared>")
                )));
            }
            Some(value) if !value.matches_type(self.input_type) => {
                return Err(StepError::validation(format!(
                    "step '{}' expects input of type {}, found {}",
                    self.id,
                    normalize_type_name(self.input_type),
                    value.type_name()
                )));
            }
            _ => {}
        }

        if let Some(validator) = &self.validator {
            validator(input).map_err(StepError::validation)?;
        }
        Ok(())
    }

    /// Run the step body once.
    pub fn invoke(&self, input: Option<ContextValue>, ctx: WorkflowContext) -> StepFuture<ContextValue> {
        (self.handler)(input, ctx)
    }

    /// Run the compensation action against a previously produced output.
    /// Returns `None` when the step declares no compensation.
    pub fn compensate(
        &self,
        output: Option<ContextValue>,
        ctx: WorkflowContext,
    ) -> Option<StepFuture<()>> {
        let compensation = self.compensation.as_ref()?;
        let Some(output) = output else {
            let id = self.id.clone();
            return Some(Box::pin(async move {
                Err(StepError::fatal(format!(
                    "step '{}' has no recorded output to compensate",
                    id
                )))
            }));
        };
        Some(compensation(output, ctx))
    }

    pub fn run_before(&self, ctx: &WorkflowContext) {
        if let Some(hook) = &self.before {
            hook(ctx);
        }
    }

    pub fn run_after(&self, ctx: &WorkflowContext, output: &ContextValue) {
        if let Some(hook) = &self.after {
            hook(ctx, output);
        }
    }

    pub fn run_on_error(&self, ctx: &WorkflowContext, error: &StepError) {
        if let Some(hook) = &self.on_error {
            hook(ctx, error);
        }
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .field("has_compensation", &self.compensation.is_some())
            .finish()
    }
}

/// Fluent builder for [`StepSpec`], typed over the step's input and output.
pub struct StepBuilder<I, O> {
    spec: StepSpec,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> StepBuilder<I, O>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
{
    fn new<F, Fut>(id: String, f: F) -> Self
    where
        F: Fn(Option<I>, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, StepError>> + Send + 'static,
    {
        let step_id = id.clone();
        let f = Arc::new(f);
        let handler: StepHandler = Arc::new(move |input, ctx| {
            let decoded = input
                .map(|value| value.decode::<I>(&step_id))
                .transpose()
                .map_err(StepError::from);
            let f = f.clone();
            Box::pin(async move {
                let output = f(decoded?, ctx).await?;
                ContextValue::of(&output).map_err(|e| StepError::fatal(e.to_string()))
            })
        });

        Self {
            spec: StepSpec {
                id,
                input_key: None,
                output_key: None,
                input_type: std::any::type_name::<I>(),
                output_type: std::any::type_name::<O>(),
                retry_policy: RetryPolicy::none(),
                timeout: None,
                require_input: false,
                handler,
                compensation: None,
                skip: None,
                validator: None,
                before: None,
                after: None,
                on_error: None,
            },
            _marker: PhantomData,
        }
    }

    /// Context key the step reads its input from.
    pub fn input_key(mut self, key: impl Into<String>) -> Self {
        self.spec.input_key = Some(key.into());
        self
    }

    /// Context key the step's output is merged into.
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.spec.output_key = Some(key.into());
        self
    }

    /// Fail validation when no input is present.
    pub fn require_input(mut self) -> Self {
        self.spec.require_input = true;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.spec.retry_policy = policy;
        self
    }

    /// Bound each attempt's wall time.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.spec.timeout = Some(duration);
        self
    }

    /// Skip the step when the predicate holds for the current context.
    pub fn skip_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.spec.skip = Some(Arc::new(predicate));
        self
    }

    /// Input precondition, checked once before the first attempt.
    pub fn validate<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&I>) -> Result<(), String> + Send + Sync + 'static,
    {
        let step_id = self.spec.id.clone();
        self.spec.validator = Some(Arc::new(move |input| {
            let decoded = input
                .map(|value| value.decode::<I>(&step_id))
                .transpose()
                .map_err(|e| e.to_string())?;
            check(decoded.as_ref())
        }));
        self
    }

    /// Inverse operation run with this step's output when a later step fails.
    pub fn compensate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(O, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        let step_id = self.spec.id.clone();
        let f = Arc::new(f);
        self.spec.compensation = Some(Arc::new(move |output, ctx| {
            let decoded = output.decode::<O>(&step_id);
            let f = f.clone();
            Box::pin(async move {
                let output = decoded.map_err(|e| StepError::fatal(e.to_string()))?;
                f(output, ctx).await
            })
        }));
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkflowContext) + Send + Sync + 'static,
    {
        self.spec.before = Some(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkflowContext, &ContextValue) + Send + Sync + 'static,
    {
        self.spec.after = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkflowContext, &StepError) + Send + Sync + 'static,
    {
        self.spec.on_error = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> StepSpec {
        self.spec
    }
}

impl<I, O> From<StepBuilder<I, O>> for StepSpec
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
{
    fn from(builder: StepBuilder<I, O>) -> Self {
        builder.build()
    }
}
