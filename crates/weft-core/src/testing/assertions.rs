//! Assertion macros for weft tests.

use crate::error::WeftError;
use crate::workflow::{StepStatus, WorkflowInstance};

/// Assert that a result is Ok.
///
/// ```ignore
/// assert_ok!(definition_result);
/// assert_ok!(definition_result, "pipeline should build");
/// ```
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: {}: expected Ok, got Err({:?})", format_args!($($arg)+), e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match &$expr {
            Err(_) => (),
            Ok(v) => panic!("assertion failed: expected Err, got Ok({:?})", v),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Err(_) => (),
            Ok(v) => panic!("assertion failed: {}: expected Err, got Ok({:?})", format_args!($($arg)+), v),
        }
    };
}

/// Assert that an error matches a specific variant.
///
/// ```ignore
/// assert_err_variant!(builder.build(), WeftError::CyclicDependency { .. });
/// ```
#[macro_export]
macro_rules! assert_err_variant {
    ($expr:expr, $variant:pat) => {
        match &$expr {
            Err($variant) => (),
            Err(e) => panic!(
                "assertion failed: expected {}, got {:?}",
                stringify!($variant),
                e
            ),
            Ok(v) => panic!(
                "assertion failed: expected Err({}), got Ok({:?})",
                stringify!($variant),
                v
            ),
        }
    };
}

/// Check if an error message contains a substring.
pub fn error_contains(error: &WeftError, substring: &str) -> bool {
    error.to_string().contains(substring)
}

/// Assert that `step_id` was recorded on the instance with `status`.
pub fn assert_step_status(instance: &WorkflowInstance, step_id: &str, status: StepStatus) {
    match instance.execution(step_id) {
        Some(execution) => assert_eq!(
            execution.status, status,
            "step '{}' has status {:?}, expected {:?}",
            step_id, execution.status, status
        ),
        None => panic!(
            "step '{}' was never recorded. Recorded steps: {:?}",
            step_id,
            instance.execution_order()
        ),
    }
}

/// Assert that `step_id` never ran.
pub fn assert_step_not_run(instance: &WorkflowInstance, step_id: &str) {
    assert!(
        instance.execution(step_id).is_none(),
        "step '{}' was expected not to run but was recorded as {:?}",
        step_id,
        instance.execution(step_id).map(|e| e.status)
    );
}
