//! Testing utilities for weft workflows.
//!
//! Enabled with the `testing` feature. Provides assertion macros, a
//! publisher that records events, and step fixtures with predictable
//! behaviour.
//!
//! ```ignore
//! use weft_core::testing::*;
//!
//! #[tokio::test]
//! async fn retries_until_success() {
//!     let counter = call_counter();
//!     let step = flaky_step("fetch", 2, counter.clone())
//!         .retry(RetryPolicy::fixed(3, Duration::ZERO))
//!         .build();
//!     // ...
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod recording;

pub use assertions::*;
pub use fixtures::*;
pub use recording::RecordingPublisher;

use std::time::Duration;

/// Default timeout for awaiting a workflow in tests.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);
