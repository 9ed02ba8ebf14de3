//! weft - workflow orchestration for Rust
//!
//! Define steps with typed inputs and outputs, wire them into a dependency
//! graph and let the runtime execute it layer by layer, with retries, per
//! attempt timeouts and saga-style compensation when a run fails.

pub mod demo;
pub mod logging;
mod runtime;

#[doc(hidden)]
pub use weft_core;
#[doc(hidden)]
pub use weft_runtime;

// These macros use #[macro_export], which places them at the weft_core root.
#[cfg(feature = "testing")]
pub use weft_core::{assert_err, assert_err_variant, assert_ok};

pub use runtime::prelude;
pub use runtime::{Weft, WeftBuilder};
