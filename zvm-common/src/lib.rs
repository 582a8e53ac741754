//! # zvm-common
//!
//! Shared utilities for the z/VM driver binaries.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use zvm_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty).unwrap();
//! tracing::info!(domain = "vm1", "Domain started");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
