//! OPAL client process: Pub/Sub Client, Policy Updater, Data Fetch Engine +
//! Data Updater, and the `HttpStore` handle they all write through
//! (spec.md §4.4, §4.9-§4.11).

pub mod client;
pub mod data_updater;
pub mod error;
pub mod observability;
pub mod policy_updater;

pub use client::{ClientBuilder, OpalClient};
pub use error::{ClientError, Result};
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level, shutdown_tracing};
