//! OPAL server process: Pub/Sub Endpoint, Leader-Lock-gated Policy Source
//! watcher, Bundle Maker, Webhook Intake, exposed over a small HTTP/WS API
//! (spec.md §4.3, §4.5-§4.9, §6).

pub mod handlers;
pub mod observability;
pub mod policy_watcher;
pub mod server;
pub mod state;

pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level, shutdown_tracing};
pub use server::{OpalServer, ServerBuilder};
pub use state::AppState;
