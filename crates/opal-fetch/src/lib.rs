pub mod engine;
pub mod error;
pub mod provider;

pub use engine::{FailureHook, FetchCallback, FetchEngine, FetchEngineConfig};
pub use error::FetchError;
pub use provider::{FetchProvider, HttpGetProvider, ProviderFactory, ProviderRegistry};
