pub mod error;
pub mod loader;
pub mod settings;
pub mod watch;

pub use error::{ConfigError, Result};
pub use loader::load;
pub use settings::{
    BundleMakerSettings, BundleUrlSourceSettings, ClientConfig, FetchEngineSettings,
    PolicySourceKind, PolicySourceSettings, ServerConfig,
};
pub use watch::{ConfigWatchHandle, watch};
