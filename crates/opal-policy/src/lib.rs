pub mod bundle_maker;
pub mod bundle_source;
pub mod diff;
pub mod error;
pub mod git_source;
pub mod leader_lock;
pub mod webhook;

pub use bundle_maker::BundleMaker;
pub use bundle_source::{BundleSourceConfig, BundleUrlSource};
pub use diff::affected_directories;
pub use error::PolicyError;
pub use git_source::{GitPolicySource, GitSourceConfig};
pub use leader_lock::{LeaderLock, LeaderLockConfig};
pub use webhook::{SecretType, WebhookConfig, WebhookIntake, WEBHOOK_TOPIC};
