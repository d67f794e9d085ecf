//! Application state shared across routes, matching the teacher's
//! multi-`FromRef` `AppState` pattern (`server.rs`): one clonable struct,
//! with extractor-specific views carved out via `FromRef`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::FromRef;
use opal_auth::AuthState;
use opal_core::DataSourceEntry;
use opal_policy::BundleMaker;
use opal_pubsub::Broadcaster;
use opal_policy::WebhookIntake;
use opal_transport::server::{ClientRegistry, PubSubAppState};

/// The leader-owned policy repository: a working tree plus the
/// `BundleMaker` configured to read it, and a readiness flag so
/// `GET /policy` can return 503 before the first successful pull.
pub struct PolicyRepoState {
    pub repo_path: PathBuf,
    pub bundle_maker: BundleMaker,
    ready: AtomicBool,
}

impl PolicyRepoState {
    pub fn new(repo_path: PathBuf, bundle_maker: BundleMaker) -> Self {
        Self {
            repo_path,
            bundle_maker,
            ready: AtomicBool::new(false),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub registry: Arc<ClientRegistry>,
    pub auth: AuthState,
    pub policy_repo: Arc<PolicyRepoState>,
    pub webhook: Option<Arc<WebhookIntake>>,
    pub bootstrap_data_sources: Arc<Vec<DataSourceEntry>>,
    pub statistics_enabled: bool,
}

impl PubSubAppState for AppState {
    fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    fn statistics_enabled(&self) -> bool {
        self.statistics_enabled
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
