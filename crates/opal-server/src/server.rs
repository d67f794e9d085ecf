//! Server composition: `ServerBuilder` turns a `ServerConfig` into a bound
//! `OpalServer`, mirroring the teacher's `ServerBuilder`/`AppState`/`build_app`/
//! `build_router` shape (`server.rs`), trimmed to OPAL's much smaller route
//! table.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use globset::{Glob, GlobSetBuilder};
use opal_auth::{AuthState, JwtSigner};
use opal_config::{BundleMakerSettings, PolicySourceKind, ServerConfig};
use opal_policy::{BundleMaker, BundleSourceConfig, BundleUrlSource, GitPolicySource, WebhookIntake};
use opal_pubsub::{Broadcaster, Notifier};
use opal_retry::{RetryExecutor, RetryPolicy};
use opal_transport::server::{ClientRegistry, ws_handler};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::policy_watcher::{self, PolicySourceRuntime, PolicyWatcherConfig};
use crate::state::{AppState, PolicyRepoState};

pub struct OpalServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub async fn build(self) -> anyhow::Result<OpalServer> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .context("invalid bind_address")?;
        let app = build_app(self.config).await?;
        Ok(OpalServer { addr, app })
    }
}

impl OpalServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "listening");
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

async fn build_app(config: ServerConfig) -> anyhow::Result<Router> {
    let signer = JwtSigner::new(config.auth.clone())?;
    let auth = AuthState::new(Arc::new(signer));

    let notifier = Notifier::new();
    let broadcaster = Broadcaster::with_redis(notifier, config.broadcaster.clone())?;
    broadcaster.start();

    let registry = Arc::new(ClientRegistry::new());

    let bundle_maker = build_bundle_maker(&config.bundle_maker)?;
    let (repo_path, runtime) = build_policy_runtime(&config)?;
    let policy_repo = Arc::new(PolicyRepoState::new(repo_path, bundle_maker));

    let webhook = config
        .webhook
        .clone()
        .map(|cfg| Arc::new(WebhookIntake::new(cfg)));

    let state = AppState {
        broadcaster: broadcaster.clone(),
        registry,
        auth,
        policy_repo: policy_repo.clone(),
        webhook,
        bootstrap_data_sources: Arc::new(config.bootstrap_data_sources.clone()),
        statistics_enabled: config.statistics_enabled,
    };

    let watcher_config = PolicyWatcherConfig {
        polling_interval: config.policy_source.polling_interval,
        leader_lock: Some(config.leader_lock.clone()),
    };
    tokio::spawn(policy_watcher::run(
        runtime,
        watcher_config,
        broadcaster,
        policy_repo,
    ));

    Ok(build_router(state))
}

fn build_bundle_maker(settings: &BundleMakerSettings) -> anyhow::Result<BundleMaker> {
    let mut maker = BundleMaker::new(
        settings.policy_extension.clone(),
        settings.in_directories.clone(),
    );
    maker.extensions = settings.extensions.clone();
    if !settings.ignore_patterns.is_empty() {
        let mut builder = GlobSetBuilder::new();
        for pattern in &settings.ignore_patterns {
            builder.add(Glob::new(pattern)?);
        }
        maker.bundle_ignore = Some(builder.build()?);
    }
    Ok(maker)
}

fn build_policy_runtime(config: &ServerConfig) -> anyhow::Result<(PathBuf, PolicySourceRuntime)> {
    match config.policy_source.kind {
        PolicySourceKind::Git => {
            let git_config = config
                .policy_source
                .git
                .clone()
                .context("policy_source.git must be set for kind = \"git\"")?;
            let repo_path = git_config.clone_path.clone();
            let retry = RetryExecutor::from_policy(RetryPolicy::Conservative);
            let source = GitPolicySource::new(git_config, retry);
            Ok((
                repo_path,
                PolicySourceRuntime::Git {
                    source,
                    in_directories: config.bundle_maker.in_directories.clone(),
                },
            ))
        }
        PolicySourceKind::BundleUrl => {
            let settings = config
                .policy_source
                .bundle_url
                .clone()
                .context("policy_source.bundle_url must be set for kind = \"bundle_url\"")?;
            let working_dir = settings.working_dir.clone();
            let source = BundleUrlSource::new(BundleSourceConfig {
                bundle_url: settings.bundle_url,
                working_dir: settings.working_dir,
            });
            Ok((
                working_dir.clone(),
                PolicySourceRuntime::BundleUrl {
                    source,
                    working_dir,
                    in_directories: config.bundle_maker.in_directories.clone(),
                },
            ))
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::healthcheck))
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/token", post(handlers::issue_token))
        .route("/policy", get(handlers::get_policy))
        .route("/data/config", post(handlers::get_data_config))
        .route("/data/update", post(handlers::post_data_update))
        .route("/webhook", post(handlers::webhook))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/ws", get(ws_handler::<AppState>))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
}
