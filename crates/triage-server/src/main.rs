use std::{env, net::SocketAddr, sync::Arc};

use axum::{Json, Router, http::StatusCode, routing::get};
use serde::Serialize;
use tracing::{info, warn};
use triage_core::{Config, GmailClient, LabelLocks, init_telemetry};

mod api;

#[derive(Clone)]
pub struct AppState {
    http: reqwest::Client,
    gmail_api_base: String,
    /// Shared by every request so concurrent batches on one mailbox create each label once.
    label_locks: Arc<LabelLocks>,
}

impl AppState {
    pub fn new(http: reqwest::Client, gmail_api_base: impl Into<String>) -> Self {
        Self {
            http,
            gmail_api_base: gmail_api_base.into(),
            label_locks: Arc::new(LabelLocks::new()),
        }
    }

    /// A Gmail client acting with the caller's access token.
    pub fn gmail(&self, access_token: &str) -> GmailClient {
        GmailClient::new(self.http.clone(), access_token).with_api_base(&self.gmail_api_base)
    }

    pub fn label_locks(&self) -> &LabelLocks {
        &self.label_locks
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let state = AppState::new(http, config.gmail.api_base.clone());
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("triage listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn healthz() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
    }
}
