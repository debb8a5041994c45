// src/cli/serve.rs — Run the HTTP API with the background reaper

use std::sync::Arc;

use crate::api::{self, ApiState};
use crate::compute::DefaultBackend;
use crate::infra::config::Config;
use crate::service::SessionService;

pub async fn run_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.api.host = host;
    }
    if let Some(port) = port {
        config.api.port = port;
    }

    let backend = Arc::new(DefaultBackend::from_config(&config.sweep));
    let service = Arc::new(SessionService::new(&config, backend));
    let reaper = service.start_reaper();

    tracing::info!(
        idle_ttl_secs = config.sessions.idle_ttl_secs,
        absolute_ttl_secs = config.sessions.absolute_ttl_secs,
        max_workers = config.sweep.max_workers,
        "ephemera {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let state = ApiState {
        service: Arc::clone(&service),
    };
    let result = api::start_server(&config.api, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    })
    .await;

    reaper.stop().await;
    result
}
