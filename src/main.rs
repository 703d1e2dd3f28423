use std::{net::SocketAddr, sync::Arc};

use admission_guard::{AdmissionService, api, config::AppConfig};
use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("failed to build admission config")?;
    init_tracing(&cfg.log_level);

    let bind_addr = cfg.bind_addr;
    let service = Arc::new(AdmissionService::new(cfg.limiter));
    let app = api::routes(service);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %bind_addr, "admission service listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("admission server error")?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{log_level},hyper=warn,reqwest=warn,redis=warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
