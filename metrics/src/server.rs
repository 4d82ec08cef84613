use core::net::{IpAddr, SocketAddr};

use anyhow::Result;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::info;
use prometheus::TextEncoder;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Clone, Copy, Debug)]
pub struct MetricsServerConfig {
    pub metrics_address: IpAddr,
    pub metrics_port: u16,
}

impl From<&MetricsServerConfig> for SocketAddr {
    fn from(config: &MetricsServerConfig) -> Self {
        Self::from((config.metrics_address, config.metrics_port))
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("failed to gather metrics: {0}")]
    UnableToGather(#[from] prometheus::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

pub async fn run_metrics_server(config: MetricsServerConfig) -> Result<()> {
    let address = SocketAddr::from(&config);

    let router = Router::new()
        .route("/metrics", get(prometheus_metrics_response))
        .layer(CorsLayer::new().allow_origin(AllowOrigin::any()));

    info!("metrics server is listening on {address}");

    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(Into::into)
}

async fn prometheus_metrics_response() -> Result<Response, Error> {
    let metric_families = prometheus::default_registry().gather();
    let body = TextEncoder::new().encode_to_string(&metric_families)?;

    Ok((
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
