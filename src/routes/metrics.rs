use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};

use crate::error::{AppError, AppResult};

/// Prometheus text exposition of every registered collector. Unauthenticated;
/// expose it only on an internal network.
pub async fn metrics_handler() -> AppResult<Response> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::services::metrics;

    #[tokio::test]
    async fn exposes_registered_counters() {
        metrics::REGISTRATIONS_COUNTER.inc();

        let resp = metrics_handler().await.unwrap();
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("api_registrations_total"));
    }
}
