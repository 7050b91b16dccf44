//! Prometheus metrics endpoint

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use std::sync::Arc;

use crate::state::MetricsHandle;

/// Register help text for the counters the account routes emit
fn describe_account_metrics() {
    metrics::describe_counter!(
        "labsite_auth_logins_total",
        "Login attempts, labelled by outcome"
    );
    metrics::describe_counter!(
        "labsite_auth_password_resets_total",
        "Password reset links sent and resets completed, labelled by stage"
    );
    metrics::describe_counter!("labsite_health_checks_total", "Health endpoint hits");
}

/// Create metrics routes with the Prometheus handle
pub fn routes(handle: Arc<MetricsHandle>) -> Router {
    describe_account_metrics();

    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(handle)
}

/// GET /metrics
async fn get_metrics(State(handle): State<Arc<MetricsHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_render_account_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = Arc::new(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            describe_account_metrics();
            metrics::counter!("labsite_auth_logins_total", "outcome" => "failure").increment(2);
        });

        let response = routes(handle)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("labsite_auth_logins_total{outcome=\"failure\"} 2"));
        assert!(text.contains("# HELP labsite_auth_logins_total Login attempts"));
    }
}
