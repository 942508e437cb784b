//! Public website served on the Web hostname

use axum::{
    Json, Router,
    response::{Html, IntoResponse},
    routing::get,
};
use serde_json::json;

const LANDING_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Spacekit</title></head>
<body>
<h1>Spacekit</h1>
<p>Expose services running on your own machine at <code>&lt;service&gt;.&lt;user&gt;</code> hostnames.</p>
</body>
</html>
"#;

pub fn create_web_router() -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/health", get(health))
}

async fn landing_page() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "spacekit-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_landing_page() {
        let response = create_web_router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("Spacekit"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_web_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let response = create_web_router()
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
