//! HTTP gateway for txtpool.
//!
//! Serves the current aggregate on `GET /all`, stores a single uploaded file
//! as the "valid" artifact on `POST /valid`, and answers `GET /health`.
//!
//! Built on Axum. Handlers only touch the filesystem; they never run a
//! lifecycle cycle. The aggregate is replaced by atomic rename, so a read
//! always sees a complete version.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Multipart field carrying the valid artifact.
pub const VALID_FIELD: &str = "file";

/// Shared application state for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// Published aggregate, served verbatim by `GET /all`
    pub aggregate_path: PathBuf,

    /// Destination of `POST /valid`; its parent is created on demand
    pub valid_path: PathBuf,
}

impl GatewayState {
    pub fn from_config(storage: &txtpool_config::StorageConfig) -> Self {
        Self {
            aggregate_path: storage.aggregate_path(),
            valid_path: storage.valid_path(),
        }
    }

    fn aggregate_name(&self) -> String {
        self.aggregate_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/all", get(all_handler))
        .route("/valid", post(valid_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind to the configured address and serve until `cancel` fires.
pub async fn serve(
    config: &txtpool_config::GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    let app = build_router(Arc::new(state), config.max_upload_bytes);
    serve_on(listener, app, cancel).await
}

/// Serve `app` on an already bound listener until `cancel` fires.
pub async fn serve_on(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Gateway stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn all_handler(State(state): State<SharedState>) -> Response {
    match tokio::fs::read(&state.aggregate_path).await {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %state.aggregate_path.display(), error = %e, "Failed to read aggregate");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read {}", state.aggregate_name()),
            )
                .into_response()
        }
    }
}

async fn valid_handler(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> (StatusCode, &'static str) {
    let body = match read_file_field(multipart).await {
        Ok(body) => body,
        Err(status) => {
            let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "File too large"
            } else {
                "Failed to get file from request"
            };
            return (status, message);
        }
    };

    if let Some(parent) = state.valid_path.parent().filter(|p| !p.as_os_str().is_empty())
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!(path = %parent.display(), error = %e, "Failed to create uploads directory");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create directory");
    }

    if let Err(e) = tokio::fs::write(&state.valid_path, &body).await {
        warn!(path = %state.valid_path.display(), error = %e, "Failed to write valid file");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save file");
    }

    info!(path = %state.valid_path.display(), bytes = body.len(), "Valid file stored");
    (StatusCode::OK, "File uploaded and saved successfully")
}

/// Pull the bytes of the `file` field out of a multipart body. Other fields
/// are skipped.
async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, StatusCode> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "Rejected non-multipart upload");
        StatusCode::BAD_REQUEST
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                warn!("Upload has no `{VALID_FIELD}` field");
                return Err(StatusCode::BAD_REQUEST);
            }
            Err(e) => {
                warn!(error = %e, "Malformed multipart body");
                return Err(upload_status(e.status()));
            }
        };

        if field.name() != Some(VALID_FIELD) {
            continue;
        }

        return match field.bytes().await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                warn!(error = %e, "Failed to read uploaded file");
                Err(upload_status(e.status()))
            }
        };
    }
}

fn upload_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::BAD_REQUEST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tower::ServiceExt;

    const BOUNDARY: &str = "txtpool-test-boundary";

    fn test_state(root: &Path) -> SharedState {
        Arc::new(GatewayState {
            aggregate_path: root.join("files").join("all.txt"),
            valid_path: root.join("uploads").join("valid.txt"),
        })
    }

    fn multipart_request(field: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"valid.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/valid")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let root = tempfile::tempdir().unwrap();
        let app = build_router(test_state(root.path()), 1024);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn all_serves_aggregate_bytes() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        std::fs::create_dir_all(state.aggregate_path.parent().unwrap()).unwrap();
        std::fs::write(&state.aggregate_path, "x\ny\n").unwrap();

        let req = Request::builder().uri("/all").body(Body::empty()).unwrap();
        let response = build_router(state, 1024).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "x\ny\n");
    }

    #[tokio::test]
    async fn all_without_aggregate_is_500() {
        let root = tempfile::tempdir().unwrap();

        let req = Request::builder().uri("/all").body(Body::empty()).unwrap();
        let response = build_router(test_state(root.path()), 1024)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Failed to read all.txt");
    }

    #[tokio::test]
    async fn valid_upload_creates_directory_and_replaces_file() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let app = build_router(state.clone(), 1024 * 1024);

        let response = app
            .clone()
            .oneshot(multipart_request("file", "first version"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "File uploaded and saved successfully"
        );
        assert_eq!(
            std::fs::read_to_string(&state.valid_path).unwrap(),
            "first version"
        );

        let response = app
            .oneshot(multipart_request("file", "v2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(std::fs::read_to_string(&state.valid_path).unwrap(), "v2");
    }

    #[tokio::test]
    async fn valid_upload_without_file_field_is_400() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());

        let response = build_router(state.clone(), 1024)
            .oneshot(multipart_request("other", "data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Failed to get file from request");
        assert!(!state.valid_path.exists());
    }

    #[tokio::test]
    async fn valid_upload_that_is_not_multipart_is_400() {
        let root = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/valid")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("raw"))
            .unwrap();

        let response = build_router(test_state(root.path()), 1024)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Failed to get file from request");
    }

    #[tokio::test]
    async fn valid_upload_reports_directory_failure() {
        let root = tempfile::tempdir().unwrap();
        // A regular file where the uploads directory should be.
        std::fs::write(root.path().join("uploads"), "in the way").unwrap();

        let response = build_router(test_state(root.path()), 1024)
            .oneshot(multipart_request("file", "data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Failed to create directory");
    }

    #[tokio::test]
    async fn valid_upload_reports_write_failure() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        // A directory at the destination path cannot be overwritten as a file.
        std::fs::create_dir_all(&state.valid_path).unwrap();

        let response = build_router(state, 1024)
            .oneshot(multipart_request("file", "data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Failed to save file");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path());
        let big = "x".repeat(4096);

        let response = build_router(state.clone(), 256)
            .oneshot(multipart_request("file", &big))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert!(!state.valid_path.exists());
    }

    #[tokio::test]
    async fn serve_on_stops_when_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let app = build_router(test_state(root.path()), 1024);

        let task = tokio::spawn(serve_on(listener, app, cancel.clone()));
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("gateway did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
