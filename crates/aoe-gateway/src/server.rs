//! HTTP front door
//!
//! One-shot routes answer with an envelope as JSON; `/v1/spark/chat` answers
//! with `text/event-stream`, one `data:` event per envelope.

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State, multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::providers::{
    BardAskImage, BardAskImageRequest, ImageUpload, PalmChat, PalmChatRequest, PalmText,
    PalmTextRequest, ProviderAdapter, SparkChat, SparkChatRequest, StreamingAdapter,
};
use crate::proxy::{Envelope, HeaderPairs, TransportClient, headers, stream_envelopes};

/// Headers describing the inbound connection or body; never passed to adapters
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "proxy-connection",
    "te",
    "upgrade",
    "content-length",
    "content-type",
    "accept-encoding",
];

/// Largest accepted request body (image uploads)
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub transport: TransportClient,
    pub palm_chat: Arc<PalmChat>,
    pub palm_text: Arc<PalmText>,
    pub bard: Arc<BardAskImage>,
    pub spark: Arc<SparkChat>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            transport: TransportClient::new(&config.upstream)?,
            palm_chat: Arc::new(PalmChat::from_config(&config.palm)),
            palm_text: Arc::new(PalmText::from_config(&config.palm)),
            bard: Arc::new(BardAskImage::new(&config.bard)),
            spark: Arc::new(SparkChat::new(&config.spark)),
        })
    }
}

/// The gateway HTTP server
pub struct GatewayServer {
    config: Config,
}

impl GatewayServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::from_config(&self.config)?);
        let app = create_router(state);

        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Server(format!("Failed to bind to {addr}: {e}")))?;

        tracing::info!("Gateway listening on {addr}");
        tracing::info!(
            "Upstream timeout: {}s, connect timeout: {}s",
            self.config.upstream.timeout_secs,
            self.config.upstream.connect_timeout_secs
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Server(format!("Server error: {e}")))?;

        tracing::info!("Gateway shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/palm/chat", post(palm_chat_handler))
        .route("/v1/palm/text", post(palm_text_handler))
        .route("/v1/bard/ask_about_image", post(bard_ask_image_handler))
        .route("/v1/spark/chat", post(spark_chat_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn palm_chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<PalmChatRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => {
            one_shot(&state.transport, state.palm_chat.as_ref(), &request, &headers).await
        }
        Err(rejection) => rejection_response(rejection.body_text()),
    }
}

async fn palm_text_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<PalmTextRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => {
            one_shot(&state.transport, state.palm_text.as_ref(), &request, &headers).await
        }
        Err(rejection) => rejection_response(rejection.body_text()),
    }
}

async fn bard_ask_image_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => return rejection_response(rejection.body_text()),
    };
    match read_ask_image(multipart).await {
        Ok(request) => one_shot(&state.transport, state.bard.as_ref(), &request, &headers).await,
        Err(e) => error_response(e),
    }
}

async fn spark_chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<SparkChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection.body_text()),
    };

    let descriptor = match state
        .spark
        .build_request(&request, &forwardable_headers(&headers))
    {
        Ok(descriptor) => descriptor,
        Err(e) => return error_response(e),
    };

    let envelopes = stream_envelopes(
        state.transport.clone(),
        descriptor,
        state.spark.stream_callback(),
    );
    let events = envelopes
        .map(|envelope| Ok::<_, Infallible>(Event::default().data(envelope.to_json())));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Build, send and shape a one-shot call
async fn one_shot<A: ProviderAdapter>(
    transport: &TransportClient,
    adapter: &A,
    request: &A::Request,
    headers: &HeaderMap,
) -> Response {
    let descriptor = match adapter.build_request(request, &forwardable_headers(headers)) {
        Ok(descriptor) => descriptor,
        Err(e) => return error_response(e),
    };
    let envelope = adapter.parse_reply(transport.request(&descriptor).await);
    Json(envelope).into_response()
}

/// Collect the `question` and `image` fields of an ask-about-image upload
async fn read_ask_image(mut multipart: Multipart) -> Result<BardAskImageRequest> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        GatewayError::InvalidRequest(format!("Malformed multipart body: {e}"))
    };

    let mut question = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "question" => question = Some(field.text().await.map_err(malformed)?),
            "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(malformed)?;
                image = Some(ImageUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            other => tracing::debug!("Ignoring multipart field '{other}'"),
        }
    }

    Ok(BardAskImageRequest {
        question: question
            .ok_or_else(|| GatewayError::InvalidRequest("missing field 'question'".to_string()))?,
        image: image
            .ok_or_else(|| GatewayError::InvalidRequest("missing field 'image'".to_string()))?,
    })
}

/// Inbound headers minus those describing the inbound hop or body
fn forwardable_headers(map: &HeaderMap) -> HeaderPairs {
    headers::from_header_map(map)
        .into_iter()
        .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .collect()
}

fn error_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidRequest(_) | GatewayError::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::ProviderDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Config(_) | GatewayError::Server(_) | GatewayError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: GatewayError) -> Response {
    let status = error_status(&err);
    tracing::warn!(status = status.as_u16(), "Rejecting request: {err}");
    (status, Json(Envelope::failure(err.to_string()))).into_response()
}

fn rejection_response(reason: String) -> Response {
    error_response(GatewayError::InvalidRequest(reason))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BardConfig, PalmConfig, SparkConfig};
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            transport: TransportClient::with_client(
                reqwest::Client::new(),
                Duration::from_secs(5),
            ),
            palm_chat: Arc::new(PalmChat::new(&PalmConfig::default(), None)),
            palm_text: Arc::new(PalmText::new(
                &PalmConfig::default(),
                Some("k".to_string()),
            )),
            bard: Arc::new(BardAskImage::new(&BardConfig::default())),
            spark: Arc::new(SparkChat::new(&SparkConfig::default())),
        })
    }

    async fn body_envelope(response: Response) -> Envelope {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request_envelope() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/palm/text")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"prompt\": "))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_envelope(response).await;
        assert!(!envelope.success);
        assert!(envelope.message.starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request_envelope() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/palm/text")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_envelope(response).await,
            Envelope::failure("Invalid request: prompt must not be empty")
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_unavailable() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/spark/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"messages": [{"role": "user", "content": "Hi"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let envelope = body_envelope(response).await;
        assert_eq!(envelope.message, "Provider 'spark' is not configured");
    }

    #[tokio::test]
    async fn test_bard_requires_multipart() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/bard/ask_about_image")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!body_envelope(response).await.success);
    }

    #[test]
    fn test_forwardable_headers_drop_hop_by_hop() {
        let mut map = HeaderMap::new();
        map.insert("connection", HeaderValue::from_static("keep-alive"));
        map.insert("content-length", HeaderValue::from_static("42"));
        map.insert("content-type", HeaderValue::from_static("application/json"));
        map.insert("authorization", HeaderValue::from_static("Bearer t"));
        map.insert("x-request-id", HeaderValue::from_static("abc"));

        let mut forwarded = forwardable_headers(&map);
        forwarded.sort();
        assert_eq!(
            forwarded,
            vec![
                ("authorization".to_string(), "Bearer t".to_string()),
                ("x-request-id".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&GatewayError::InvalidRequest("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&GatewayError::ProviderDisabled("bard")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&GatewayError::Config("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
