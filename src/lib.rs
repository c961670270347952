pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::AppConfig;
use crate::services::assembler::UploadAssembler;
use crate::services::gateway::StatusGateway;
use crate::services::ingress::IngressService;
use crate::services::job_store::JobStore;
use crate::services::pipeline::PipelineHandle;
use crate::services::storage::StorageLayout;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Multipart framing allowance on top of the configured upload size.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload::upload_chunk,
        handlers::status::job_status,
        handlers::download::download_summary,
        handlers::health::health_check,
    ),
    components(
        schemas(
            handlers::upload::ChunkForm,
            handlers::upload::ChunkResponse,
            handlers::status::StatusKind,
            handlers::status::StatusResponse,
            handlers::health::HealthResponse,
            services::ingress::ChunkDisposition,
            models::JobStage,
        )
    ),
    tags(
        (name = "upload", description = "Chunked audio/video upload"),
        (name = "jobs", description = "Job status and summary download"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub layout: StorageLayout,
    pub store: Arc<dyn JobStore>,
    pub ingress: Arc<IngressService>,
    pub gateway: Arc<StatusGateway>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        layout: StorageLayout,
        store: Arc<dyn JobStore>,
        assembler: Arc<UploadAssembler>,
        pipeline: PipelineHandle,
    ) -> Self {
        let ingress = Arc::new(IngressService::new(
            store.clone(),
            assembler,
            pipeline,
            layout.clone(),
            config.allowed_extensions.clone(),
        ));
        let gateway = Arc::new(StatusGateway::new(store.clone(), layout.clone()));
        Self {
            config,
            layout,
            store,
            ingress,
            gateway,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health::health_check))
        .route("/", post(handlers::upload::upload_chunk))
        .route("/upload", post(handlers::upload::upload_chunk))
        .route("/status/:uid", get(handlers::status::job_status))
        .route("/download/:uid", get(handlers::download::download_summary))
        .layer(DefaultBodyLimit::max(body_limit))
        // Inside the request-id layer, so the span sees an assigned id.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(api::middleware::request_id::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
