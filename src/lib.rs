pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod session;

use anyhow::Context;
use axum::Router;
use axum::extract::Extension;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{
    concat_videos, create_session, delete_session, delete_upload, download_output, get_session,
    health, index, log_request_errors, merge_command_preview, merge_videos, options, upload_video,
};
pub use app_state::AppState;
pub use config::Config;
pub use error::{MergeError, MergeResult};
pub use ffmpeg::{MergeSettings, ToolCommand, ToolVersions, VideoInfo};
pub use session::{MergedVideo, SessionStore, UploadedVideo};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/options", get(options))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/uploads", post(upload_video))
        .route("/sessions/{id}/uploads/{index}", delete(delete_upload))
        .route("/sessions/{id}/merge", post(merge_videos))
        .route("/sessions/{id}/merge/command", post(merge_command_preview))
        .route("/sessions/{id}/concat", post(concat_videos))
        .route("/sessions/{id}/output", get(download_output))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serves the API on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("HTTP server error")
}

/// Checks the external tools, then serves until the process is stopped.
///
/// A missing ffmpeg is reported as an error before anything is bound.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let tools = ffmpeg::detect_tools(&config.ffmpeg_path, &config.ffprobe_path).await?;

    let addr = format!("{}:{}", config.bind_address, config.listen_on_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    serve(listener, AppState::new(&config, tools)).await
}
