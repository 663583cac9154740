use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

/// Session id of a `/sessions/{id}/...` path, `-` for anything else
fn session_of(path: &str) -> &str {
    path.strip_prefix("/sessions/")
        .and_then(|rest| rest.split('/').next())
        .filter(|id| !id.is_empty())
        .unwrap_or("-")
}

pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let session_id = session_of(&path);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        error!(%method, %path, session_id, %status, elapsed_ms, "Merge service error");
    } else {
        warn!(%method, %path, session_id, %status, elapsed_ms, "Rejected request");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_of() {
        assert_eq!(session_of("/sessions/abc123/merge"), "abc123");
        assert_eq!(session_of("/sessions/abc123"), "abc123");
        assert_eq!(session_of("/sessions"), "-");
        assert_eq!(session_of("/sessions/"), "-");
        assert_eq!(session_of("/health"), "-");
    }
}
