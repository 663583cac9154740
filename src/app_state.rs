use crate::config::Config;
use crate::ffmpeg::ToolVersions;
use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub tools: Arc<ToolVersions>,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub threads: usize,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config, tools: ToolVersions) -> Self {
        let this = Self {
            sessions: SessionStore::default(),
            tools: Arc::new(tools),

            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            threads: config.encoder_threads(),
            max_upload_bytes: config.max_upload_bytes,
        };

        this.sweep_sessions(Duration::from_secs(config.session_ttl_secs));
        this
    }

    /// Whether uploads can be probed
    pub fn can_probe(&self) -> bool {
        self.tools.ffprobe.is_some()
    }

    fn sweep_sessions(&self, ttl: Duration) {
        let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        info!(ttl_secs = ttl.as_secs(), "Session sweeper started");

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let expired = sessions.expire(ttl).await;
                if expired > 0 {
                    debug!(expired, "Expired idle sessions");
                }
            }
        });
    }
}
