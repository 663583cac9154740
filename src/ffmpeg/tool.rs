use anyhow::{Context, bail};
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

/// Version lines of the external tools found at startup
#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub ffmpeg: String,
    pub ffprobe: Option<String>,
}

/// Runs `<program> -version` and returns the first line it prints.
pub async fn check_tool(program: &str) -> anyhow::Result<String> {
    let output = Command::new(program)
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("{program} could not be started"))?;

    if !output.status.success() {
        bail!("{program} -version exited with {}", output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// ffmpeg is required; without ffprobe uploads simply carry no info.
pub async fn detect_tools(ffmpeg: &str, ffprobe: &str) -> anyhow::Result<ToolVersions> {
    let ffmpeg_version = check_tool(ffmpeg).await.with_context(|| {
        format!("FFmpeg not found. Make sure '{ffmpeg}' is installed and on the PATH")
    })?;
    info!(version = %ffmpeg_version, "Found ffmpeg");

    let ffprobe_version = match check_tool(ffprobe).await {
        Ok(version) => {
            info!(%version, "Found ffprobe");
            Some(version)
        }
        Err(error) => {
            warn!(?error, "ffprobe unavailable, uploads will not be probed");
            None
        }
    };

    Ok(ToolVersions {
        ffmpeg: ffmpeg_version,
        ffprobe: ffprobe_version,
    })
}
