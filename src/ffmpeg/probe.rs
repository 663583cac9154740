use crate::ffmpeg::command::ToolCommand;
use crate::ffmpeg::runner::run_piped;
use anyhow::{Context, anyhow};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Metadata read from an upload by ffprobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub resolution: String,
    pub codec: String,
    pub has_audio: bool,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    // ffprobe prints numbers in the format section as strings
    duration: Option<String>,
}

pub fn probe_command(program: &str) -> ToolCommand {
    ToolCommand {
        program: program.to_string(),
        args: [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    }
}

/// Extracts duration, size and codec of the first video stream.
pub fn parse_probe_output(json: &[u8]) -> anyhow::Result<VideoInfo> {
    let output: ProbeOutput = serde_json::from_slice(json).context("Invalid ffprobe JSON")?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("No video stream found"))?;
    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = output
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| anyhow!("Missing format duration"))?
        .trim()
        .parse::<f64>()
        .context("Invalid format duration")?;
    let width = video.width.ok_or_else(|| anyhow!("Missing video width"))?;
    let height = video.height.ok_or_else(|| anyhow!("Missing video height"))?;
    let codec = video
        .codec_name
        .clone()
        .ok_or_else(|| anyhow!("Missing video codec"))?;

    Ok(VideoInfo {
        duration,
        width,
        height,
        resolution: format!("{width}x{height}"),
        codec,
        has_audio,
    })
}

/// Probes `data` over ffprobe's standard input.
///
/// Failures are logged and yield `None`, an upload without info is still usable.
pub async fn probe(program: &str, name: &str, data: Bytes) -> Option<VideoInfo> {
    let output = match run_piped(&probe_command(program), vec![data]).await {
        Ok(output) => output,
        Err(error) => {
            warn!(name, %error, "Unable to probe video");
            return None;
        }
    };

    match parse_probe_output(&output) {
        Ok(info) => {
            debug!(name, ?info, "Video probed");
            Some(info)
        }
        Err(error) => {
            warn!(name, %error, "Unable to read video info");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            { "index": 0, "codec_name": "aac", "codec_type": "audio", "sample_rate": "48000" },
            { "index": 1, "codec_name": "h264", "codec_type": "video", "width": 1280, "height": 720 }
        ],
        "format": { "filename": "pipe:", "duration": "12.480000", "format_name": "mov,mp4,m4a,3gp,3g2,mj2" }
    }"#;

    #[test]
    fn test_parse_sample() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.duration, 12.48);
        assert_eq!(info.resolution, "1280x720");
        assert_eq!(info.codec, "h264");
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_video_only() {
        let json = r#"{
            "streams": [{ "codec_name": "vp9", "codec_type": "video", "width": 854, "height": 480 }],
            "format": { "duration": "3.0" }
        }"#;
        let info = parse_probe_output(json.as_bytes()).unwrap();
        assert!(!info.has_audio);
        assert_eq!((info.width, info.height), (854, 480));
    }

    #[test]
    fn test_parse_rejects_audio_only() {
        let json = r#"{
            "streams": [{ "codec_name": "mp3", "codec_type": "audio" }],
            "format": { "duration": "3.0" }
        }"#;
        let error = parse_probe_output(json.as_bytes()).unwrap_err();
        assert!(error.to_string().contains("No video stream"));
    }

    #[test]
    fn test_parse_rejects_missing_duration() {
        let json = r#"{
            "streams": [{ "codec_name": "h264", "codec_type": "video", "width": 2, "height": 2 }],
            "format": {}
        }"#;
        assert!(parse_probe_output(json.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_probe_output(b"").is_err());
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[test]
    fn test_probe_command_reads_stdin() {
        let cmd = probe_command("ffprobe");
        assert_eq!(
            cmd.display(),
            "ffprobe -v quiet -print_format json -show_format -show_streams -"
        );
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_fatal() {
        let info = probe(
            "definitely-not-a-real-ffprobe-9a2e",
            "clip.mp4",
            Bytes::from_static(b"not a video"),
        )
        .await;
        assert!(info.is_none());
    }
}
