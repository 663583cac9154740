use crate::error::{MergeError, MergeResult};
use serde::{Deserialize, Serialize};

pub const MIN_TRANSITION_SECS: f64 = 0.5;
pub const MAX_TRANSITION_SECS: f64 = 5.0;
pub const DEFAULT_OUTPUT_FILENAME: &str = "merged_video.mp4";

/// xfade transition between two consecutive clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    #[default]
    Fade,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    CircleOpen,
    RectCrop,
    Radial,
    ZoomIn,
    Pixelize,
}

impl Transition {
    pub const ALL: [Transition; 10] = [
        Transition::Fade,
        Transition::SlideLeft,
        Transition::SlideRight,
        Transition::SlideUp,
        Transition::SlideDown,
        Transition::CircleOpen,
        Transition::RectCrop,
        Transition::Radial,
        Transition::ZoomIn,
        Transition::Pixelize,
    ];

    /// Name understood by the xfade filter
    pub fn as_xfade(&self) -> &'static str {
        match self {
            Transition::Fade => "fade",
            Transition::SlideLeft => "slideleft",
            Transition::SlideRight => "slideright",
            Transition::SlideUp => "slideup",
            Transition::SlideDown => "slidedown",
            Transition::CircleOpen => "circleopen",
            Transition::RectCrop => "rectcrop",
            Transition::Radial => "radial",
            Transition::ZoomIn => "zoomin",
            Transition::Pixelize => "pixelize",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Transition::Fade => "Fade",
            Transition::SlideLeft => "Slide left",
            Transition::SlideRight => "Slide right",
            Transition::SlideUp => "Slide up",
            Transition::SlideDown => "Slide down",
            Transition::CircleOpen => "Circle",
            Transition::RectCrop => "Square",
            Transition::Radial => "Clock",
            Transition::ZoomIn => "Zoom",
            Transition::Pixelize => "Pixelize",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    #[default]
    Low,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::High, Quality::Medium, Quality::Low];

    pub fn crf(&self) -> u8 {
        match self {
            Quality::High => 18,
            Quality::Medium => 23,
            Quality::Low => 28,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    #[serde(rename = "libx264")]
    Libx264,
    #[serde(rename = "libx265")]
    Libx265,
    #[serde(rename = "libvpx-vp9")]
    LibvpxVp9,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 3] = [
        VideoCodec::Libx264,
        VideoCodec::Libx265,
        VideoCodec::LibvpxVp9,
    ];

    pub fn as_ffmpeg(&self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::Libx265 => "libx265",
            VideoCodec::LibvpxVp9 => "libvpx-vp9",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    #[default]
    #[serde(rename = "aac")]
    Aac,
    #[serde(rename = "libmp3lame")]
    Libmp3lame,
    #[serde(rename = "copy")]
    Copy,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 3] = [AudioCodec::Aac, AudioCodec::Libmp3lame, AudioCodec::Copy];

    pub fn as_ffmpeg(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Libmp3lame => "libmp3lame",
            AudioCodec::Copy => "copy",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRate {
    #[default]
    #[serde(rename = "keep")]
    Keep,
    #[serde(rename = "24")]
    Fps24,
    #[serde(rename = "25")]
    Fps25,
    #[serde(rename = "30")]
    Fps30,
    #[serde(rename = "60")]
    Fps60,
}

impl FrameRate {
    pub const ALL: [FrameRate; 5] = [
        FrameRate::Keep,
        FrameRate::Fps24,
        FrameRate::Fps25,
        FrameRate::Fps30,
        FrameRate::Fps60,
    ];

    /// Value for `-r`, `None` keeps the source rate
    pub fn as_ffmpeg(&self) -> Option<&'static str> {
        match self {
            FrameRate::Keep => None,
            FrameRate::Fps24 => Some("24"),
            FrameRate::Fps25 => Some("25"),
            FrameRate::Fps30 => Some("30"),
            FrameRate::Fps60 => Some("60"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "keep")]
    Keep,
    #[serde(rename = "1920x1080")]
    Hd1080,
    #[serde(rename = "1280x720")]
    Hd720,
    #[serde(rename = "854x480")]
    Sd480,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Keep,
        Resolution::Hd1080,
        Resolution::Hd720,
        Resolution::Sd480,
    ];

    /// Value for `-s`, `None` keeps the source size
    pub fn as_ffmpeg(&self) -> Option<&'static str> {
        match self {
            Resolution::Keep => None,
            Resolution::Hd1080 => Some("1920x1080"),
            Resolution::Hd720 => Some("1280x720"),
            Resolution::Sd480 => Some("854x480"),
        }
    }
}

/// Everything the user picks before a merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub transition: Transition,
    pub transition_duration: f64,
    pub output_filename: String,
    pub quality: Quality,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub frame_rate: FrameRate,
    pub resolution: Resolution,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            transition: Transition::default(),
            transition_duration: 1.0,
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            quality: Quality::default(),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
            frame_rate: FrameRate::default(),
            resolution: Resolution::default(),
        }
    }
}

impl MergeSettings {
    pub fn validate(&self) -> MergeResult<()> {
        if !self.transition_duration.is_finite()
            || !(MIN_TRANSITION_SECS..=MAX_TRANSITION_SECS).contains(&self.transition_duration)
        {
            return Err(MergeError::InvalidSettings(format!(
                "transition_duration must be between {MIN_TRANSITION_SECS} and {MAX_TRANSITION_SECS} seconds"
            )));
        }
        validate_output_filename(&self.output_filename)
    }
}

/// A bare name with no directory part, safe to hand to ffmpeg as a path
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !name.chars().any(char::is_control)
}

pub fn validate_output_filename(name: &str) -> MergeResult<()> {
    if name.trim().is_empty() {
        return Err(MergeError::InvalidSettings(
            "output_filename cannot be empty".into(),
        ));
    }
    if !is_plain_file_name(name) {
        return Err(MergeError::InvalidSettings(
            "output_filename must be a plain file name".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_empty_json() {
        let settings: MergeSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, MergeSettings::default());
        assert_eq!(settings.transition, Transition::Fade);
        assert_eq!(settings.quality.crf(), 28);
        assert_eq!(settings.output_filename, "merged_video.mp4");
    }

    #[test]
    fn test_wire_names() {
        let settings: MergeSettings = serde_json::from_value(json!({
            "transition": "circleopen",
            "transition_duration": 2.5,
            "quality": "high",
            "video_codec": "libvpx-vp9",
            "audio_codec": "libmp3lame",
            "frame_rate": "30",
            "resolution": "1280x720",
        }))
        .unwrap();

        assert_eq!(settings.transition.as_xfade(), "circleopen");
        assert_eq!(settings.quality.crf(), 18);
        assert_eq!(settings.video_codec.as_ffmpeg(), "libvpx-vp9");
        assert_eq!(settings.audio_codec.as_ffmpeg(), "libmp3lame");
        assert_eq!(settings.frame_rate.as_ffmpeg(), Some("30"));
        assert_eq!(settings.resolution.as_ffmpeg(), Some("1280x720"));
    }

    #[test]
    fn test_unknown_transition_rejected() {
        let result = serde_json::from_value::<MergeSettings>(json!({ "transition": "rotate" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_transition_wire_name_matches_xfade_name() {
        for transition in Transition::ALL {
            let wire = serde_json::to_value(transition).unwrap();
            assert_eq!(wire, json!(transition.as_xfade()));
        }
    }

    #[test]
    fn test_duration_bounds() {
        let mut settings = MergeSettings::default();
        for ok in [0.5, 1.0, 5.0] {
            settings.transition_duration = ok;
            assert!(settings.validate().is_ok(), "{ok} should be accepted");
        }
        for bad in [0.0, 0.4, 5.1, f64::NAN] {
            settings.transition_duration = bad;
            assert!(settings.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_output_filename_rules() {
        assert!(validate_output_filename("out.mp4").is_ok());
        assert!(validate_output_filename("").is_err());
        assert!(validate_output_filename("   ").is_err());
        assert!(validate_output_filename("../out.mp4").is_err());
        assert!(validate_output_filename("a\\b.mp4").is_err());
        assert!(validate_output_filename("..").is_err());
    }
}
