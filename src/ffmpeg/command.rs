use crate::error::{MergeError, MergeResult};
use crate::ffmpeg::probe::VideoInfo;
use crate::ffmpeg::settings::{AudioCodec, MergeSettings, Transition, VideoCodec};
use serde::Serialize;

/// mp4 written to a pipe cannot seek back to place the moov atom
const PIPE_MOVFLAGS: &str = "+frag_keyframe+empty_moov+default_base_moof";

pub const MIN_TRANSITION_INPUTS: usize = 2;
pub const MIN_CONCAT_INPUTS: usize = 1;

/// What the command builder needs to know about one input
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipInfo {
    pub duration: Option<f64>,
    pub has_audio: Option<bool>,
}

impl From<Option<&VideoInfo>> for ClipInfo {
    fn from(info: Option<&VideoInfo>) -> Self {
        match info {
            Some(info) => ClipInfo {
                duration: Some(info.duration),
                has_audio: Some(info.has_audio),
            },
            None => ClipInfo::default(),
        }
    }
}

/// A fully assembled external tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-like rendering for showing the command to a user
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+=:,./@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Seconds as the filter syntax wants them: at least one decimal, at most three
pub fn format_seconds(secs: f64) -> String {
    let mut out = format!("{secs:.3}");
    while out.ends_with('0') {
        out.pop();
    }
    if out.ends_with('.') {
        out.push('0');
    }
    out
}

/// Label of the stream produced by xfade link `index`
fn link_label(index: usize) -> String {
    format!("[vf{index}]")
}

/// Chained xfade links, each one blending the previous result into the next input.
///
/// Offsets are only emitted when every clip duration is known.
pub fn video_chain(clips: &[ClipInfo], transition: Transition, duration: f64) -> String {
    let durations = clips
        .iter()
        .map(|clip| clip.duration)
        .collect::<Option<Vec<_>>>();

    let mut elapsed = 0.0;
    (0..clips.len().saturating_sub(1))
        .map(|i| {
            let left = if i == 0 {
                "[0:v]".to_string()
            } else {
                link_label(i - 1)
            };
            let mut link = format!(
                "{left}[{}:v]xfade=transition={}:duration={}",
                i + 1,
                transition.as_xfade(),
                format_seconds(duration)
            );
            if let Some(durations) = &durations {
                elapsed += durations[i];
                let offset = (elapsed - (i + 1) as f64 * duration).max(0.0);
                link.push_str(&format!(":offset={}", format_seconds(offset)));
            }
            link.push_str(&link_label(i));
            link
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Concatenates every input's audio into `[outa]`
pub fn audio_chain(inputs: usize) -> String {
    let labels = (0..inputs).map(|i| format!("[{i}:a]")).collect::<String>();
    format!("{labels}concat=n={inputs}:v=0:a=1[outa]")
}

/// Audio is merged unless some input is known to lack it
fn include_audio(clips: &[ClipInfo]) -> bool {
    clips.iter().all(|clip| clip.has_audio != Some(false))
}

/// Every input is read from the tool's standard input, one after another.
pub fn merge_command(
    program: &str,
    clips: &[ClipInfo],
    settings: &MergeSettings,
    threads: usize,
) -> MergeResult<ToolCommand> {
    if clips.len() < MIN_TRANSITION_INPUTS {
        return Err(MergeError::NotEnoughVideos {
            required: MIN_TRANSITION_INPUTS,
            actual: clips.len(),
        });
    }
    settings.validate()?;

    let with_audio = include_audio(clips);
    if with_audio && settings.audio_codec == AudioCodec::Copy {
        return Err(MergeError::InvalidSettings(
            "audio_codec 'copy' cannot be used when audio is joined by a filter graph".into(),
        ));
    }

    let mut cmd = ToolCommand::new(program);
    cmd.args(["-hide_banner", "-y"]);
    for _ in clips {
        cmd.args(["-i", "pipe:0"]);
    }

    let mut filter = video_chain(clips, settings.transition, settings.transition_duration);
    if with_audio {
        filter.push(';');
        filter.push_str(&audio_chain(clips.len()));
    }
    cmd.arg("-filter_complex").arg(filter);
    cmd.arg("-map").arg(link_label(clips.len() - 2));
    if with_audio {
        cmd.args(["-map", "[outa]"]);
    }

    cmd.args(["-c:v", settings.video_codec.as_ffmpeg()]);
    cmd.arg("-crf").arg(settings.quality.crf().to_string());
    if settings.video_codec == VideoCodec::LibvpxVp9 {
        // constant quality mode for vp9
        cmd.args(["-b:v", "0"]);
    }
    if with_audio {
        cmd.args(["-c:a", settings.audio_codec.as_ffmpeg()]);
    } else {
        cmd.arg("-an");
    }
    if threads > 0 {
        cmd.arg("-threads").arg(threads.to_string());
    }
    cmd.args(["-movflags", PIPE_MOVFLAGS, "-f", "mp4"]);

    if let Some(size) = settings.resolution.as_ffmpeg() {
        cmd.args(["-s", size]);
    }
    if let Some(rate) = settings.frame_rate.as_ffmpeg() {
        cmd.args(["-r", rate]);
    }

    cmd.arg("pipe:1");
    Ok(cmd)
}

/// concat demuxer list, one `file` directive per upload
pub fn concat_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|name| format!("file '{}'", name.replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stream-copy join without transitions; the list is fed on standard input
pub fn concat_command(program: &str) -> ToolCommand {
    let mut cmd = ToolCommand::new(program);
    cmd.args([
        "-hide_banner",
        "-y",
        "-f",
        "concat",
        "-safe",
        "0",
        "-protocol_whitelist",
        "file,pipe",
        "-i",
        "-",
        "-c",
        "copy",
        "-movflags",
        PIPE_MOVFLAGS,
        "-f",
        "mp4",
        "pipe:1",
    ]);
    cmd
}
