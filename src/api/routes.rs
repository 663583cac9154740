use crate::error::{MergeError, MergeResult};
use crate::ffmpeg::command::{MIN_CONCAT_INPUTS, MIN_TRANSITION_INPUTS};
use crate::ffmpeg::settings::{
    AudioCodec, FrameRate, MAX_TRANSITION_SECS, MIN_TRANSITION_SECS, Quality, Resolution,
    Transition, VideoCodec, validate_output_filename,
};
use crate::ffmpeg::{
    ClipInfo, MergeSettings, ToolCommand, VideoInfo, concat_command, concat_list, merge_command,
    probe, run_piped,
};
use crate::AppState;
use crate::session::{
    Appended, MergeGuard, MergedVideo, UploadedVideo, is_supported_video, validate_upload_name,
};
use axum::body::Body;
use axum::extract::{Extension, Path as AxumPath, Query};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use axum::response::{Html, IntoResponse, Json};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime_guess::from_path;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::io::Error as IoError;
use tracing::{debug, error, info, warn};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// RFC 5987 `attr-char` minus the alphanumerics
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct UploadSummary {
    pub index: usize,
    pub name: String,
    pub size: usize,
    pub info: Option<VideoInfo>,
}

#[derive(Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub uploads: Vec<UploadSummary>,
    pub merging: bool,
    pub output_filename: Option<String>,
    pub output_size: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub upload: UploadSummary,
    pub duplicate: bool,
}

#[derive(Deserialize)]
pub struct UploadParams {
    /// ?filename=your_video.mp4
    pub filename: String,
}

#[derive(Deserialize, Default)]
pub struct OutputParams {
    /// ?download=true serves the video as an attachment
    #[serde(default)]
    pub download: bool,
}

#[derive(Serialize, Deserialize)]
pub struct CommandResponse {
    pub program: String,
    pub args: Vec<String>,
    pub display: String,
}

impl From<&ToolCommand> for CommandResponse {
    fn from(cmd: &ToolCommand) -> Self {
        Self {
            program: cmd.program.clone(),
            args: cmd.args.clone(),
            display: cmd.display(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct MergeResponse {
    pub output_filename: String,
    pub size: usize,
    pub command: String,
}

#[derive(Serialize)]
pub struct Choice {
    pub value: serde_json::Value,
    pub label: String,
}

fn choices<T: Serialize + Copy>(items: &[T], label: impl Fn(T) -> String) -> Vec<Choice> {
    items
        .iter()
        .map(|&item| Choice {
            value: serde_json::to_value(item).unwrap_or_default(),
            label: label(item),
        })
        .collect()
}

#[derive(Serialize)]
pub struct OptionsResponse {
    pub transitions: Vec<Choice>,
    pub qualities: Vec<Choice>,
    pub video_codecs: Vec<Choice>,
    pub audio_codecs: Vec<Choice>,
    pub frame_rates: Vec<Choice>,
    pub resolutions: Vec<Choice>,
    pub min_transition_duration: f64,
    pub max_transition_duration: f64,
    pub extensions: Vec<&'static str>,
    pub defaults: MergeSettings,
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health(Extension(state): Extension<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "ffmpeg": state.tools.ffmpeg,
        "ffprobe": state.tools.ffprobe,
        "sessions": state.sessions.len().await,
    }))
}

pub async fn options() -> Json<OptionsResponse> {
    Json(OptionsResponse {
        transitions: choices(&Transition::ALL, |t| t.label().to_string()),
        qualities: choices(&Quality::ALL, |q| format!("{q:?} (CRF {})", q.crf())),
        video_codecs: choices(&VideoCodec::ALL, |c| c.as_ffmpeg().to_string()),
        audio_codecs: choices(&AudioCodec::ALL, |c| c.as_ffmpeg().to_string()),
        frame_rates: choices(&FrameRate::ALL, |r| {
            r.as_ffmpeg().map_or("Keep original".into(), |fps| format!("{fps} fps"))
        }),
        resolutions: choices(&Resolution::ALL, |r| {
            r.as_ffmpeg().unwrap_or("Keep original").to_string()
        }),
        min_transition_duration: MIN_TRANSITION_SECS,
        max_transition_duration: MAX_TRANSITION_SECS,
        extensions: crate::session::SUPPORTED_EXTENSIONS.to_vec(),
        defaults: MergeSettings::default(),
    })
}

pub async fn create_session(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let session_id = state.sessions.create().await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn get_session(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> MergeResult<Json<SessionResponse>> {
    let response = state
        .sessions
        .with_session(&session_id, |session| {
            Ok(SessionResponse {
                session_id: session_id.clone(),
                uploads: session
                    .uploads
                    .iter()
                    .enumerate()
                    .map(|(index, upload)| summarize(index, upload))
                    .collect(),
                merging: session.merging,
                output_filename: session.output.as_ref().map(|o| o.filename.clone()),
                output_size: session.output.as_ref().map(|o| o.data.len()),
            })
        })
        .await?;
    Ok(Json(response))
}

pub async fn delete_session(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> MergeResult<StatusCode> {
    state.sessions.remove(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn summarize(index: usize, upload: &UploadedVideo) -> UploadSummary {
    UploadSummary {
        index,
        name: upload.name.clone(),
        size: upload.data.len(),
        info: upload.info.clone(),
    }
}

async fn read_body(body: Body, limit: usize) -> MergeResult<Bytes> {
    let mut buf = BytesMut::new();
    let mut body_stream = body.into_data_stream();
    while let Some(chunk) = body_stream.next().await {
        let chunk = chunk.map_err(IoError::other)?;
        if buf.len() + chunk.len() > limit {
            return Err(MergeError::UploadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

pub async fn upload_video(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Query(params): Query<UploadParams>,
    body: Body,
) -> MergeResult<impl IntoResponse> {
    let name = params.filename.trim().to_string();
    validate_upload_name(&name)?;
    if !is_supported_video(&name) {
        return Err(MergeError::UnsupportedFormat(name));
    }
    // fail before buffering the body for a session that does not exist
    state.sessions.with_session(&session_id, |_| Ok(())).await?;

    let data = read_body(body, state.max_upload_bytes).await?;
    if data.is_empty() {
        return Err(MergeError::EmptyUpload);
    }
    info!(%session_id, %name, size = data.len(), "Video uploaded");

    let info = if state.can_probe() {
        probe(&state.ffprobe_path, &name, data.clone()).await
    } else {
        None
    };

    let upload = UploadedVideo { name, data, info };
    let appended = state
        .sessions
        .append_upload(&session_id, upload.clone())
        .await?;

    let (status, index, duplicate) = match appended {
        Appended::New(index) => (StatusCode::CREATED, index, false),
        Appended::Duplicate(index) => {
            debug!(%session_id, index, "Upload already in session");
            (StatusCode::OK, index, true)
        }
    };

    Ok((
        status,
        Json(UploadResponse {
            upload: summarize(index, &upload),
            duplicate,
        }),
    ))
}

pub async fn delete_upload(
    Extension(state): Extension<AppState>,
    AxumPath((session_id, index)): AxumPath<(String, usize)>,
) -> MergeResult<StatusCode> {
    let removed = state.sessions.remove_upload(&session_id, index).await?;
    info!(%session_id, index, name = %removed.name, "Upload removed");
    Ok(StatusCode::NO_CONTENT)
}

fn clip_infos(uploads: &[UploadedVideo]) -> Vec<ClipInfo> {
    uploads
        .iter()
        .map(|upload| ClipInfo::from(upload.info.as_ref()))
        .collect()
}

pub async fn merge_command_preview(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Json(settings): Json<MergeSettings>,
) -> MergeResult<Json<CommandResponse>> {
    let clips = state
        .sessions
        .with_session(&session_id, |session| Ok(clip_infos(&session.uploads)))
        .await?;
    let cmd = merge_command(&state.ffmpeg_path, &clips, &settings, state.threads)?;
    Ok(Json(CommandResponse::from(&cmd)))
}

/// Runs `cmd` over the session's uploads and stores what it produces
async fn run_merge(
    session_id: &str,
    cmd: MergeResult<ToolCommand>,
    inputs: Vec<Bytes>,
    filename: String,
) -> MergeResult<MergedVideo> {
    let cmd = cmd?;
    let command = cmd.display();
    info!(%session_id, %command, "Merge started");

    let data = run_piped(&cmd, inputs).await?;
    if data.is_empty() {
        return Err(MergeError::ToolFailed {
            tool: cmd.program.clone(),
            status: "no output".into(),
            stderr: String::new(),
        });
    }

    Ok(MergedVideo {
        filename,
        data: Bytes::from(data),
        command,
    })
}

async fn finish(
    guard: MergeGuard,
    session_id: &str,
    result: MergeResult<MergedVideo>,
) -> MergeResult<Json<MergeResponse>> {
    guard.finish(result.as_ref().ok().cloned()).await;

    match result {
        Ok(merged) => {
            info!(%session_id, size = merged.data.len(), "Merge finished");
            Ok(Json(MergeResponse {
                output_filename: merged.filename,
                size: merged.data.len(),
                command: merged.command,
            }))
        }
        Err(error) => {
            error!(%session_id, %error, "Merge failed");
            Err(error)
        }
    }
}

pub async fn merge_videos(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Json(settings): Json<MergeSettings>,
) -> MergeResult<Json<MergeResponse>> {
    let (guard, uploads) = state
        .sessions
        .begin_merge(&session_id, MIN_TRANSITION_INPUTS)
        .await?;

    let cmd = merge_command(&state.ffmpeg_path, &clip_infos(&uploads), &settings, state.threads);
    let inputs = uploads.into_iter().map(|u| u.data).collect();
    let result = run_merge(
        &session_id,
        cmd,
        inputs,
        settings.output_filename.clone(),
    )
    .await;

    finish(guard, &session_id, result).await
}

pub async fn concat_videos(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Json(settings): Json<MergeSettings>,
) -> MergeResult<Json<MergeResponse>> {
    validate_output_filename(&settings.output_filename)?;
    let (guard, uploads) = state
        .sessions
        .begin_merge(&session_id, MIN_CONCAT_INPUTS)
        .await?;

    let list = concat_list(uploads.iter().map(|u| u.name.as_str()));
    let result = run_merge(
        &session_id,
        Ok(concat_command(&state.ffmpeg_path)),
        vec![Bytes::from(list)],
        settings.output_filename.clone(),
    )
    .await;

    finish(guard, &session_id, result).await
}

/// Resolves a `Range` header against `size`; `None` when it cannot be satisfied.
fn parse_range(headers: &HeaderMap, size: u64) -> Option<(StatusCode, u64, u64)> {
    let last = size.checked_sub(1)?;
    if let Some(rh) = headers.get(header::RANGE)
        && let Ok(s) = rh.to_str()
        && let Some(stripped) = s.strip_prefix("bytes=")
        && let Some((start, end)) = stripped.split_once('-')
    {
        let (start, end) = match (start.trim().parse::<u64>(), end.trim().parse::<u64>()) {
            (Ok(start), Ok(end)) => (start, end.min(last)),
            (Ok(start), Err(_)) => (start, last),
            // bytes=-N asks for the final N bytes
            (Err(_), Ok(suffix)) if suffix > 0 => (size.saturating_sub(suffix), last),
            _ => return Some((StatusCode::OK, 0, last)),
        };
        if start > end {
            return None;
        }
        return Some((StatusCode::PARTIAL_CONTENT, start, end));
    }

    Some((StatusCode::OK, 0, last))
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// `filename` goes out twice: an ASCII fallback and the RFC 6266 `filename*` form.
fn content_disposition(disposition: &str, filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && !matches!(c, '"' | '\\')) {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, FILENAME_ENCODE_SET);
    format!("{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

pub async fn download_output(
    Extension(state): Extension<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Query(params): Query<OutputParams>,
    headers: HeaderMap,
) -> MergeResult<Response<Body>> {
    let output = state.sessions.output(&session_id).await?;
    let size = output.data.len() as u64;

    let Some((status, start, end)) = parse_range(&headers, size) else {
        warn!(%session_id, size, "Unsatisfiable range requested");
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
        res.headers_mut().insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes */{size}")),
        );
        return Ok(res);
    };
    let len = end - start + 1;
    debug!(%session_id, start, end, size, "Serving merged video");

    let body = output.data.slice(start as usize..=end as usize);
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = status;

    let disposition = if params.download { "attachment" } else { "inline" };
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header_value(from_path(&output.filename).first_or_octet_stream().as_ref()),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::CONTENT_LENGTH, header_value(&len.to_string()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(disposition, &output.filename)),
    );
    if status == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{size}")),
        );
    }
    Ok(res)
}
