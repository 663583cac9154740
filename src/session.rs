use crate::error::{MergeError, MergeResult};
use crate::ffmpeg::VideoInfo;
use crate::ffmpeg::settings::is_plain_file_name;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

pub fn is_supported_video(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Upload names end up in the concat list, so they must not point anywhere else
pub fn validate_upload_name(name: &str) -> MergeResult<()> {
    if !is_plain_file_name(name) {
        return Err(MergeError::InvalidUploadName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct UploadedVideo {
    pub name: String,
    pub data: Bytes,
    pub info: Option<VideoInfo>,
}

/// Result of the last successful merge
#[derive(Debug, Clone)]
pub struct MergedVideo {
    pub filename: String,
    pub data: Bytes,
    pub command: String,
}

#[derive(Debug)]
pub struct Session {
    pub uploads: Vec<UploadedVideo>,
    pub output: Option<MergedVideo>,
    pub merging: bool,
    last_seen: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            uploads: Vec::new(),
            output: None,
            merging: false,
            last_seen: Instant::now(),
        }
    }
}

/// Where an upload ended up in the session list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    New(usize),
    Duplicate(usize),
}

/// Transient per-browser state; nothing here outlives the process.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<TokioMutex<HashMap<String, Session>>>,
}

impl SessionStore {
    pub async fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.lock().await.insert(id.clone(), Session::new());
        info!(session_id = %id, "Session created");
        id
    }

    /// Runs `f` on the session, marking it as recently used
    pub async fn with_session<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> MergeResult<R>,
    ) -> MergeResult<R> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id).ok_or(MergeError::SessionNotFound)?;
        session.last_seen = Instant::now();
        f(session)
    }

    pub async fn remove(&self, id: &str) -> MergeResult<()> {
        match self.sessions.lock().await.remove(id) {
            Some(session) => {
                info!(
                    session_id = %id,
                    uploads = session.uploads.len(),
                    "Session ended"
                );
                Ok(())
            }
            None => Err(MergeError::SessionNotFound),
        }
    }

    pub async fn append_upload(&self, id: &str, upload: UploadedVideo) -> MergeResult<Appended> {
        self.with_session(id, |session| {
            if let Some(index) = session
                .uploads
                .iter()
                .position(|u| u.name == upload.name && u.data == upload.data)
            {
                return Ok(Appended::Duplicate(index));
            }
            session.uploads.push(upload);
            Ok(Appended::New(session.uploads.len() - 1))
        })
        .await
    }

    pub async fn remove_upload(&self, id: &str, index: usize) -> MergeResult<UploadedVideo> {
        self.with_session(id, |session| {
            if index >= session.uploads.len() {
                return Err(MergeError::UploadNotFound(index));
            }
            Ok(session.uploads.remove(index))
        })
        .await
    }

    /// Marks the session busy and hands out its uploads, at most one merge at a time.
    ///
    /// The busy mark lives as long as the returned guard. Dropping the guard
    /// without calling [`MergeGuard::finish`] (a cancelled request) clears it.
    pub async fn begin_merge(
        &self,
        id: &str,
        required: usize,
    ) -> MergeResult<(MergeGuard, Vec<UploadedVideo>)> {
        let uploads = self
            .with_session(id, |session| {
                if session.merging {
                    return Err(MergeError::MergeInProgress);
                }
                if session.uploads.len() < required {
                    return Err(MergeError::NotEnoughVideos {
                        required,
                        actual: session.uploads.len(),
                    });
                }
                session.merging = true;
                Ok(session.uploads.clone())
            })
            .await?;
        let guard = MergeGuard {
            store: self.clone(),
            id: id.to_string(),
            finished: false,
        };
        Ok((guard, uploads))
    }

    /// Clears the busy flag, keeping `output` when the merge succeeded
    async fn finish_merge(&self, id: &str, output: Option<MergedVideo>) {
        let result = self
            .with_session(id, |session| {
                session.merging = false;
                if output.is_some() {
                    session.output = output;
                }
                Ok(())
            })
            .await;
        if result.is_err() {
            debug!(session_id = %id, "Session ended while merging, result dropped");
        }
    }

    pub async fn output(&self, id: &str) -> MergeResult<MergedVideo> {
        self.with_session(id, |session| session.output.clone().ok_or(MergeError::NoOutput))
            .await
    }

    /// Drops sessions idle for longer than `ttl`, returning how many went away
    pub async fn expire(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.merging || session.last_seen.elapsed() < ttl;
            if !keep {
                info!(session_id = %id, "Session expired");
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Busy mark of a running merge, handed out by [`SessionStore::begin_merge`]
pub struct MergeGuard {
    store: SessionStore,
    id: String,
    finished: bool,
}

impl MergeGuard {
    /// Clears the busy mark, keeping `output` when the merge succeeded
    pub async fn finish(mut self, output: Option<MergedVideo>) {
        self.finished = true;
        self.store.finish_merge(&self.id, output).await;
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(session_id = %self.id, "Merge abandoned before it finished");

        if let Ok(mut sessions) = self.store.sessions.try_lock() {
            if let Some(session) = sessions.get_mut(&self.id) {
                session.merging = false;
            }
            return;
        }
        // lock is contended, clear the mark once it frees up
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let id = std::mem::take(&mut self.id);
            handle.spawn(async move { store.finish_merge(&id, None).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, data: &'static [u8]) -> UploadedVideo {
        UploadedVideo {
            name: name.to_string(),
            data: Bytes::from_static(data),
            info: None,
        }
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_video("clip.mp4"));
        assert!(is_supported_video("CLIP.MOV"));
        assert!(is_supported_video("a.b.webm"));
        assert!(!is_supported_video("notes.txt"));
        assert!(!is_supported_video("mp4"));
        assert!(!is_supported_video(""));
    }

    #[test]
    fn test_upload_names_stay_plain() {
        assert!(validate_upload_name("clip.mp4").is_ok());
        assert!(validate_upload_name("my holiday..final.mkv").is_ok());
        for name in [
            "/etc/ssl/private/backup.mp4",
            "../../other/secret.mkv",
            "dir\\clip.mp4",
            "..",
            "clip\n.mp4",
            "",
        ] {
            assert!(
                matches!(
                    validate_upload_name(name),
                    Err(MergeError::InvalidUploadName(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_upload_lifecycle() {
        let store = SessionStore::default();
        let id = store.create().await;

        assert_eq!(
            store.append_upload(&id, upload("a.mp4", b"aaa")).await.unwrap(),
            Appended::New(0)
        );
        assert_eq!(
            store.append_upload(&id, upload("b.mp4", b"bbb")).await.unwrap(),
            Appended::New(1)
        );
        assert_eq!(
            store.append_upload(&id, upload("a.mp4", b"aaa")).await.unwrap(),
            Appended::Duplicate(0)
        );
        // same name, different bytes is a different file
        assert_eq!(
            store.append_upload(&id, upload("a.mp4", b"zzz")).await.unwrap(),
            Appended::New(2)
        );

        let removed = store.remove_upload(&id, 1).await.unwrap();
        assert_eq!(removed.name, "b.mp4");
        assert!(matches!(
            store.remove_upload(&id, 5).await,
            Err(MergeError::UploadNotFound(5))
        ));

        store.remove(&id).await.unwrap();
        assert!(matches!(
            store.append_upload(&id, upload("c.mp4", b"c")).await,
            Err(MergeError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_single_merge_per_session() {
        let store = SessionStore::default();
        let id = store.create().await;

        assert!(matches!(
            store.begin_merge(&id, 1).await,
            Err(MergeError::NotEnoughVideos {
                required: 1,
                actual: 0
            })
        ));

        store.append_upload(&id, upload("a.mp4", b"a")).await.unwrap();
        store.append_upload(&id, upload("b.mp4", b"b")).await.unwrap();

        let (guard, uploads) = store.begin_merge(&id, 2).await.unwrap();
        assert_eq!(uploads.len(), 2);
        assert!(matches!(
            store.begin_merge(&id, 2).await,
            Err(MergeError::MergeInProgress)
        ));
        assert!(matches!(store.output(&id).await, Err(MergeError::NoOutput)));

        guard
            .finish(Some(MergedVideo {
                filename: "out.mp4".into(),
                data: Bytes::from_static(b"merged"),
                command: "ffmpeg".into(),
            }))
            .await;
        assert_eq!(store.output(&id).await.unwrap().data, "merged");

        // a failed merge keeps the previous result
        let (guard, _) = store.begin_merge(&id, 2).await.unwrap();
        guard.finish(None).await;
        assert_eq!(store.output(&id).await.unwrap().filename, "out.mp4");
    }

    #[tokio::test]
    async fn test_dropped_merge_releases_session() {
        let store = SessionStore::default();
        let id = store.create().await;
        store.append_upload(&id, upload("a.mp4", b"a")).await.unwrap();
        store.append_upload(&id, upload("b.mp4", b"b")).await.unwrap();

        let (guard, _) = store.begin_merge(&id, 2).await.unwrap();
        assert_eq!(store.expire(Duration::ZERO).await, 0);
        drop(guard);

        let (guard, _) = store.begin_merge(&id, 2).await.unwrap();
        drop(guard);
        assert_eq!(store.expire(Duration::ZERO).await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_merge_under_contended_lock() {
        let store = SessionStore::default();
        let id = store.create().await;
        store.append_upload(&id, upload("a.mp4", b"a")).await.unwrap();
        let (guard, _) = store.begin_merge(&id, 1).await.unwrap();

        let held = store.sessions.lock().await;
        drop(guard);
        drop(held);
        tokio::task::yield_now().await;

        assert!(store.begin_merge(&id, 1).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_idle_sessions() {
        let store = SessionStore::default();
        let idle = store.create().await;
        let busy = store.create().await;
        store.append_upload(&busy, upload("a.mp4", b"a")).await.unwrap();
        let (_guard, _) = store.begin_merge(&busy, 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = store.create().await;

        assert_eq!(store.expire(Duration::from_secs(10)).await, 1);
        assert_eq!(store.len().await, 2);
        assert!(matches!(
            store.output(&idle).await,
            Err(MergeError::SessionNotFound)
        ));
        assert!(matches!(store.output(&fresh).await, Err(MergeError::NoOutput)));
    }
}
