use marginalia_core::{Anchor, Comment, CommentThread, Error, Result, ThreadDraft, ThreadStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub mod anchor;
pub mod blocks;
pub mod locate;
pub mod matcher;
pub mod textprep;

/// Env var naming the backend base URL, e.g. `https://course.example.org/`.
pub const BASE_URL_ENV: &str = "MARGINALIA_BASE_URL";

const THREADS_PATH: &str = "api/commentThread";

/// Comment-thread client for one course backend instance.
///
/// The backend wraps everything in envelopes: `GET /api/commentThread?section=X`
/// answers `{"commentThreads": [...]}` and `POST /api/commentThread` answers
/// `{"commentThread": {...}}`, with failures as `{"error": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpThreadStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpThreadStore {
    /// Build a store for `base` with its own timeout-configured client.
    pub fn new(base: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("marginalia/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self::with_client(client, base))
    }

    /// Build around a caller-shared `reqwest::Client`. The base path is
    /// normalized to end in `/` so the API path joins under it instead of
    /// replacing the last segment.
    pub fn with_client(client: reqwest::Client, base: Url) -> Self {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    /// Build from `MARGINALIA_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(BASE_URL_ENV)
            .map_err(|_| Error::NotConfigured(format!("{BASE_URL_ENV} is not set")))?;
        let base = Url::parse(raw.trim())
            .map_err(|e| Error::NotConfigured(format!("{BASE_URL_ENV}: {e}")))?;
        Self::new(base)
    }

    fn endpoint(&self) -> Result<Url> {
        self.base
            .join(THREADS_PATH)
            .map_err(|e| Error::Fetch(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ThreadStore for HttpThreadStore {
    async fn threads_for_section(&self, section: &str) -> Result<Vec<CommentThread>> {
        let url = self.endpoint()?;
        let resp = self
            .client
            .get(url)
            .query(&[("section", section)])
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        let body: ThreadsEnvelope = resp
            .json()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        if let Some(message) = body.error {
            return Err(Error::Store(message));
        }
        if !status.is_success() {
            return Err(Error::Store(format!("unexpected status {status}")));
        }
        let total = body.comment_threads.len();
        let threads: Vec<CommentThread> = body
            .comment_threads
            .into_iter()
            .filter_map(WireThread::into_thread)
            .collect();
        if threads.len() < total {
            tracing::warn!(
                section,
                skipped = total - threads.len(),
                "dropped malformed thread records"
            );
        }
        Ok(threads)
    }

    async fn create_thread(&self, draft: &ThreadDraft) -> Result<CommentThread> {
        let url = self.endpoint()?;
        let resp = self
            .client
            .post(url)
            .json(&CreateBody::from(draft))
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        let body: ThreadEnvelope = resp
            .json()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        if let Some(message) = body.error {
            return Err(Error::Store(message));
        }
        if !status.is_success() {
            return Err(Error::Store(format!("unexpected status {status}")));
        }
        body.comment_thread
            .and_then(WireThread::into_thread)
            .ok_or_else(|| Error::InvalidRecord("created thread missing from response".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ThreadsEnvelope {
    #[serde(rename = "commentThreads", default)]
    comment_threads: Vec<WireThread>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadEnvelope {
    #[serde(rename = "commentThread", default)]
    comment_thread: Option<WireThread>,
    #[serde(default)]
    error: Option<String>,
}

/// One thread row as stored. Records are camelCase and replies ride under
/// the ORM's literal `"Comment"` key. Everything is optional so a single bad
/// row cannot poison deserialization of the whole page; rows missing their
/// required fields are skipped with a warning.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireThread {
    id: Option<i64>,
    section: Option<String>,
    text_ref: Option<String>,
    text_ref_start: Option<i64>,
    text_ref_end: Option<i64>,
    #[serde(default)]
    resolved: bool,
    #[serde(default)]
    instructor_only: bool,
    #[serde(default)]
    created_by_email: Option<String>,
    #[serde(rename = "Comment", default)]
    comments: Vec<WireComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireComment {
    id: Option<i64>,
    index: Option<i64>,
    markdown: Option<String>,
    #[serde(default)]
    created_by_email: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

impl WireThread {
    /// Domain thread, or `None` when required fields are absent. Production
    /// data contains offsets of -1 from legacy clients; those clamp to 0.
    fn into_thread(self) -> Option<CommentThread> {
        let id = self.id?;
        let section = self.section?;
        let text_ref = self.text_ref?;
        let mut comments: Vec<Comment> = self
            .comments
            .into_iter()
            .filter_map(WireComment::into_comment)
            .collect();
        comments.sort_by_key(|c| c.index);
        Some(CommentThread {
            id,
            section,
            text_ref,
            text_ref_start: clamp_offset(self.text_ref_start),
            text_ref_end: clamp_offset(self.text_ref_end),
            resolved: self.resolved,
            instructor_only: self.instructor_only,
            created_by: self.created_by_email.unwrap_or_default(),
            comments,
        })
    }
}

impl WireComment {
    fn into_comment(self) -> Option<Comment> {
        Some(Comment {
            id: self.id?,
            index: self.index.unwrap_or(0),
            markdown: self.markdown?,
            created_by: self.created_by_email.unwrap_or_default(),
            created: self.created,
        })
    }
}

fn clamp_offset(raw: Option<i64>) -> usize {
    raw.map_or(0, |v| v.max(0) as usize)
}

#[derive(Debug, Serialize)]
struct CreateBody {
    #[serde(rename = "commentThread")]
    comment_thread: WireDraft,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDraft {
    section: String,
    text_ref: String,
    text_ref_start: usize,
    text_ref_end: usize,
    initial_comment_text: String,
}

impl From<&ThreadDraft> for CreateBody {
    fn from(draft: &ThreadDraft) -> Self {
        let Anchor {
            text_ref,
            text_ref_start,
            text_ref_end,
        } = draft.anchor.clone();
        Self {
            comment_thread: WireDraft {
                section: draft.section.clone(),
                text_ref,
                text_ref_start,
                text_ref_end,
                initial_comment_text: draft.initial_comment_markdown.clone(),
            },
        }
    }
}

// Env vars are process-global; every test that mutates them, in any module
// of this crate, serializes on this lock.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
