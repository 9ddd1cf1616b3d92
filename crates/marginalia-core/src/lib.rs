use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("store rejected request: {0}")]
    Store(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    ListItem,
}

/// One addressable unit of rendered page text: a paragraph or a list item.
///
/// Blocks come out of the render pipeline in page order with consecutive
/// `block_index` values starting at 0. `plain_text` is the visible text with
/// inline formatting flattened away; every persisted offset in this crate is
/// a char offset into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedBlock {
    pub block_index: usize,
    pub plain_text: String,
    pub kind: BlockKind,
    /// Structural context for display and debugging ("list 1 > item 2").
    /// Matching never consults it; duplicate blocks tie-break by page order.
    pub container_path: String,
}

/// Char-offset anchor captured when a thread is created. Immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Anchor {
    pub text_ref: String,
    pub text_ref_start: usize,
    pub text_ref_end: usize,
}

impl Anchor {
    /// Creation-time invariant: span length equals the text length in chars.
    /// Records fetched from older stores may not satisfy this.
    pub fn is_consistent(&self) -> bool {
        self.text_ref_end >= self.text_ref_start
            && self.text_ref_end - self.text_ref_start == self.text_ref.chars().count()
    }
}

/// Half-open char-offset span inside a block's `plain_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

/// One reply inside a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    /// Position within the thread; the opening comment has index 0.
    pub index: i64,
    pub markdown: String,
    pub created_by: String,
    /// ISO-8601 creation time as reported by the store; carried opaquely.
    pub created: Option<String>,
}

/// A comment thread anchored to a span of rendered section text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentThread {
    pub id: i64,
    /// Opaque section key ("repo.theme.course.section"). Threads only ever
    /// match blocks rendered for the same section.
    pub section: String,
    pub text_ref: String,
    pub text_ref_start: usize,
    pub text_ref_end: usize,
    pub resolved: bool,
    /// Visible to instructors and admins only.
    pub instructor_only: bool,
    /// Email of the creator; drives the ownership predicates below.
    pub created_by: String,
    pub comments: Vec<Comment>,
}

impl CommentThread {
    pub fn anchor(&self) -> Anchor {
        Anchor {
            text_ref: self.text_ref.clone(),
            text_ref_start: self.text_ref_start,
            text_ref_end: self.text_ref_end,
        }
    }

    /// A thread with an empty textRef can never be matched to a block.
    pub fn is_anchorable(&self) -> bool {
        !self.text_ref.trim().is_empty()
    }

    pub fn visible_to(&self, viewer: &Viewer) -> bool {
        !self.instructor_only || viewer.is_staff()
    }

    /// Staff or the thread's creator may toggle resolution.
    pub fn resolvable_by(&self, viewer: &Viewer) -> bool {
        viewer.is_staff() || viewer.email == self.created_by
    }

    /// Admins or the thread's creator may delete it.
    pub fn deletable_by(&self, viewer: &Viewer) -> bool {
        viewer.role == Role::Admin || viewer.email == self.created_by
    }
}

/// Client-side payload for creating a thread on a freshly anchored span.
/// The store assigns the id and the first comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadDraft {
    pub section: String,
    pub anchor: Anchor,
    pub initial_comment_markdown: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

/// The already-authenticated current user, as far as this subsystem cares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewer {
    pub email: String,
    pub role: Role,
}

impl Viewer {
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Instructor)
    }
}

/// Remote CRUD store for comment threads.
///
/// Fetching and creating are asynchronous; a page render must never block on
/// them. Transport failures are `Error::Fetch` and callers at the page-load
/// boundary degrade them to an empty thread list (see `marginalia-local`).
#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    /// All threads recorded for `section`, in store order.
    async fn threads_for_section(&self, section: &str) -> Result<Vec<CommentThread>>;
    /// Persist a new thread; the store assigns ids and echoes the record.
    async fn create_thread(&self, draft: &ThreadDraft) -> Result<CommentThread>;
}
