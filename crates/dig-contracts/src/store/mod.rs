//! File-backed persistence for generation history, the prompt library,
//! chat transcripts and recently used prompts.
//!
//! Every table is a pretty-printed JSON array under the store root. Writers
//! always re-read the file before changing it, so two store handles on the
//! same root never lose each other's rows, and a table that fails to parse
//! is left alone rather than replaced.

mod chat;
mod library;
mod local;
mod recents;

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

pub use chat::{ChatMessage, ChatSessionSummary};
pub use library::{
    LibraryEntry, LibraryEntryWithImages, LibraryLike, LibraryUpdate, LikeState, NewLibraryEntry,
};
pub use local::{
    url_to_path, HistoryEntry, ImageKind, ImageSet, LocalStore, PromptRecord, RecordImage,
};
pub use recents::{RecentPrompts, RECENT_PROMPTS_CAP};

pub const PROMPTS_TABLE: &str = "prompts.json";
pub const PROMPT_IMAGES_TABLE: &str = "prompt_images.json";
pub const LIBRARY_TABLE: &str = "prompt_library.json";
pub const LIBRARY_LIKES_TABLE: &str = "prompt_library_likes.json";
pub const CHAT_MESSAGES_TABLE: &str = "chat_messages.json";
pub const STORAGE_BUCKET: &str = "generation_images";

#[derive(Debug, Clone)]
pub(crate) struct JsonTable<T> {
    path: PathBuf,
    _rows: std::marker::PhantomData<T>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _rows: std::marker::PhantomData,
        }
    }

    /// Rows for readers. A damaged table is reported and reads as empty;
    /// it is never written over.
    pub(crate) fn load(&self) -> Vec<T> {
        match self.try_load() {
            Ok(rows) => rows,
            Err(err) => {
                eprintln!("dig warning: {err:#}");
                Vec::new()
            }
        }
    }

    /// A missing or blank file is an empty table; anything else must parse.
    pub(crate) fn try_load(&self) -> anyhow::Result<Vec<T>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("table {} is damaged", self.path.display()))
    }

    pub(crate) fn save(&self, rows: &[T]) -> anyhow::Result<()> {
        write_atomic(&self.path, &serde_json::to_string_pretty(rows)?)
    }

    /// Re-reads the table, applies `change` and writes the result back.
    /// Refuses to touch a table that does not parse.
    pub(crate) fn update<R>(&self, change: impl FnOnce(&mut Vec<T>) -> R) -> anyhow::Result<R> {
        let mut rows = self.try_load()?;
        let out = change(&mut rows);
        self.save(&rows)?;
        Ok(out)
    }
}

/// Writes `body` to a sibling temp file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, body: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(body.as_bytes())?;
    staged
        .persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Keeps user ids usable as a single path segment.
pub(crate) fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "anonymous".to_string(),
        value => value.to_string(),
    }
}
