use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    path_segment, JsonTable, CHAT_MESSAGES_TABLE, LIBRARY_LIKES_TABLE, LIBRARY_TABLE,
    PROMPTS_TABLE, PROMPT_IMAGES_TABLE, STORAGE_BUCKET,
};
use crate::store::chat::ChatMessage;
use crate::events::now_utc_iso;
use crate::store::library::{LibraryEntry, LibraryLike};

/// One saved generation: the prompt that was actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub user_id: String,
    pub prompt_text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Input,
    Output,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordImage {
    pub id: String,
    pub prompt_id: String,
    pub image_url: String,
    pub image_type: ImageKind,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl ImageSet {
    fn from_rows<'a>(rows: impl Iterator<Item = &'a RecordImage>) -> Self {
        let mut set = Self::default();
        for row in rows {
            match row.image_type {
                ImageKind::Input => set.inputs.push(row.image_url.clone()),
                ImageKind::Output => set.outputs.push(row.image_url.clone()),
            }
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: PromptRecord,
    pub images: ImageSet,
}

/// Local stand-in for the hosted database and object storage.
///
/// Layout under `root`:
///
/// ```text
/// prompts.json
/// prompt_images.json
/// prompt_library.json
/// prompt_library_likes.json
/// storage/generation_images/{user}/{record}/{input|output}_{ts}.{ext}
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn prompts(&self) -> JsonTable<PromptRecord> {
        JsonTable::new(self.root.join(PROMPTS_TABLE))
    }

    pub(crate) fn prompt_images(&self) -> JsonTable<RecordImage> {
        JsonTable::new(self.root.join(PROMPT_IMAGES_TABLE))
    }

    pub(crate) fn library(&self) -> JsonTable<LibraryEntry> {
        JsonTable::new(self.root.join(LIBRARY_TABLE))
    }

    pub(crate) fn likes(&self) -> JsonTable<LibraryLike> {
        JsonTable::new(self.root.join(LIBRARY_LIKES_TABLE))
    }

    pub(crate) fn chat_messages(&self) -> JsonTable<ChatMessage> {
        JsonTable::new(self.root.join(CHAT_MESSAGES_TABLE))
    }

    pub fn create_record(&self, user_id: &str, prompt_text: &str) -> anyhow::Result<PromptRecord> {
        let record = PromptRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            prompt_text: prompt_text.to_string(),
            created_at: now_utc_iso(),
        };
        self.prompts()
            .update(|rows| rows.push(record.clone()))
            .context("failed to save prompt record")?;
        Ok(record)
    }

    /// Stores one image file and returns its `file://` url.
    pub fn upload_image(
        &self,
        user_id: &str,
        record_id: &str,
        kind: ImageKind,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let dir = self
            .root
            .join("storage")
            .join(STORAGE_BUCKET)
            .join(path_segment(user_id))
            .join(path_segment(record_id));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let stem = format!("{}_{}", kind.as_str(), Utc::now().timestamp_millis());
        let mut path = dir.join(format!("{stem}.{extension}"));
        let mut suffix = 1usize;
        while path.exists() {
            path = dir.join(format!("{stem}_{suffix}.{extension}"));
            suffix += 1;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to upload {}", path.display()))?;
        file_url(&path)
    }

    pub fn attach_images(
        &self,
        record_id: &str,
        images: &[(ImageKind, String)],
    ) -> anyhow::Result<Vec<RecordImage>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let created_at = now_utc_iso();
        let rows: Vec<RecordImage> = images
            .iter()
            .map(|(kind, url)| RecordImage {
                id: uuid::Uuid::new_v4().to_string(),
                prompt_id: record_id.to_string(),
                image_url: url.clone(),
                image_type: *kind,
                created_at: created_at.clone(),
            })
            .collect();
        self.prompt_images()
            .update(|table| table.extend(rows.iter().cloned()))
            .context("failed to link images to prompt record")?;
        Ok(rows)
    }

    pub fn record_images(&self, record_id: &str) -> ImageSet {
        let rows = self.prompt_images().load();
        ImageSet::from_rows(rows.iter().filter(|row| row.prompt_id == record_id))
    }

    /// A user's generations, newest first.
    pub fn list_history(&self, user_id: &str, limit: usize) -> Vec<HistoryEntry> {
        let mut records: Vec<PromptRecord> = self
            .prompts()
            .load()
            .into_iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);

        let images = self.prompt_images().load();
        records
            .into_iter()
            .map(|record| {
                let set = ImageSet::from_rows(images.iter().filter(|row| row.prompt_id == record.id));
                HistoryEntry {
                    record,
                    images: set,
                }
            })
            .collect()
    }

    pub fn get_record(&self, record_id: &str) -> Option<PromptRecord> {
        self.prompts()
            .load()
            .into_iter()
            .find(|record| record.id == record_id)
    }
}

fn file_url(path: &Path) -> anyhow::Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| anyhow!("{} has no file url", absolute.display()))
}

/// Resolves a `file://` url produced by [`LocalStore::upload_image`].
pub fn url_to_path(url: &str) -> Option<PathBuf> {
    Url::parse(url)
        .ok()
        .filter(|parsed| parsed.scheme() == "file")?
        .to_file_path()
        .ok()
}
