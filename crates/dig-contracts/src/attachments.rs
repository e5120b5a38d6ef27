//! Reference images pending submission.
//!
//! Limits are enforced when files are added, never at submit time. Every
//! attachment owns exactly one [`PreviewHandle`]; the handle is revoked when
//! the attachment is dropped, so removal, clearing and manager teardown all
//! go through the same release path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;

use crate::codec::{self, DEFAULT_IMAGE_MEDIA_TYPE};
use crate::errors::{DigError, DigResult};
use crate::request::EncodedImage;

pub const MAX_ATTACHMENTS: usize = 5;
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    Memory(Vec<u8>),
    File(PathBuf),
}

/// A user-selected file before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub name: String,
    pub media_type: Option<String>,
    pub size: u64,
    pub source: PayloadSource,
}

impl RawFile {
    pub fn from_bytes(name: impl Into<String>, media_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.map(str::to_string),
            size: bytes.len() as u64,
            source: PayloadSource::Memory(bytes),
        }
    }

    /// Stats the file; the bytes are read later, during the encode phase.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let metadata =
            std::fs::metadata(path).with_context(|| format!("failed reading {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a file", path.display());
        }
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self {
            name,
            media_type: media_type_for_path(path).map(str::to_string),
            size: metadata.len(),
            source: PayloadSource::File(path.to_path_buf()),
        })
    }

    fn resolved_media_type(&self) -> String {
        self.media_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE)
            .to_ascii_lowercase()
    }
}

#[derive(Debug)]
pub struct Attachment {
    name: String,
    media_type: String,
    size: u64,
    source: PayloadSource,
    preview: PreviewHandle,
}

impl Attachment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    pub fn read_payload(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            PayloadSource::Memory(bytes) => Ok(bytes.clone()),
            PayloadSource::File(path) => std::fs::read(path),
        }
    }

    /// Reads and encodes the payload. `index` only feeds the error message.
    pub fn encode(&self, index: usize, max_bytes: u64) -> DigResult<EncodedImage> {
        let failed = |reason: String| DigError::EncodingFailed {
            index,
            name: self.name.clone(),
            reason,
        };
        let bytes = self.read_payload().map_err(|err| failed(err.to_string()))?;
        if bytes.len() as u64 > max_bytes {
            return Err(failed(format!(
                "payload grew to {} bytes after selection (limit {max_bytes})",
                bytes.len()
            )));
        }
        Ok(EncodedImage {
            mime_type: self.media_type.clone(),
            data: codec::encode(&bytes),
        })
    }
}

#[derive(Debug)]
pub struct AttachmentManager {
    items: Vec<Attachment>,
    previews: PreviewPool,
    max_count: usize,
    max_bytes: u64,
}

impl Default for AttachmentManager {
    fn default() -> Self {
        Self::new(PreviewPool::default())
    }
}

impl AttachmentManager {
    pub fn new(previews: PreviewPool) -> Self {
        Self::with_limits(previews, MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES)
    }

    pub fn with_limits(previews: PreviewPool, max_count: usize, max_bytes: u64) -> Self {
        Self {
            items: Vec::new(),
            previews,
            max_count,
            max_bytes,
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn can_add_more(&self) -> bool {
        self.items.len() < self.max_count
    }

    /// Admits the whole batch or none of it.
    pub fn add_files(&mut self, candidates: Vec<RawFile>) -> DigResult<&[Attachment]> {
        if candidates.is_empty() {
            return Ok(self.items.as_slice());
        }
        if self.items.len() + candidates.len() > self.max_count {
            return Err(DigError::TooManyAttachments {
                max: self.max_count,
                current: self.items.len(),
                adding: candidates.len(),
            });
        }
        for candidate in &candidates {
            let media_type = candidate.resolved_media_type();
            if !media_type.starts_with("image/") {
                return Err(DigError::InvalidMediaType {
                    name: candidate.name.clone(),
                    media_type,
                });
            }
            if candidate.size > self.max_bytes {
                return Err(DigError::AttachmentTooLarge {
                    name: candidate.name.clone(),
                    size: candidate.size,
                    max: self.max_bytes,
                });
            }
        }

        for candidate in candidates {
            let media_type = candidate.resolved_media_type();
            self.items.push(Attachment {
                name: candidate.name,
                media_type,
                size: candidate.size,
                source: candidate.source,
                preview: self.previews.allocate(),
            });
        }
        Ok(self.items.as_slice())
    }

    pub fn remove_at(&mut self, index: usize) -> DigResult<&[Attachment]> {
        if index >= self.items.len() {
            return Err(DigError::Index {
                index,
                len: self.items.len(),
            });
        }
        // Dropping the attachment revokes its preview.
        drop(self.items.remove(index));
        Ok(self.items.as_slice())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Encodes every attachment in insertion order, failing on the first error.
    pub fn encode_all(&self) -> DigResult<Vec<EncodedImage>> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, attachment)| attachment.encode(index, self.max_bytes))
            .collect()
    }
}

/// Allocates preview handles and tracks which are still live.
#[derive(Debug, Clone, Default)]
pub struct PreviewPool {
    inner: Arc<PreviewPoolInner>,
}

#[derive(Debug, Default)]
struct PreviewPoolInner {
    next_id: AtomicU64,
    revoked: AtomicU64,
    live: Mutex<BTreeSet<u64>>,
}

impl PreviewPool {
    pub fn allocate(&self) -> PreviewHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut live) = self.inner.live.lock() {
            live.insert(id);
        }
        PreviewHandle {
            id,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    pub fn revoked_count(&self) -> u64 {
        self.inner.revoked.load(Ordering::Relaxed)
    }

    pub fn is_live(&self, handle_url: &str) -> bool {
        let Some(id) = handle_url
            .strip_prefix(PREVIEW_SCHEME)
            .and_then(|raw| raw.parse::<u64>().ok())
        else {
            return false;
        };
        self.inner
            .live
            .lock()
            .map(|live| live.contains(&id))
            .unwrap_or(false)
    }
}

const PREVIEW_SCHEME: &str = "preview:";

/// Not `Clone`: one owner, one revocation.
#[derive(Debug)]
pub struct PreviewHandle {
    id: u64,
    pool: Arc<PreviewPoolInner>,
}

impl PreviewHandle {
    pub fn url(&self) -> String {
        format!("{PREVIEW_SCHEME}{}", self.id)
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        let removed = match self.pool.live.lock() {
            Ok(mut live) => live.remove(&self.id),
            Err(poisoned) => poisoned.into_inner().remove(&self.id),
        };
        if removed {
            self.pool.revoked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "bmp" => Some("image/bmp"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: &str, size: usize) -> RawFile {
        RawFile::from_bytes(name, Some("image/png"), vec![1u8; size])
    }

    fn names(manager: &AttachmentManager) -> Vec<&str> {
        manager.attachments().iter().map(Attachment::name).collect()
    }

    #[test]
    fn add_files_appends_in_order_and_allocates_previews() -> anyhow::Result<()> {
        let pool = PreviewPool::default();
        let mut manager = AttachmentManager::new(pool.clone());
        manager.add_files(vec![png("a", 1), png("b", 1)])?;
        manager.add_files(vec![png("c", 1)])?;
        assert_eq!(names(&manager), vec!["a", "b", "c"]);
        assert_eq!(pool.live_count(), 3);
        let urls: Vec<String> = manager
            .attachments()
            .iter()
            .map(|item| item.preview().url())
            .collect();
        assert!(urls.iter().all(|url| pool.is_live(url)));
        Ok(())
    }

    #[test]
    fn batch_exceeding_count_is_rejected_whole() -> anyhow::Result<()> {
        let pool = PreviewPool::default();
        let mut manager = AttachmentManager::new(pool.clone());
        manager.add_files(vec![png("a", 1), png("b", 1), png("c", 1)])?;
        let err = manager
            .add_files(vec![png("d", 1), png("e", 1), png("f", 1)])
            .err();
        assert_eq!(
            err,
            Some(DigError::TooManyAttachments {
                max: 5,
                current: 3,
                adding: 3
            })
        );
        assert_eq!(names(&manager), vec!["a", "b", "c"]);
        assert_eq!(pool.live_count(), 3);
        Ok(())
    }

    #[test]
    fn size_limit_is_inclusive() -> anyhow::Result<()> {
        let mut manager = AttachmentManager::default();
        let limit = MAX_ATTACHMENT_BYTES as usize;
        manager.add_files(vec![png("exact", limit)])?;
        let err = manager.add_files(vec![png("over", limit + 1)]).err();
        assert!(matches!(err, Some(DigError::AttachmentTooLarge { .. })));
        assert_eq!(manager.len(), 1);
        Ok(())
    }

    #[test]
    fn non_image_in_batch_rejects_everything() {
        let pool = PreviewPool::default();
        let mut manager = AttachmentManager::new(pool.clone());
        let err = manager
            .add_files(vec![
                png("ok", 1),
                RawFile::from_bytes("notes.txt", Some("text/plain"), b"x".to_vec()),
            ])
            .err();
        assert!(matches!(err, Some(DigError::InvalidMediaType { .. })));
        assert!(manager.is_empty());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn missing_media_type_defaults_to_generic_image() -> anyhow::Result<()> {
        let mut manager = AttachmentManager::default();
        manager.add_files(vec![RawFile::from_bytes("blob", None, vec![0u8; 4])])?;
        assert_eq!(manager.attachments()[0].media_type(), "image/png");
        Ok(())
    }

    #[test]
    fn remove_at_revokes_and_reindexes() -> anyhow::Result<()> {
        let pool = PreviewPool::default();
        let mut manager = AttachmentManager::new(pool.clone());
        manager.add_files(vec![png("a", 1), png("b", 1), png("c", 1)])?;
        let removed_url = manager.attachments()[1].preview().url();
        manager.remove_at(1)?;
        assert_eq!(names(&manager), vec!["a", "c"]);
        assert!(!pool.is_live(&removed_url));
        assert_eq!(pool.revoked_count(), 1);

        assert_eq!(
            manager.remove_at(5).err(),
            Some(DigError::Index { index: 5, len: 2 })
        );
        assert_eq!(pool.revoked_count(), 1);
        Ok(())
    }

    #[test]
    fn clear_and_teardown_revoke_every_handle_once() -> anyhow::Result<()> {
        let pool = PreviewPool::default();
        {
            let mut manager = AttachmentManager::new(pool.clone());
            manager.add_files(vec![png("a", 1), png("b", 1)])?;
            manager.clear();
            assert_eq!(pool.live_count(), 0);
            assert_eq!(pool.revoked_count(), 2);
            manager.add_files(vec![png("c", 1)])?;
        }
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.revoked_count(), 3);
        Ok(())
    }

    #[test]
    fn encode_all_preserves_order_and_round_trips() -> anyhow::Result<()> {
        let mut manager = AttachmentManager::default();
        manager.add_files(vec![
            RawFile::from_bytes("a", Some("image/png"), b"first".to_vec()),
            RawFile::from_bytes("b", Some("image/jpeg"), b"second".to_vec()),
        ])?;
        let encoded = manager.encode_all()?;
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0].mime_type, "image/png");
        assert_eq!(codec::decode(&encoded[0].data)?, b"first");
        assert_eq!(encoded[1].mime_type, "image/jpeg");
        assert_eq!(codec::decode(&encoded[1].data)?, b"second");
        Ok(())
    }

    #[test]
    fn file_attachments_are_read_lazily() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("ref.jpg");
        std::fs::write(&path, b"jpeg-bytes")?;

        let file = RawFile::from_path(&path)?;
        assert_eq!(file.media_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.size, 10);

        let mut manager = AttachmentManager::default();
        manager.add_files(vec![file])?;
        std::fs::remove_file(&path)?;
        let err = manager.encode_all().err();
        assert!(matches!(
            err,
            Some(DigError::EncodingFailed { index: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn text_files_are_rejected_by_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, b"hello")?;
        let mut manager = AttachmentManager::default();
        let err = manager.add_files(vec![RawFile::from_path(&path)?]).err();
        assert!(matches!(err, Some(DigError::InvalidMediaType { .. })));
        Ok(())
    }
}
