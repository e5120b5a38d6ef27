use std::collections::BTreeSet;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use super::local::{ImageSet, LocalStore};
use crate::events::now_utc_iso;

const TITLE_MAX_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub category: Option<String>,
    pub is_public: bool,
    #[serde(default)]
    pub source_prompt_id: Option<String>,
    #[serde(default)]
    pub like_count: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewLibraryEntry {
    pub user_id: String,
    pub prompt: String,
    pub title: Option<String>,
    pub category: Option<String>,
    /// Defaults to public.
    pub is_public: Option<bool>,
    pub source_prompt_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryUpdate {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub category: Option<String>,
    pub is_public: Option<bool>,
}

impl LibraryUpdate {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.prompt.is_none()
            && self.category.is_none()
            && self.is_public.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryLike {
    pub id: String,
    pub user_id: String,
    pub prompt_library_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntryWithImages {
    #[serde(flatten)]
    pub entry: LibraryEntry,
    pub images: ImageSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeState {
    Liked,
    Unliked,
}

fn default_title(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{head}...")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl LocalStore {
    pub fn library_create(&self, new: NewLibraryEntry) -> anyhow::Result<LibraryEntry> {
        let prompt = new.prompt.trim().to_string();
        if prompt.is_empty() {
            bail!("library prompt is empty");
        }
        let now = now_utc_iso();
        let entry = LibraryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            title: non_empty(new.title).unwrap_or_else(|| default_title(&prompt)),
            prompt,
            category: non_empty(new.category),
            is_public: new.is_public.unwrap_or(true),
            source_prompt_id: non_empty(new.source_prompt_id),
            like_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        self.library()
            .update(|rows| rows.push(entry.clone()))
            .context("failed to save library entry")?;
        Ok(entry)
    }

    /// A user's own entries, or every public entry when `user_id` is `None`.
    /// Newest first.
    pub fn library_list(&self, user_id: Option<&str>) -> Vec<LibraryEntry> {
        let mut rows: Vec<LibraryEntry> = self
            .library()
            .load()
            .into_iter()
            .rev()
            .filter(|entry| match user_id {
                Some(user_id) => entry.user_id == user_id,
                None => entry.is_public,
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// Entries `library_list` would return whose title, prompt or category
    /// contains `query`, ignoring case. A blank query matches everything.
    pub fn library_search(&self, query: &str, user_id: Option<&str>) -> Vec<LibraryEntry> {
        let needle = query.trim().to_lowercase();
        let entries = self.library_list(user_id);
        if needle.is_empty() {
            return entries;
        }
        entries
            .into_iter()
            .filter(|entry| {
                entry.title.to_lowercase().contains(&needle)
                    || entry.prompt.to_lowercase().contains(&needle)
                    || entry
                        .category
                        .as_deref()
                        .is_some_and(|category| category.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn library_get(&self, id: &str) -> Option<LibraryEntry> {
        self.library().load().into_iter().find(|entry| entry.id == id)
    }

    /// The entry plus the images of the generation it was saved from.
    pub fn library_get_with_images(&self, id: &str) -> Option<LibraryEntryWithImages> {
        let entry = self.library_get(id)?;
        let images = entry
            .source_prompt_id
            .as_deref()
            .map(|source| self.record_images(source))
            .unwrap_or_default();
        Some(LibraryEntryWithImages { entry, images })
    }

    pub fn library_update(
        &self,
        id: &str,
        update: LibraryUpdate,
    ) -> anyhow::Result<Option<LibraryEntry>> {
        if update.is_empty() {
            return Ok(self.library_get(id));
        }
        let now = now_utc_iso();
        self.library()
            .update(|rows| {
                let entry = rows.iter_mut().find(|entry| entry.id == id)?;
                if let Some(title) = non_empty(update.title) {
                    entry.title = title;
                }
                if let Some(prompt) = non_empty(update.prompt) {
                    entry.prompt = prompt;
                }
                if let Some(category) = update.category {
                    entry.category = non_empty(Some(category));
                }
                if let Some(is_public) = update.is_public {
                    entry.is_public = is_public;
                }
                entry.updated_at = now;
                Some(entry.clone())
            })
            .context("failed to update library entry")
    }

    /// Removes the entry and every like pointing at it.
    pub fn library_delete(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self
            .library()
            .update(|rows| {
                let before = rows.len();
                rows.retain(|entry| entry.id != id);
                rows.len() != before
            })
            .context("failed to delete library entry")?;
        if removed {
            self.likes()
                .update(|rows| rows.retain(|like| like.prompt_library_id != id))
                .context("failed to delete library likes")?;
        }
        Ok(removed)
    }

    pub fn toggle_like(&self, user_id: &str, id: &str) -> anyhow::Result<LikeState> {
        if self.library_get(id).is_none() {
            bail!("library entry {id} not found");
        }
        let state = self
            .likes()
            .update(|rows| {
                let before = rows.len();
                rows.retain(|like| !(like.user_id == user_id && like.prompt_library_id == id));
                if rows.len() != before {
                    return LikeState::Unliked;
                }
                rows.push(LibraryLike {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    prompt_library_id: id.to_string(),
                    created_at: now_utc_iso(),
                });
                LikeState::Liked
            })
            .context("failed to save like")?;

        self.library()
            .update(|rows| {
                if let Some(entry) = rows.iter_mut().find(|entry| entry.id == id) {
                    entry.like_count = match state {
                        LikeState::Liked => entry.like_count.saturating_add(1),
                        LikeState::Unliked => entry.like_count.saturating_sub(1),
                    };
                }
            })
            .context("failed to update like count")?;
        Ok(state)
    }

    /// Ids of the library entries a user has liked.
    pub fn user_likes(&self, user_id: &str) -> BTreeSet<String> {
        self.likes()
            .load()
            .into_iter()
            .filter(|like| like.user_id == user_id)
            .map(|like| like.prompt_library_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ImageKind, LIBRARY_TABLE};

    fn new_entry(user: &str, prompt: &str) -> NewLibraryEntry {
        NewLibraryEntry {
            user_id: user.to_string(),
            prompt: prompt.to_string(),
            ..NewLibraryEntry::default()
        }
    }

    #[test]
    fn create_fills_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let long = "y".repeat(80);
        let entry = store.library_create(new_entry("alice", &long))?;
        assert!(entry.is_public);
        assert_eq!(entry.like_count, 0);
        assert_eq!(entry.title, format!("{}...", "y".repeat(64)));

        let short = store.library_create(NewLibraryEntry {
            title: Some("  ".to_string()),
            is_public: Some(false),
            ..new_entry("alice", " a red fox ")
        })?;
        assert_eq!(short.title, "a red fox");
        assert_eq!(short.prompt, "a red fox");
        assert!(!short.is_public);

        assert!(store.library_create(new_entry("alice", "   ")).is_err());
        Ok(())
    }

    #[test]
    fn list_filters_by_owner_or_visibility() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.library_create(new_entry("alice", "public one"))?;
        store.library_create(NewLibraryEntry {
            is_public: Some(false),
            ..new_entry("alice", "private one")
        })?;
        store.library_create(new_entry("bob", "bob's"))?;

        assert_eq!(store.library_list(Some("alice")).len(), 2);
        let public: Vec<String> = store
            .library_list(None)
            .into_iter()
            .map(|entry| entry.prompt)
            .collect();
        assert_eq!(public.len(), 2);
        assert!(!public.contains(&"private one".to_string()));
        Ok(())
    }

    #[test]
    fn get_with_images_follows_source_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let record = store.create_record("alice", "a red fox")?;
        let url = store.upload_image("alice", &record.id, ImageKind::Output, "png", b"px")?;
        store.attach_images(&record.id, &[(ImageKind::Output, url.clone())])?;

        let entry = store.library_create(NewLibraryEntry {
            source_prompt_id: Some(record.id.clone()),
            ..new_entry("alice", "a red fox")
        })?;
        let found = store.library_get_with_images(&entry.id);
        assert_eq!(found.map(|item| item.images.outputs), Some(vec![url]));
        assert!(store.library_get_with_images("missing").is_none());
        Ok(())
    }

    #[test]
    fn update_changes_fields_and_timestamp() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let entry = store.library_create(new_entry("alice", "a red fox"))?;
        let updated = store.library_update(
            &entry.id,
            LibraryUpdate {
                title: Some("Fox".to_string()),
                is_public: Some(false),
                ..LibraryUpdate::default()
            },
        )?;
        let updated = updated.ok_or_else(|| anyhow::anyhow!("entry vanished"))?;
        assert_eq!(updated.title, "Fox");
        assert!(!updated.is_public);
        assert!(updated.updated_at >= entry.updated_at);
        assert_eq!(
            store.library_update(
                "missing",
                LibraryUpdate {
                    title: Some("x".to_string()),
                    ..LibraryUpdate::default()
                }
            )?,
            None
        );
        Ok(())
    }

    #[test]
    fn toggle_like_round_trips_and_delete_cleans_up() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let entry = store.library_create(new_entry("alice", "a red fox"))?;

        assert_eq!(store.toggle_like("bob", &entry.id)?, LikeState::Liked);
        assert_eq!(store.toggle_like("carol", &entry.id)?, LikeState::Liked);
        assert_eq!(store.library_get(&entry.id).map(|e| e.like_count), Some(2));
        assert!(store.user_likes("bob").contains(&entry.id));

        assert_eq!(store.toggle_like("bob", &entry.id)?, LikeState::Unliked);
        assert_eq!(store.library_get(&entry.id).map(|e| e.like_count), Some(1));
        assert!(store.user_likes("bob").is_empty());

        assert!(store.toggle_like("bob", "missing").is_err());

        assert!(store.library_delete(&entry.id)?);
        assert!(!store.library_delete(&entry.id)?);
        assert!(store.user_likes("carol").is_empty());
        Ok(())
    }

    #[test]
    fn search_matches_title_prompt_or_category() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.library_create(NewLibraryEntry {
            title: Some("Autumn Fox".to_string()),
            ..new_entry("alice", "a fox in the leaves")
        })?;
        store.library_create(NewLibraryEntry {
            category: Some("Portraits".to_string()),
            ..new_entry("alice", "studio headshot")
        })?;
        store.library_create(NewLibraryEntry {
            is_public: Some(false),
            ..new_entry("bob", "hidden fox")
        })?;

        let titles = |query: &str, user: Option<&str>| -> Vec<String> {
            store
                .library_search(query, user)
                .into_iter()
                .map(|entry| entry.prompt)
                .collect()
        };
        assert_eq!(titles("FOX", None), vec!["a fox in the leaves"]);
        assert_eq!(titles("portrait", None), vec!["studio headshot"]);
        assert_eq!(titles("fox", Some("bob")), vec!["hidden fox"]);
        assert_eq!(titles("  ", None).len(), 2);
        assert!(titles("owl", None).is_empty());
        Ok(())
    }

    #[test]
    fn damaged_library_row_blocks_writes_instead_of_wiping() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.library_create(new_entry("alice", "first"))?;
        store.library_create(new_entry("alice", "second"))?;

        let path = store.root().join(LIBRARY_TABLE);
        let raw = std::fs::read_to_string(&path)?;
        let damaged = raw.replacen("\"like_count\": 0", "\"like_count\": \"0\"", 1);
        assert_ne!(raw, damaged);
        std::fs::write(&path, &damaged)?;

        assert!(store.library_create(new_entry("alice", "third")).is_err());
        assert_eq!(std::fs::read_to_string(&path)?, damaged);
        Ok(())
    }
}
