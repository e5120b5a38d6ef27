use std::path::{Path, PathBuf};

use serde_json::Value;

use super::write_atomic;

pub const RECENT_PROMPTS_CAP: usize = 20;

/// Most-recent-first list of prompts the user typed, de-duplicated.
///
/// Failures never surface: a broken file reads as empty and a failed write
/// is dropped.
#[derive(Debug, Clone)]
pub struct RecentPrompts {
    path: PathBuf,
}

impl RecentPrompts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Vec<String> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(rows)) => rows
                .into_iter()
                .filter_map(|row| row.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn write(&self, items: &[String]) {
        let keep = &items[..items.len().min(RECENT_PROMPTS_CAP)];
        let Ok(body) = serde_json::to_string(keep) else {
            return;
        };
        let _ = write_atomic(&self.path, &body);
    }

    pub fn add(&self, prompt: &str) -> Vec<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return self.read();
        }
        let mut next = vec![prompt.to_string()];
        next.extend(
            self.read()
                .into_iter()
                .filter(|existing| existing.trim() != prompt),
        );
        next.truncate(RECENT_PROMPTS_CAP);
        self.write(&next);
        next
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
