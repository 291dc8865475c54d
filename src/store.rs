use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::model::CaptureItem;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Capture items grouped by category, persisted as one JSON object.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    path: PathBuf,
    categories: BTreeMap<String, Vec<CaptureItem>>,
}

impl CaptureStore {
    /// Load the store; a missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let categories = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), categories = categories.len(), "store loaded");
        Ok(Self { path, categories })
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn items(&self, category: &str) -> &[CaptureItem] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push(&mut self, category: &str, item: CaptureItem) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(item);
    }

    /// Remove the items of `category` at the given positions. Out-of-range
    /// positions are ignored. Returns the number removed.
    pub fn remove_indices(&mut self, category: &str, consumed: &[usize]) -> usize {
        let Some(items) = self.categories.get_mut(category) else {
            return 0;
        };
        let consumed: BTreeSet<usize> = consumed.iter().copied().collect();
        let before = items.len();
        let mut position = 0;
        items.retain(|_| {
            let keep = !consumed.contains(&position);
            position += 1;
            keep
        });
        let removed = before - items.len();
        info!(category, removed, remaining = items.len(), "removed consumed items");
        removed
    }

    /// Write via a sibling temp file, then rename over the original.
    pub async fn save(&self) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(&self.categories)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
