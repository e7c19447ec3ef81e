//! Where page content comes from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::geometry::BookSize;
use crate::page::Page;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Page store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the page documents owned by families.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Returns `Ok(None)` when the page does not exist in the family.
    async fn load_page(&self, family_id: &str, page_id: &str) -> Result<Option<Page>, SourceError>;
}

/// A whole book as exported by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookManifest {
    pub family_id: String,
    pub book_size: BookSize,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub pages: Vec<Page>,
}

impl BookManifest {
    pub fn page_ids(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.id.clone()).collect()
    }
}

/// Page source held entirely in memory.
#[derive(Default)]
pub struct InMemoryPageSource {
    pages: RwLock<HashMap<(String, String), Page>>,
}

impl InMemoryPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(manifest: &BookManifest) -> Self {
        let pages = manifest
            .pages
            .iter()
            .map(|p| ((manifest.family_id.clone(), p.id.clone()), p.clone()))
            .collect();
        Self {
            pages: RwLock::new(pages),
        }
    }

    pub async fn insert(&self, family_id: &str, page: Page) {
        self.pages
            .write()
            .await
            .insert((family_id.to_string(), page.id.clone()), page);
    }

    pub async fn remove(&self, family_id: &str, page_id: &str) {
        self.pages
            .write()
            .await
            .remove(&(family_id.to_string(), page_id.to_string()));
    }
}

#[async_trait]
impl PageSource for InMemoryPageSource {
    async fn load_page(&self, family_id: &str, page_id: &str) -> Result<Option<Page>, SourceError> {
        Ok(self
            .pages
            .read()
            .await
            .get(&(family_id.to_string(), page_id.to_string()))
            .cloned())
    }
}
