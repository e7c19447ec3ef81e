use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::Instrument;

use crate::cover::CoverArt;
use crate::render::RasterizedPage;
use crate::secrets::hex_encode;

use super::pdf::{build_print_pdf, PdfError, PdfPageImage};
use super::store::{artifact_key, cover_key, ObjectStore, StorageError};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Expected {expected} pages, got {actual}")]
    PageCount { expected: usize, actual: usize },

    #[error("Page at position {index} is '{actual}', expected '{expected}'")]
    OutOfOrder {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Page '{page_id}' is {actual:?}px, expected {expected:?}px like the first page")]
    NonUniform {
        page_id: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Assembly task failed: {0}")]
    Task(String),
}

/// A rendered page tagged with its position in the book.
#[derive(Debug, Clone)]
pub struct IndexedPage {
    pub index: usize,
    pub page: RasterizedPage,
}

/// Identity and size of an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledArtifact {
    pub storage_key: String,
    pub byte_size: u64,
    pub page_count: u32,
    pub sha256: String,
}

/// Merges rendered pages into one print PDF in object storage.
pub struct ArtifactAssembler {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactAssembler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Orders `pages` by index, checks them against `expected_order` and uploads the merge.
    pub async fn assemble(
        &self,
        family_id: &str,
        job_id: &str,
        expected_order: &[String],
        pages: Vec<IndexedPage>,
    ) -> Result<AssembledArtifact, AssemblyError> {
        let span = tracing::info_span!("assemble", job_id = %job_id, pages = pages.len());
        async {
            let ordered = order_pages(expected_order, pages)?;
            let page_count = ordered.len() as u32;

            let bytes = tokio::task::spawn_blocking(move || {
                let images: Vec<PdfPageImage<'_>> = ordered
                    .iter()
                    .map(|p| PdfPageImage {
                        width_px: p.width,
                        height_px: p.height,
                        dpi: p.dpi,
                        bleed_px: p.bleed_px as f64,
                        format: p.format,
                        bytes: &p.bytes,
                    })
                    .collect();
                build_print_pdf(&images)
            })
            .await
            .map_err(|e| AssemblyError::Task(e.to_string()))??;

            let key = artifact_key(family_id, job_id);
            let artifact = self.upload(&key, bytes, page_count).await?;
            info!(
                "Assembled {} pages into {} ({} bytes)",
                page_count, artifact.storage_key, artifact.byte_size
            );
            Ok(artifact)
        }
        .instrument(span)
        .await
    }

    /// Uploads a composed cover as a single-page print PDF.
    pub async fn store_cover(
        &self,
        family_id: &str,
        order_id: &str,
        cover: &CoverArt,
    ) -> Result<AssembledArtifact, AssemblyError> {
        let geometry = &cover.geometry;
        let image = PdfPageImage {
            width_px: geometry.width_px,
            height_px: geometry.height_px,
            dpi: geometry.dpi,
            bleed_px: geometry.bleed_inches * geometry.dpi,
            format: cover.format,
            bytes: &cover.bytes,
        };
        let bytes = build_print_pdf(&[image])?;
        self.upload(&cover_key(family_id, order_id), bytes, 1).await
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        page_count: u32,
    ) -> Result<AssembledArtifact, AssemblyError> {
        let sha256 = hex_encode(&Sha256::digest(&bytes));
        self.store.put(key, &bytes, PDF_CONTENT_TYPE).await?;
        Ok(AssembledArtifact {
            storage_key: key.to_string(),
            byte_size: bytes.len() as u64,
            page_count,
            sha256,
        })
    }
}

/// Sorts by index and verifies the result is exactly `expected_order` with uniform size.
pub fn order_pages(
    expected_order: &[String],
    mut pages: Vec<IndexedPage>,
) -> Result<Vec<RasterizedPage>, AssemblyError> {
    if pages.len() != expected_order.len() {
        return Err(AssemblyError::PageCount {
            expected: expected_order.len(),
            actual: pages.len(),
        });
    }
    pages.sort_by_key(|p| p.index);

    let mut ordered = Vec::with_capacity(pages.len());
    let mut size = None;
    for (position, (indexed, expected)) in pages.into_iter().zip(expected_order).enumerate() {
        if indexed.index != position || &indexed.page.page_id != expected {
            return Err(AssemblyError::OutOfOrder {
                index: position,
                expected: expected.clone(),
                actual: indexed.page.page_id.clone(),
            });
        }
        let dims = (indexed.page.width, indexed.page.height);
        match size {
            None => size = Some(dims),
            Some(first) if first != dims => {
                return Err(AssemblyError::NonUniform {
                    page_id: indexed.page.page_id.clone(),
                    expected: first,
                    actual: dims,
                })
            }
            Some(_) => {}
        }
        ordered.push(indexed.page);
    }
    Ok(ordered)
}
