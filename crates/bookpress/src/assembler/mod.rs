//! Merging rendered pages into print artifacts and storing them.

#[allow(clippy::module_inception)]
mod assembler;
pub mod pdf;
pub mod store;

pub use assembler::{
    order_pages, ArtifactAssembler, AssembledArtifact, AssemblyError, IndexedPage,
    PDF_CONTENT_TYPE,
};
pub use pdf::{build_print_pdf, PdfError, PdfPageImage};
pub use store::{
    artifact_key, cover_key, DownloadRef, FileObjectStore, InMemoryObjectStore, ObjectStore,
    StorageError, UrlSigner,
};
