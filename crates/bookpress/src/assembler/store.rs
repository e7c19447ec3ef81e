//! Object storage for print artifacts and signed download references.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::secrets::{hex_decode, hex_encode};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object '{0}' already exists with different content")]
    Immutable(String),

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Invalid URL signing key: {0}")]
    SigningKey(String),
}

/// Storage key of a compiled book.
pub fn artifact_key(family_id: &str, job_id: &str) -> String {
    format!("families/{}/books/{}.pdf", family_id, job_id)
}

/// Storage key of an order's print cover.
pub fn cover_key(family_id: &str, order_id: &str) -> String {
    format!("families/{}/covers/{}.pdf", family_id, order_id)
}

/// Time-limited download reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRef {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadRef {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Signs download URLs with HMAC-SHA256 over `key` and the expiry timestamp.
pub struct UrlSigner {
    public_base_url: String,
    mac: Hmac<Sha256>,
}

impl UrlSigner {
    pub fn new(
        public_base_url: impl Into<String>,
        secret: SecretString,
    ) -> Result<Self, StorageError> {
        let mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| StorageError::SigningKey(e.to_string()))?;
        Ok(Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            mac,
        })
    }

    fn keyed(&self, key: &str, expires: i64) -> Hmac<Sha256> {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    pub fn sign(&self, key: &str, expires_at: DateTime<Utc>) -> DownloadRef {
        let expires = expires_at.timestamp();
        let signature = hex_encode(&self.keyed(key, expires).finalize().into_bytes());
        DownloadRef {
            url: format!(
                "{}/{}?expires={}&signature={}",
                self.public_base_url, key, expires, signature
            ),
            expires_at,
        }
    }

    /// Checks a `(key, expires, signature)` triple taken from a signed URL.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        let Ok(tag) = hex_decode(signature) else {
            return false;
        };
        self.keyed(key, expires).verify_slice(&tag).is_ok() && expires > now.timestamp()
    }
}

/// Rejects empty keys, absolute keys and parent traversal.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Write-once object storage.
///
/// `put` of identical bytes to an existing key succeeds without change;
/// different bytes are rejected.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Mints a download reference valid until `expires_at`.
    fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> DownloadRef;
}

/// Object store on the local filesystem.
pub struct FileObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FileObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, signer: UrlSigner) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            signer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        // Write the full content aside, then hard-link it into place. The link
        // fails if the key exists, so readers never see a partial object.
        let staging = path.with_extension(format!("staging-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: staging.clone(),
                source: e,
            })?;
        let linked = tokio::fs::hard_link(&staging, &path).await;
        let _ = tokio::fs::remove_file(&staging).await;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = tokio::fs::read(&path)
                    .await
                    .map_err(|e| StorageError::ReadFile {
                        path: path.clone(),
                        source: e,
                    })?;
                if existing == bytes {
                    Ok(())
                } else {
                    Err(StorageError::Immutable(key.to_string()))
                }
            }
            Err(e) => Err(StorageError::WriteFile { path, source: e }),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::ReadFile { path, source: e })
    }

    fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> DownloadRef {
        self.signer.sign(key, expires_at)
    }
}

/// Object store held in memory. Counts writes so callers can assert reuse.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, (String, Vec<u8>)>>,
    puts: AtomicUsize,
    signer: UrlSigner,
}

impl InMemoryObjectStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            signer,
        }
    }

    /// Number of `put` calls that stored new content.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(ct, _)| ct.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        match objects.get(key) {
            Some((_, existing)) if existing == bytes => Ok(()),
            Some(_) => Err(StorageError::Immutable(key.to_string())),
            None => {
                objects.insert(key.to_string(), (content_type.to_string(), bytes.to_vec()));
                self.puts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> DownloadRef {
        self.signer.sign(key, expires_at)
    }
}
