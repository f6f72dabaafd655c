//! Storage for uploaded deal documents.
//!
//! Uploads are addressed as `uploads/{upload_id}/{filename}`; the upload id
//! alone is enough to find the document again for extraction.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::DocumentError;

/// PDF MIME type.
pub const CONTENT_TYPE_PDF: &str = "application/pdf";
/// DOCX MIME type.
pub const CONTENT_TYPE_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Content types accepted for deal documents.
pub const ALLOWED_CONTENT_TYPES: [&str; 2] = [CONTENT_TYPE_PDF, CONTENT_TYPE_DOCX];

const UPLOAD_PREFIX: &str = "uploads";

pub fn is_allowed_content_type(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Final path component of a client-supplied filename, or `document`.
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        "document".to_string()
    } else {
        name.to_string()
    }
}

/// Storage key for an upload.
pub fn upload_key(upload_id: Uuid, filename: &str) -> String {
    format!("{UPLOAD_PREFIX}/{upload_id}/{filename}")
}

fn content_type_for(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(CONTENT_TYPE_PDF.to_string()),
        "docx" => Some(CONTENT_TYPE_DOCX.to_string()),
        _ => None,
    }
}

/// A document read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub key: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Blob storage for deal documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), DocumentError>;

    /// The document stored under `uploads/{upload_id}/`, if any.
    async fn find_upload(&self, upload_id: Uuid) -> Result<Option<StoredDocument>, DocumentError>;

    fn backend_name(&self) -> &'static str;
}

/// Documents on the local filesystem below a root directory.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, DocumentError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(DocumentError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), DocumentError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored document at {}", path.display());
        Ok(())
    }

    async fn find_upload(&self, upload_id: Uuid) -> Result<Option<StoredDocument>, DocumentError> {
        let dir = self.root.join(UPLOAD_PREFIX).join(upload_id.to_string());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            let bytes = tokio::fs::read(entry.path()).await?;
            return Ok(Some(StoredDocument {
                key: upload_key(upload_id, &filename),
                content_type: content_type_for(&filename),
                filename,
                bytes,
            }));
        }
        Ok(None)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Documents kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    objects: DashMap<String, (Vec<u8>, String)>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DocumentError> {
        if key.is_empty() {
            return Err(DocumentError::InvalidKey(key.to_string()));
        }
        self.objects
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn find_upload(&self, upload_id: Uuid) -> Result<Option<StoredDocument>, DocumentError> {
        let prefix = format!("{UPLOAD_PREFIX}/{upload_id}/");
        Ok(self.objects.iter().find_map(|entry| {
            let filename = entry.key().strip_prefix(&prefix)?;
            let (bytes, content_type) = entry.value();
            Some(StoredDocument {
                key: entry.key().clone(),
                filename: filename.to_string(),
                content_type: Some(content_type.clone()),
                bytes: bytes.clone(),
            })
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_last_component() {
        assert_eq!(sanitize_filename("memo.pdf"), "memo.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\deals\\memo.docx"), "memo.docx");
        assert_eq!(sanitize_filename("uploads/"), "document");
        assert_eq!(sanitize_filename(".."), "document");
    }

    #[test]
    fn only_pdf_and_docx_are_allowed() {
        assert!(is_allowed_content_type(CONTENT_TYPE_PDF));
        assert!(is_allowed_content_type(CONTENT_TYPE_DOCX));
        assert!(!is_allowed_content_type("text/plain"));
    }

    #[tokio::test]
    async fn local_store_round_trips_by_upload_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path());
        let upload_id = Uuid::new_v4();

        store
            .put(
                &upload_key(upload_id, "memo.pdf"),
                b"%PDF-1.4 deal".to_vec(),
                CONTENT_TYPE_PDF,
            )
            .await
            .unwrap();

        let doc = store.find_upload(upload_id).await.unwrap().unwrap();
        assert_eq!(doc.filename, "memo.pdf");
        assert_eq!(doc.content_type.as_deref(), Some(CONTENT_TYPE_PDF));
        assert_eq!(doc.bytes, b"%PDF-1.4 deal");
        assert!(store.find_upload(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path());
        assert!(matches!(
            store.put("../outside.pdf", vec![1], CONTENT_TYPE_PDF).await,
            Err(DocumentError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_finds_by_prefix() {
        let store = MemoryDocumentStore::new();
        let upload_id = Uuid::new_v4();
        store
            .put(&upload_key(upload_id, "memo.docx"), vec![1, 2, 3], CONTENT_TYPE_DOCX)
            .await
            .unwrap();

        let doc = store.find_upload(upload_id).await.unwrap().unwrap();
        assert_eq!(doc.filename, "memo.docx");
        assert_eq!(store.len(), 1);
    }
}
