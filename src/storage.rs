//! Filesystem-backed blob store for task attachments.
//!
//! Bytes live under `<root>/data/<key>` and the attachment metadata under
//! `<root>/meta/<key>.json`. The store is constructed once at startup and
//! shared through `AppState`; every operation first awaits [`BlobStore::ready`],
//! so requests arriving while the directories are still being prepared wait
//! instead of failing.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use tokio::{io::AsyncWriteExt, sync::watch};
use tracing::{info, warn};

use crate::models::file::{blob_url, FileKind, FileRecord, Upload, DEFAULT_FOLDER};

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";
const MAX_KEY_ATTEMPTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

pub struct BlobStore {
    root: PathBuf,
    state: watch::Sender<ReadyState>,
    last_stamp: AtomicU64,
}

impl BlobStore {
    /// Construct the store and prepare its directories in the background.
    /// Must be called from within a Tokio runtime.
    pub fn open(root: impl Into<PathBuf>) -> Arc<Self> {
        let store = Self::pending(root);
        let init = Arc::clone(&store);
        tokio::spawn(async move {
            init.initialize().await;
        });
        store
    }

    /// Construct without preparing anything; operations block until
    /// [`BlobStore::initialize`] has run.
    pub fn pending(root: impl Into<PathBuf>) -> Arc<Self> {
        let (state, _) = watch::channel(ReadyState::Pending);
        Arc::new(Self {
            root: root.into(),
            state,
            last_stamp: AtomicU64::new(0),
        })
    }

    pub async fn initialize(&self) {
        let result = async {
            tokio::fs::create_dir_all(self.root.join(DATA_DIR)).await?;
            tokio::fs::create_dir_all(self.root.join(META_DIR)).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Blob store ready at {}", self.root.display());
                self.state.send_replace(ReadyState::Ready);
            }
            Err(e) => {
                warn!("Blob store initialisation failed: {}", e);
                self.state.send_replace(ReadyState::Failed(e.to_string()));
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ReadyState::Ready
    }

    /// Wait until initialisation has finished.
    pub async fn ready(&self) -> Result<(), BlobError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| *s != ReadyState::Pending)
            .await
            .map_err(|_| BlobError::Unavailable("initialisation aborted".into()))?;
        match &*state {
            ReadyState::Failed(reason) => Err(BlobError::Unavailable(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Persist the upload under a fresh key and return its metadata.
    pub async fn store(&self, upload: &Upload) -> Result<FileRecord, BlobError> {
        self.ready().await?;

        let name = sanitize_name(&upload.original_name);
        let mut attempts = 0;
        let (key, mut file) = loop {
            let key = format!("{}-{}", self.next_stamp(), name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.data_path(&key))
                .await
            {
                Ok(file) => break (key, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if attempts >= MAX_KEY_ATTEMPTS {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        let record = FileRecord {
            name: upload.original_name.clone(),
            url: blob_url(&key),
            content_type: upload.content_type.clone(),
            size: upload.bytes.len() as u64,
            kind: FileKind::from_mime(&upload.content_type),
            folder: DEFAULT_FOLDER.to_string(),
            key,
        };

        let written = async {
            file.write_all(&upload.bytes).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::write(self.meta_path(&record.key), serde_json::to_vec(&record)?).await?;
            Ok::<_, BlobError>(())
        }
        .await;

        if let Err(e) = written {
            // data/ and meta/ must stay in step for list_keys.
            self.discard_partial(&record.key).await;
            return Err(e);
        }

        info!("Stored blob {} ({} bytes)", record.key, record.size);
        Ok(record)
    }

    async fn discard_partial(&self, key: &str) {
        for path in [self.data_path(key), self.meta_path(key)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial blob {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Open a stored blob for streaming, along with its metadata.
    pub async fn retrieve(&self, key: &str) -> Result<(FileRecord, tokio::fs::File), BlobError> {
        self.ready().await?;
        if !is_valid_key(key) {
            return Err(BlobError::NotFound(key.to_string()));
        }

        let meta = match tokio::fs::read(self.meta_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let record: FileRecord = serde_json::from_slice(&meta)?;

        let file = match tokio::fs::File::open(self.data_path(key)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok((record, file))
    }

    pub async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        self.ready().await?;
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(META_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.ready().await?;
        if !is_valid_key(key) {
            return Err(BlobError::NotFound(key.to_string()));
        }
        match tokio::fs::remove_file(self.data_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = tokio::fs::remove_file(self.meta_path(key)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        info!("Deleted blob {}", key);
        Ok(())
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(DATA_DIR).join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{key}.json"))
    }

    /// Millisecond timestamp, strictly increasing within this process.
    fn next_stamp(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Declared content type if the client sent one, otherwise a guess from the
/// file name.
pub fn resolve_content_type(declared: Option<&str>, original_name: &str) -> String {
    match declared.map(str::trim).filter(|ct| !ct.is_empty()) {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(original_name)
            .first_raw()
            .map(str::to_string)
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
    }
}

/// Reduce a client-supplied name to a single path component that is also a
/// valid URL path segment as-is: anything outside `[A-Za-z0-9._-]` becomes `_`.
/// The original name is kept in the record.
fn sanitize_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Millisecond stamp a key was minted with, if it has one.
pub fn key_stamp(key: &str) -> Option<u64> {
    key.split_once('-')?.0.parse().ok()
}

/// Stored keys that no task references and that were minted before
/// `cutoff_ms`. Newer keys may belong to an upload whose task row is not
/// committed yet; keys without a stamp are never selected.
pub fn select_orphans(
    stored: Vec<String>,
    referenced: &HashSet<String>,
    cutoff_ms: u64,
) -> Vec<String> {
    stored
        .into_iter()
        .filter(|key| !referenced.contains(key))
        .filter(|key| key_stamp(key).is_some_and(|stamp| stamp < cutoff_ms))
        .collect()
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\'])
        && Path::new(key).components().count() == 1
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use uuid::Uuid;

    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("taskboard-blobs-{}", Uuid::new_v4()))
    }

    fn upload(name: &str, ct: &str, bytes: &'static [u8]) -> Upload {
        Upload {
            original_name: name.to_string(),
            content_type: ct.to_string(),
            bytes: bytes::Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_bytes_and_type() {
        let store = BlobStore::open(temp_root());
        let record = store
            .store(&upload("report.pdf", "application/pdf", b"%PDF-1.4 hello"))
            .await
            .unwrap();

        assert!(record.key.ends_with("-report.pdf"));
        assert_eq!(record.url, format!("/tasks/files/{}", record.key));
        assert_eq!(record.kind, FileKind::Pdf);
        assert_eq!(record.size, 14);
        assert_eq!(record.folder, "root");

        let (meta, mut file) = store.retrieve(&record.key).await.unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 hello");
        assert_eq!(meta.content_type, "application/pdf");
        assert_eq!(meta.name, "report.pdf");
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_keys() {
        let store = BlobStore::open(temp_root());
        let a = store.store(&upload("a.txt", "text/plain", b"1")).await.unwrap();
        let b = store.store(&upload("a.txt", "text/plain", b"2")).await.unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(store.list_keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_or_traversal_keys_are_not_found() {
        let store = BlobStore::open(temp_root());
        assert!(matches!(store.retrieve("1-missing.txt").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.retrieve("../etc/passwd").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.retrieve(".hidden").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn operations_wait_for_initialisation() {
        let store = BlobStore::pending(temp_root());
        assert!(!store.is_ready());

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.store(&upload("x.txt", "text/plain", b"x")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        store.initialize().await;
        let record = pending.await.unwrap().unwrap();
        assert!(store.is_ready());
        assert_eq!(record.name, "x.txt");
    }

    #[tokio::test]
    async fn delete_removes_bytes_and_metadata() {
        let store = BlobStore::open(temp_root());
        let record = store.store(&upload("d.txt", "text/plain", b"bye")).await.unwrap();
        store.delete(&record.key).await.unwrap();
        assert!(matches!(store.retrieve(&record.key).await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.delete(&record.key).await, Err(BlobError::NotFound(_))));
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[test]
    fn names_are_reduced_to_one_component() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("C:\\docs\\plan.docx"), "plan.docx");
        assert_eq!(sanitize_name(".env"), "env");
        assert_eq!(sanitize_name(""), "upload");
        assert_eq!(sanitize_name("my notes.txt"), "my_notes.txt");
        assert_eq!(sanitize_name("what?.txt"), "what_.txt");
        assert_eq!(sanitize_name("notes#2.txt"), "notes_2.txt");
        assert_eq!(sanitize_name("100%.txt"), "100_.txt");
        assert_eq!(sanitize_name("résumé.pdf"), "r_sum_.pdf");
    }

    #[test]
    fn stamps_strictly_increase() {
        let store = BlobStore::pending(temp_root());
        let a = store.next_stamp();
        let b = store.next_stamp();
        let c = store.next_stamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn content_type_falls_back_to_guess() {
        assert_eq!(resolve_content_type(Some("text/csv"), "x.bin"), "text/csv");
        assert_eq!(resolve_content_type(None, "photo.png"), "image/png");
        assert_eq!(resolve_content_type(Some(" "), "blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn reserved_characters_never_reach_the_url() {
        let store = BlobStore::open(temp_root());
        for name in ["what?.txt", "notes#2.txt", "100%.txt", "my notes.txt"] {
            let record = store.store(&upload(name, "text/plain", b"abc")).await.unwrap();
            assert_eq!(record.name, name);
            let key = record.url.strip_prefix("/tasks/files/").unwrap();
            assert_eq!(key, record.key);
            assert!(
                key.chars().all(|c| c.is_ascii_alphanumeric() || "._-".contains(c)),
                "{key}"
            );
            assert!(store.retrieve(key).await.is_ok());
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let root = temp_root();
        let store = BlobStore::open(&root);
        store.ready().await.unwrap();
        // A plain file in place of meta/ makes the sidecar write fail.
        tokio::fs::remove_dir_all(root.join(META_DIR)).await.unwrap();
        tokio::fs::write(root.join(META_DIR), b"not a directory").await.unwrap();

        assert!(store.store(&upload("a.txt", "text/plain", b"x")).await.is_err());

        let mut data = tokio::fs::read_dir(root.join(DATA_DIR)).await.unwrap();
        assert!(data.next_entry().await.unwrap().is_none());
    }

    #[test]
    fn orphan_selection_spares_referenced_and_recent_keys() {
        let stored = vec![
            "1000-old.txt".to_string(),
            "1500-kept.txt".to_string(),
            "9000-fresh.txt".to_string(),
            "stray.txt".to_string(),
        ];
        let referenced = HashSet::from(["1500-kept.txt".to_string()]);

        assert_eq!(select_orphans(stored.clone(), &referenced, 5000), ["1000-old.txt"]);
        assert_eq!(
            select_orphans(stored, &referenced, 10_000),
            ["1000-old.txt", "9000-fresh.txt"]
        );
        assert_eq!(key_stamp("1712345678901-a-b.txt"), Some(1712345678901));
        assert_eq!(key_stamp("nostamp"), None);
    }
}
