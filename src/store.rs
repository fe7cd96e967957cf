//! Reply persistence, as consumed by the trigger listener.
//!
//! The store itself is an outside collaborator; this module defines the
//! interface and ships an in-memory store, a JSON file store, and a
//! message-passing front that puts any store behind a request channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::StoreError;
use crate::reply::{RawReply, ReplyEntry};

pub const STORE_FILE_NAME: &str = "quick_replies.json";
/// Key under which replies are persisted.
pub const STORAGE_KEY: &str = "quickReplies";

#[async_trait]
pub trait ReplyStore: Send + Sync {
    async fn get(&self) -> Result<Vec<RawReply>, StoreError>;
    async fn set(&self, entries: &[ReplyEntry]) -> Result<(), StoreError>;
}

// ----- In-memory -----

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<RawReply>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(entries: Vec<RawReply>) -> Self {
        Self {
            entries: Mutex::new(entries),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn from_entries(entries: Vec<ReplyEntry>) -> Self {
        Self::new(entries.into_iter().map(RawReply::from).collect())
    }

    pub fn snapshot(&self) -> Vec<RawReply> {
        self.entries.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyStore for MemoryStore {
    async fn get(&self) -> Result<Vec<RawReply>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    async fn set(&self, entries: &[ReplyEntry]) -> Result<(), StoreError> {
        *self.entries.lock() = entries.iter().cloned().map(RawReply::from).collect();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ----- JSON file -----

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(rename = "quickReplies", default)]
    quick_replies: Vec<RawReply>,
}

/// Replies kept in a JSON file shaped `{"quickReplies": [...]}`. A missing
/// file reads as an empty list.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReplyStore for JsonFileStore {
    async fn get(&self) -> Result<Vec<RawReply>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("reply store {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: StoreFile = serde_json::from_str(&content)?;
        Ok(file.quick_replies)
    }

    async fn set(&self, entries: &[ReplyEntry]) -> Result<(), StoreError> {
        let file = StoreFile {
            quick_replies: entries.iter().cloned().map(RawReply::from).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Write {
                    path: self.path.clone(),
                    source: e,
                })?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        info!("saved {} replies to {}", entries.len(), self.path.display());
        Ok(())
    }
}

// ----- Message-passing front -----

#[derive(Debug)]
pub enum StoreRequest {
    GetQuickReplies(oneshot::Sender<Result<Vec<RawReply>, StoreError>>),
    SaveQuickReplies(Vec<ReplyEntry>, oneshot::Sender<Result<(), StoreError>>),
}

/// Client half of [`spawn_store_service`]. Every call is one request/reply
/// round trip; a stopped service reports [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct StoreClient {
    requests: mpsc::Sender<StoreRequest>,
}

/// Runs `store` on its own task and returns a client that reaches it
/// through a request channel. The task ends when every client is dropped.
pub fn spawn_store_service(store: Arc<dyn ReplyStore>) -> (StoreClient, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<StoreRequest>(32);
    let handle = tokio::spawn(async move {
        info!("reply store service started");
        while let Some(request) = rx.recv().await {
            match request {
                StoreRequest::GetQuickReplies(reply) => {
                    let result = store.get().await;
                    if let Err(e) = &result {
                        error!("reading replies failed: {}", e);
                    }
                    if reply.send(result).is_err() {
                        warn!("requester went away before receiving replies");
                    }
                }
                StoreRequest::SaveQuickReplies(entries, reply) => {
                    let result = store.set(&entries).await;
                    if let Err(e) = &result {
                        error!("saving replies failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
            }
        }
        debug!("reply store service stopped");
    });
    (StoreClient { requests: tx }, handle)
}

#[async_trait]
impl ReplyStore for StoreClient {
    async fn get(&self) -> Result<Vec<RawReply>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(StoreRequest::GetQuickReplies(tx))
            .await
            .map_err(|_| StoreError::Unavailable("store service is not running".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("store service dropped the request".into()))?
    }

    async fn set(&self, entries: &[ReplyEntry]) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(StoreRequest::SaveQuickReplies(entries.to_vec(), tx))
            .await
            .map_err(|_| StoreError::Unavailable("store service is not running".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("store service dropped the request".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::normalize;

    #[tokio::test]
    async fn file_store_reads_legacy_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"quickReplies": ["[Vendas] Bom dia", {"category": "Suporte", "text": "Olá"}, "solto"]}"#,
        )
        .unwrap();
        let store = JsonFileStore::new(&path);
        let entries = normalize(&store.get().await.unwrap());
        assert_eq!(
            entries,
            vec![
                ReplyEntry::new("Vendas", "Bom dia"),
                ReplyEntry::new("Suporte", "Olá"),
                ReplyEntry::new(crate::reply::DEFAULT_CATEGORY, "solto"),
            ]
        );
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty_and_set_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(STORE_FILE_NAME);
        let store = JsonFileStore::new(&path);
        assert!(store.get().await.unwrap().is_empty());

        store.set(&[ReplyEntry::new("A", "one")]).await.unwrap();
        let raw = store.get().await.unwrap();
        assert!(raw.iter().all(RawReply::is_canonical));
        assert_eq!(normalize(&raw), vec![ReplyEntry::new("A", "one")]);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains(STORAGE_KEY));
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get().await, Err(StoreError::Json { .. })));
    }

    #[tokio::test]
    async fn service_round_trips_requests() {
        let backing = Arc::new(MemoryStore::new(vec![RawReply::from("hello")]));
        let (client, handle) = spawn_store_service(backing.clone());

        assert_eq!(client.get().await.unwrap(), vec![RawReply::from("hello")]);
        client.set(&[ReplyEntry::new("X", "y")]).await.unwrap();
        assert_eq!(backing.write_count(), 1);

        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_service_is_unavailable() {
        let backing = Arc::new(MemoryStore::default());
        let (client, handle) = spawn_store_service(backing);
        handle.abort();
        let _ = handle.await;
        assert!(matches!(client.get().await, Err(StoreError::Unavailable(_))));
    }
}
