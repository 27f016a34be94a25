use crate::infrastructure::error::SyncError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

const SUBSCRIPTION_BUFFER: usize = 64;

pub type Document = Value;
pub type Patch = Map<String, Value>;

/// Contract of the shared document store. Last write wins at document
/// granularity; no concurrency tokens.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Document>, SyncError>;

    /// Shallow-merges `patch` into the stored document (creating it if absent)
    /// and pushes the merged document to every subscriber of `key`, the writer
    /// included.
    async fn write(&self, key: &str, patch: Patch) -> Result<(), SyncError>;

    /// Dropping the returned subscription unsubscribes.
    fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError>;
}

pub struct DocumentSubscription {
    key: String,
    receiver: broadcast::Receiver<Document>,
}

impl DocumentSubscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next pushed document. Lagging subscribers skip straight
    /// to newer pushes since every push carries the full document.
    pub async fn next(&mut self) -> Option<Document> {
        loop {
            match self.receiver.recv().await {
                Ok(document) => return Some(document),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("subscription key={} skipped {skipped} stale pushes", self.key);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Document> {
        loop {
            match self.receiver.try_recv() {
                Ok(document) => return Some(document),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Per-key push fan-out shared by the store implementations.
#[derive(Debug, Default)]
pub struct SubscriptionHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Document>>>,
}

impl SubscriptionHub {
    pub fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|error| SyncError::poisoned("subscription hub", error))?;
        let sender = channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0);
        Ok(DocumentSubscription {
            key: key.to_string(),
            receiver: sender.subscribe(),
        })
    }

    pub fn publish(&self, key: &str, document: &Document) -> Result<usize, SyncError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|error| SyncError::poisoned("subscription hub", error))?;
        let Some(sender) = channels.get(key) else {
            return Ok(0);
        };
        match sender.send(document.clone()) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                channels.remove(key);
                Ok(0)
            }
        }
    }
}

pub fn shallow_merge(existing: Option<Document>, patch: Patch) -> Document {
    let mut merged = match existing {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };
    for (field, value) in patch {
        merged.insert(field, value);
    }
    Value::Object(merged)
}

/// Converts a serialized value into a top-level patch.
pub fn patch_from(value: Value) -> Result<Patch, SyncError> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(SyncError::InvalidInput(format!(
            "document patch must be an object, got {other}"
        ))),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    hub: SubscriptionHub,
    writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, key: &str) -> Result<Option<Document>, SyncError> {
        let documents = self
            .documents
            .lock()
            .map_err(|error| SyncError::poisoned("document store", error))?;
        Ok(documents.get(key).cloned())
    }
}

#[async_trait]
impl RemoteDocumentStore for InMemoryDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<Document>, SyncError> {
        self.snapshot(key)
    }

    async fn write(&self, key: &str, patch: Patch) -> Result<(), SyncError> {
        let merged = {
            let mut documents = self
                .documents
                .lock()
                .map_err(|error| SyncError::poisoned("document store", error))?;
            let merged = shallow_merge(documents.remove(key), patch);
            documents.insert(key.to_string(), merged.clone());
            merged
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.hub.publish(key, &merged)?;
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError> {
        self.hub.subscribe(key)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// Wraps a store and rejects writes while `failing` is set.
    pub(crate) struct FlakyStore {
        pub(crate) inner: Arc<InMemoryDocumentStore>,
        pub(crate) failing: AtomicBool,
        pub(crate) rejected: AtomicUsize,
    }

    impl FlakyStore {
        pub(crate) fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
            Self {
                inner,
                failing: AtomicBool::new(false),
                rejected: AtomicUsize::new(0),
            }
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RemoteDocumentStore for FlakyStore {
        async fn read(&self, key: &str) -> Result<Option<Document>, SyncError> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, patch: Patch) -> Result<(), SyncError> {
            if self.failing.load(Ordering::SeqCst) {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return Err(SyncError::Store("network error while writing".to_string()));
            }
            self.inner.write(key, patch).await
        }

        fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError> {
            self.inner.subscribe(key)
        }
    }

    /// Holds every write for `delay` before applying it.
    pub(crate) struct SlowStore {
        pub(crate) inner: Arc<InMemoryDocumentStore>,
        pub(crate) delay: std::time::Duration,
    }

    #[async_trait]
    impl RemoteDocumentStore for SlowStore {
        async fn read(&self, key: &str) -> Result<Option<Document>, SyncError> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, patch: Patch) -> Result<(), SyncError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write(key, patch).await
        }

        fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError> {
            self.inner.subscribe(key)
        }
    }
}
